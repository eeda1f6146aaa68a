//! Tensor primitives for the Vole graph runtime.
//!
//! This crate provides the small CPU tensor library that both the eager
//! neural-network layer (`vole-nn`) and the graph VM (`vole`) are built on:
//! a contiguous, immutable [`Tensor`] with the handful of float operations
//! the runtime needs, plus the shared [`Error`] type for the workspace.

pub mod dtype;
pub mod error;
pub mod shape;
pub mod tensor;

pub use dtype::DType;
pub use error::{Error, Result};
pub use shape::Shape;
pub use tensor::Tensor;
