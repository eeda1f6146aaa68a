//! Graph capture and VM execution for eager Vole models.
//!
//! The workflow mirrors a script-and-compile pipeline:
//!
//! 1. Build a model from `vole_nn` modules and run it eagerly — that is the
//!    reference result.
//! 2. [`frontend::import`] captures the model as a static [`graph::Program`]
//!    plus a map of named parameter tensors. Data-dependent branches and
//!    loops are captured structurally (If / Scan subgraphs), so the program
//!    is valid for every input value.
//! 3. [`vm::VmExecutor`] compiles each graph to a flat instruction tape and
//!    evaluates the program against the parameter map plus the named input.
//! 4. [`testing`] compares the two results element-wise.

pub mod frontend;
pub mod graph;
pub mod testing;
pub mod vm;

pub use vole_core::{bail, DType, Error, Result, Shape, Tensor};
pub use vole_nn as nn;

pub use frontend::{import, FuncBuilder, Script};
pub use vm::VmExecutor;
