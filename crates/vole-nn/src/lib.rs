//! Eager neural network modules for the Vole graph runtime.
//!
//! Layers here run directly on [`vole_core::Tensor`] values and serve as
//! the reference semantics for the graph VM: a model is first executed
//! eagerly, then imported into a static graph and re-executed, and the
//! two results are compared.

pub mod linear;
pub mod module;
pub mod recurrent;

pub use linear::Linear;
pub use module::Module;
pub use recurrent::{GateCell, GatedRnn, SignGate};
