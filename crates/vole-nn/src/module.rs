// Module trait — the interface every network layer implements.
//
// Each layer is a plain struct implementing this trait: forward() computes
// the output, and named_parameters() exposes the layer's tensors under
// stable dotted names. Those names matter here more than in a training
// framework — they are the contract between the eager model and the graph
// import path, which captures each parameter as a named graph input and
// feeds the same tensors to the VM at run time.

use vole_core::{Result, Tensor};

/// The fundamental trait for all network layers.
///
/// Inference-only: `forward()` computes the output, `parameters()` and
/// `named_parameters()` expose the layer's tensors for graph capture.
pub trait Module {
    /// Compute the output tensor from the input tensor.
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// Return all parameters of this module.
    fn parameters(&self) -> Vec<Tensor>;

    /// Return all parameters with human-readable names.
    ///
    /// Leaf modules (Linear, etc.) override this to provide names like
    /// `"weight"` / `"bias"`. Composite modules concatenate sub-module
    /// names with a `"."` separator, e.g. `"cell.linear.weight"`.
    ///
    /// The default uses positional indices (`param_0`, `param_1`, ...).
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("param_{i}"), p))
            .collect()
    }

    /// Total number of scalar parameters in this module.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.elem_count()).sum()
    }
}
