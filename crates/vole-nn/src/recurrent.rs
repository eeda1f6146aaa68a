// Recurrent modules with data-dependent control flow.
//
// These layers exist to exercise the graph import path on a model whose
// forward pass branches on tensor values and loops over a sequence — the
// two things a straight-line trace cannot capture.
//
//   SignGate:  y = x  if sum(x) > 0, else -x
//   GateCell:  h' = tanh(gate(linear(x)) + h)
//   GatedRnn:  unrolls GateCell over the leading (time) dimension and
//              returns the final hidden state.

use vole_core::{DType, Result, Tensor};

use crate::linear::Linear;
use crate::module::Module;

/// A branch on the sign of the input's sum: identity when positive,
/// negation otherwise.
///
/// The comparison is strict, so a sum of exactly zero takes the negation
/// branch.
pub struct SignGate;

impl SignGate {
    pub fn new() -> Self {
        SignGate
    }
}

impl Default for SignGate {
    fn default() -> Self {
        SignGate::new()
    }
}

impl Module for SignGate {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let total = x.sum_all()?.to_scalar()?;
        if total > 0.0 {
            Ok(x.clone())
        } else {
            x.neg()
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}

/// One recurrence step: h' = tanh(gate(linear(x)) + h).
///
/// The new hidden state is also the cell's output for the step.
pub struct GateCell {
    linear: Linear,
    gate: SignGate,
}

impl GateCell {
    /// Create a cell with a freshly initialized Linear layer.
    pub fn new(in_features: usize, hidden_features: usize, dtype: DType) -> Result<Self> {
        Ok(GateCell {
            linear: Linear::new(in_features, hidden_features, true, dtype)?,
            gate: SignGate::new(),
        })
    }

    /// Create a cell around an existing Linear layer.
    pub fn from_linear(linear: Linear) -> Self {
        GateCell {
            linear,
            gate: SignGate::new(),
        }
    }

    /// The inner Linear layer.
    pub fn linear(&self) -> &Linear {
        &self.linear
    }

    /// Advance the hidden state by one step.
    ///
    /// `x`: [batch, in_features], `h`: [batch, hidden_features].
    pub fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gated = self.gate.forward(&self.linear.forward(x)?)?;
        gated.add(h)?.tanh()
    }
}

impl Module for GateCell {
    /// Single step from a zero hidden state.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = Tensor::zeros((x.dims()[0], self.linear.out_features()), x.dtype())?;
        self.step(x, &h)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.linear.parameters()
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.linear
            .named_parameters()
            .into_iter()
            .map(|(n, p)| (format!("linear.{n}"), p))
            .collect()
    }
}

/// A recurrent network that unrolls [`GateCell`] over the leading dimension
/// of a [seq, batch, features] input and returns the final hidden state of
/// shape [batch, hidden_features].
///
/// The hidden state starts at zero on every call.
pub struct GatedRnn {
    cell: GateCell,
}

impl GatedRnn {
    pub fn new(in_features: usize, hidden_features: usize, dtype: DType) -> Result<Self> {
        Ok(GatedRnn {
            cell: GateCell::new(in_features, hidden_features, dtype)?,
        })
    }

    pub fn from_cell(cell: GateCell) -> Self {
        GatedRnn { cell }
    }

    /// The recurrence cell.
    pub fn cell(&self) -> &GateCell {
        &self.cell
    }

    /// Output features per step (the hidden size).
    pub fn hidden_features(&self) -> usize {
        self.cell.linear.out_features()
    }
}

impl Module for GatedRnn {
    /// Input:  [seq, batch, in_features]
    /// Output: [batch, hidden_features]
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let seq_len = xs.shape().dim(0)?;
        let batch = xs.shape().dim(1)?;
        let mut h = Tensor::zeros((batch, self.hidden_features()), xs.dtype())?;
        for t in 0..seq_len {
            let x_t = xs.narrow(0, t, 1)?.squeeze(0)?;
            h = self.cell.step(&x_t, &h)?;
        }
        Ok(h)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.cell.parameters()
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.cell
            .named_parameters()
            .into_iter()
            .map(|(n, p)| (format!("cell.{n}"), p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_sign_gate_positive_sum() {
        let x = Tensor::from_f64_slice(&[1.0, 2.0, -0.5], 3, DType::F64).unwrap();
        let y = SignGate::new().forward(&x).unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), vec![1.0, 2.0, -0.5]);
    }

    #[test]
    fn test_sign_gate_negative_sum() {
        let x = Tensor::from_f64_slice(&[-1.0, -2.0, 0.5], 3, DType::F64).unwrap();
        let y = SignGate::new().forward(&x).unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), vec![1.0, 2.0, -0.5]);
    }

    #[test]
    fn test_sign_gate_zero_sum_negates() {
        // Strict comparison: sum == 0 takes the negation branch
        let x = Tensor::from_f64_slice(&[1.0, -1.0], 2, DType::F64).unwrap();
        let y = SignGate::new().forward(&x).unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), vec![-1.0, 1.0]);
    }

    #[test]
    fn test_gate_cell_step_matches_formula() {
        // Identity weight, no bias: h' = tanh(gate(x) + h)
        let w = Tensor::from_f64_slice(&[1.0, 0.0, 0.0, 1.0], (2, 2), DType::F64).unwrap();
        let cell = GateCell::from_linear(Linear::from_tensors(w, None).unwrap());

        let x = Tensor::from_f64_slice(&[0.5, 0.25], (1, 2), DType::F64).unwrap();
        let h = Tensor::from_f64_slice(&[0.1, 0.2], (1, 2), DType::F64).unwrap();
        let h2 = cell.step(&x, &h).unwrap();

        let out = h2.to_f64_vec().unwrap();
        assert!(close(out[0], (0.5f64 + 0.1).tanh()));
        assert!(close(out[1], (0.25f64 + 0.2).tanh()));
    }

    #[test]
    fn test_rnn_output_shape() {
        let rnn = GatedRnn::new(4, 4, DType::F32).unwrap();
        let xs = Tensor::rand((10, 10, 4), DType::F32).unwrap();
        let y = rnn.forward(&xs).unwrap();
        assert_eq!(y.dims(), &[10, 4]);
    }

    #[test]
    fn test_rnn_output_bounded_by_tanh() {
        let rnn = GatedRnn::new(4, 4, DType::F64).unwrap();
        let xs = Tensor::randn((6, 3, 4), DType::F64).unwrap();
        let y = rnn.forward(&xs).unwrap();
        for v in y.to_f64_vec().unwrap() {
            assert!(v.abs() <= 1.0);
        }
    }

    #[test]
    fn test_rnn_single_step_equals_cell() {
        let rnn = GatedRnn::new(3, 3, DType::F64).unwrap();
        let x = Tensor::rand((1, 2, 3), DType::F64).unwrap();
        let via_rnn = rnn.forward(&x).unwrap();
        let x0 = x.narrow(0, 0, 1).unwrap().squeeze(0).unwrap();
        let via_cell = rnn.cell().forward(&x0).unwrap();
        assert_eq!(
            via_rnn.to_f64_vec().unwrap(),
            via_cell.to_f64_vec().unwrap()
        );
    }

    #[test]
    fn test_named_parameters_dotted() {
        let rnn = GatedRnn::new(4, 4, DType::F32).unwrap();
        let names: Vec<String> = rnn
            .named_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["cell.linear.weight", "cell.linear.bias"]);
    }
}
