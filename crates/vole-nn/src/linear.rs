// Linear — fully-connected (dense) layer: y = xW^T + b.
//
// PARAMETER SHAPES:
//
//   weight: [out_features, in_features]  — stored transposed for matmul
//   bias:   [1, out_features]            — broadcast across batch dimension
//
// Weights use Kaiming uniform initialization: U(-k, k) with
// k = sqrt(1/in_features).

use vole_core::{DType, Error, Result, Tensor};

use crate::module::Module;

/// A fully-connected (dense) layer: y = xW^T + b.
pub struct Linear {
    /// Weight matrix: [out_features, in_features]
    weight: Tensor,
    /// Optional bias vector: [1, out_features]
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Kaiming uniform initialization.
    pub fn new(
        in_features: usize,
        out_features: usize,
        use_bias: bool,
        dtype: DType,
    ) -> Result<Self> {
        // Kaiming uniform: U(-k, k) where k = sqrt(1/in_features)
        let k = (1.0 / in_features as f64).sqrt();

        // rand is uniform [0, 1); scale into [-k, k)
        let weight = Tensor::rand((out_features, in_features), dtype)?.affine(2.0 * k, -k)?;

        let bias = if use_bias {
            Some(Tensor::rand((1, out_features), dtype)?.affine(2.0 * k, -k)?)
        } else {
            None
        };

        Ok(Linear {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Create a Linear layer from existing weight and bias tensors.
    pub fn from_tensors(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let dims = weight.dims();
        if dims.len() != 2 {
            return Err(Error::msg(format!(
                "Linear weight must be 2D, got shape {:?}",
                dims
            )));
        }
        let out_features = dims[0];
        let in_features = dims[1];
        Ok(Linear {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// The input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// The output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Direct access to the weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Direct access to the bias tensor (if any).
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl Module for Linear {
    /// Forward pass: y = x @ W^T + b.
    ///
    /// Input shape:  [batch, in_features]
    /// Output shape: [batch, out_features]
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let wt = self.weight.t()?;
        let output = x.matmul(&wt)?;

        match &self.bias {
            // bias shape [1, out_features] broadcasts over the batch dim
            Some(bias) => output.add(bias),
            None => Ok(output),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        if let Some(ref b) = self.bias {
            params.push(b.clone());
        }
        params
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut named = vec![("weight".to_string(), self.weight.clone())];
        if let Some(ref b) = self.bias {
            named.push(("bias".to_string(), b.clone()));
        }
        named
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_shapes() {
        let linear = Linear::new(4, 4, true, DType::F32).unwrap();
        let x = Tensor::rand((10, 4), DType::F32).unwrap();
        let y = linear.forward(&x).unwrap();
        assert_eq!(y.dims(), &[10, 4]);
    }

    #[test]
    fn test_linear_init_range() {
        let linear = Linear::new(16, 8, true, DType::F64).unwrap();
        let k = (1.0f64 / 16.0).sqrt();
        for v in linear.weight().to_f64_vec().unwrap() {
            assert!(v >= -k && v < k, "weight {} outside [-k, k)", v);
        }
    }

    #[test]
    fn test_linear_no_bias() {
        let linear = Linear::new(3, 2, false, DType::F64).unwrap();
        assert!(linear.bias().is_none());
        assert_eq!(linear.parameters().len(), 1);
        assert_eq!(linear.num_parameters(), 6);
    }

    #[test]
    fn test_from_tensors_matches_manual_matmul() {
        let w = Tensor::from_f64_slice(&[1.0, 0.0, 0.0, 2.0], (2, 2), DType::F64).unwrap();
        let b = Tensor::from_f64_slice(&[0.5, -0.5], (1, 2), DType::F64).unwrap();
        let linear = Linear::from_tensors(w, Some(b)).unwrap();

        let x = Tensor::from_f64_slice(&[3.0, 4.0], (1, 2), DType::F64).unwrap();
        let y = linear.forward(&x).unwrap();
        // [3, 4] @ [[1, 0], [0, 2]]^T + [0.5, -0.5] = [3.5, 7.5]
        assert_eq!(y.to_f64_vec().unwrap(), vec![3.5, 7.5]);
    }

    #[test]
    fn test_named_parameters() {
        let linear = Linear::new(4, 4, true, DType::F32).unwrap();
        let names: Vec<String> = linear
            .named_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["weight", "bias"]);
    }
}
