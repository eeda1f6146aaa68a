use std::sync::Arc;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — the fundamental data structure.
//
// An n-dimensional array of floats on the CPU. Compared to a full training
// framework this runtime is deliberately narrow: storage is always
// contiguous (row-major), there are no stride views, and no autograd —
// everything here exists to run a model forward and to feed the graph VM.
//
// MEMORY MODEL:
//
//   The inner data is wrapped in Arc, so cloning a Tensor is O(1) and the
//   same storage can be held by the eager model, the extracted parameter
//   map, and the VM's register file simultaneously. Storage is immutable
//   after construction; every op allocates its output.

/// Flat element storage, one variant per supported dtype.
#[derive(Debug, Clone)]
enum Storage {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Storage {
    fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F64(v) => v.len(),
        }
    }

    fn get(&self, i: usize) -> f64 {
        match self {
            Storage::F32(v) => v[i] as f64,
            Storage::F64(v) => v[i],
        }
    }

    fn from_f64(data: Vec<f64>, dtype: DType) -> Self {
        match dtype {
            DType::F32 => Storage::F32(data.into_iter().map(|v| v as f32).collect()),
            DType::F64 => Storage::F64(data),
        }
    }
}

struct TensorInner {
    storage: Storage,
    shape: Shape,
    dtype: DType,
}

/// An n-dimensional array of numbers.
///
/// Tensors are cheap to clone (`Arc` handle) and immutable once built.
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={})",
            self.inner.shape, self.inner.dtype
        )
    }
}

impl Tensor {
    fn from_storage(storage: Storage, shape: Shape, dtype: DType) -> Self {
        debug_assert_eq!(storage.len(), shape.elem_count());
        Tensor {
            inner: Arc::new(TensorInner {
                storage,
                shape,
                dtype,
            }),
        }
    }

    fn from_f64_data(data: Vec<f64>, shape: Shape, dtype: DType) -> Self {
        Self::from_storage(Storage::from_f64(data, dtype), shape, dtype)
    }

    // Accessors

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.inner.shape.elem_count()
    }

    /// Data type of the elements.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Whether two handles share the same underlying storage.
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Creation

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::full(shape, 0.0, dtype)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::full(shape, 1.0, dtype)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: impl Into<Shape>, val: f64, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        let data = vec![val; shape.elem_count()];
        Ok(Self::from_f64_data(data, shape, dtype))
    }

    /// Create a tensor from a flat slice of f64 values, converted to `dtype`.
    pub fn from_f64_slice(data: &[f64], shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected: shape.elem_count(),
                got: data.len(),
            });
        }
        Ok(Self::from_f64_data(data.to_vec(), shape, dtype))
    }

    /// Create a tensor with uniform random values in [0, 1).
    pub fn rand(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..shape.elem_count()).map(|_| rng.gen::<f64>()).collect();
        Ok(Self::from_f64_data(data, shape, dtype))
    }

    /// Create a tensor with standard normal random values (mean 0, std 1).
    pub fn randn(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        let mut rng = rand::thread_rng();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| rng.sample(StandardNormal))
            .collect();
        Ok(Self::from_f64_data(data, shape, dtype))
    }

    /// Zeros with the same shape and dtype as `other`.
    pub fn zeros_like(other: &Self) -> Result<Self> {
        Self::zeros(other.shape().clone(), other.dtype())
    }

    /// Uniform randoms with the same shape and dtype as `other`.
    pub fn rand_like(other: &Self) -> Result<Self> {
        Self::rand(other.shape().clone(), other.dtype())
    }

    // Interchange

    /// Copy the elements out as a flat f64 vector (row-major).
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let n = self.elem_count();
        Ok((0..n).map(|i| self.inner.storage.get(i)).collect())
    }

    /// Extract the single element of a one-element tensor.
    pub fn to_scalar(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        Ok(self.inner.storage.get(0))
    }

    // Element-wise ops

    /// Element-wise addition with broadcasting: self + rhs.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, |a, b| a + b)
    }

    /// Element-wise subtraction with broadcasting: self - rhs.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, |a, b| a - b)
    }

    /// Element-wise multiplication with broadcasting: self * rhs.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, |a, b| a * b)
    }

    /// Element-wise negation: -self.
    pub fn neg(&self) -> Result<Self> {
        self.unary_op(|v| -v)
    }

    /// Element-wise absolute value.
    pub fn abs(&self) -> Result<Self> {
        self.unary_op(f64::abs)
    }

    /// Element-wise hyperbolic tangent.
    pub fn tanh(&self) -> Result<Self> {
        self.unary_op(f64::tanh)
    }

    /// Element-wise affine transform: self * mul + add.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Self> {
        self.unary_op(|v| v * mul + add)
    }

    fn unary_op(&self, f: impl Fn(f64) -> f64) -> Result<Self> {
        let data: Vec<f64> = (0..self.elem_count())
            .map(|i| f(self.inner.storage.get(i)))
            .collect();
        Ok(Self::from_f64_data(data, self.shape().clone(), self.dtype()))
    }

    fn binary_op(&self, rhs: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        let out_shape = Shape::broadcast_shape(self.shape(), rhs.shape())?;
        let lhs_strides = self.shape().broadcast_strides(&out_shape);
        let rhs_strides = rhs.shape().broadcast_strides(&out_shape);
        let out_strides = out_shape.stride_contiguous();
        let out_dims = out_shape.dims().to_vec();

        let n = out_shape.elem_count();
        let mut data = Vec::with_capacity(n);
        for flat in 0..n {
            // Decompose the flat output index into per-dimension coordinates,
            // then re-project through each operand's broadcast strides.
            let mut li = 0usize;
            let mut ri = 0usize;
            for (d, &dim_stride) in out_strides.iter().enumerate() {
                let coord = if out_dims[d] == 0 {
                    0
                } else {
                    (flat / dim_stride.max(1)) % out_dims[d]
                };
                li += coord * lhs_strides[d];
                ri += coord * rhs_strides[d];
            }
            data.push(f(self.inner.storage.get(li), rhs.inner.storage.get(ri)));
        }
        Ok(Self::from_f64_data(data, out_shape, self.dtype()))
    }

    // Reductions

    /// Sum of all elements, returned as a one-element tensor of shape [].
    pub fn sum_all(&self) -> Result<Self> {
        let sum: f64 = (0..self.elem_count())
            .map(|i| self.inner.storage.get(i))
            .sum();
        Ok(Self::from_f64_data(vec![sum], Shape::from(()), self.dtype()))
    }

    // Linear algebra

    /// 2-D matrix multiplication: [m, k] @ [k, n] → [m, n].
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if self.rank() != 2 || rhs.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: if self.rank() != 2 {
                    self.rank()
                } else {
                    rhs.rank()
                },
            });
        }
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        let (m, k1) = (self.dims()[0], self.dims()[1]);
        let (k2, n) = (rhs.dims()[0], rhs.dims()[1]);
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }

        let a = &self.inner.storage;
        let b = &rhs.inner.storage;
        let mut out = vec![0.0f64; m * n];
        for i in 0..m {
            for kk in 0..k1 {
                let av = a.get(i * k1 + kk);
                for j in 0..n {
                    out[i * n + j] += av * b.get(kk * n + j);
                }
            }
        }
        Ok(Self::from_f64_data(out, Shape::from((m, n)), self.dtype()))
    }

    /// Transpose a 2-D matrix (copies into a new contiguous tensor).
    pub fn t(&self) -> Result<Self> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            });
        }
        let (r, c) = (self.dims()[0], self.dims()[1]);
        let mut out = vec![0.0f64; r * c];
        for i in 0..r {
            for j in 0..c {
                out[j * r + i] = self.inner.storage.get(i * c + j);
            }
        }
        Ok(Self::from_f64_data(out, Shape::from((c, r)), self.dtype()))
    }

    // Indexing

    /// Narrow (slice) along a dimension, copying the selected region.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        let rank = self.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let dims = self.dims();
        if start + len > dims[dim] {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size: dims[dim],
            });
        }

        let inner: usize = dims[dim + 1..].iter().product();
        let outer: usize = dims[..dim].iter().product();
        let mut out = Vec::with_capacity(outer * len * inner);
        for o in 0..outer {
            for d in start..start + len {
                let base = (o * dims[dim] + d) * inner;
                for i in 0..inner {
                    out.push(self.inner.storage.get(base + i));
                }
            }
        }

        let mut out_dims = dims.to_vec();
        out_dims[dim] = len;
        Ok(Self::from_f64_data(out, Shape::new(out_dims), self.dtype()))
    }

    /// Remove a dimension of size 1.
    pub fn squeeze(&self, dim: usize) -> Result<Self> {
        let rank = self.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        if self.dims()[dim] != 1 {
            return Err(Error::msg(format!(
                "squeeze: dimension {} has size {}, expected 1",
                dim,
                self.dims()[dim]
            )));
        }
        let mut new_dims = self.dims().to_vec();
        new_dims.remove(dim);
        Ok(Self::from_storage(
            self.inner.storage.clone(),
            Shape::new(new_dims),
            self.dtype(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_broadcast_bias() {
        // [2, 3] + [1, 3] broadcasts the bias over rows
        let x = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64)
            .unwrap();
        let b = Tensor::from_f64_slice(&[10.0, 20.0, 30.0], (1, 3), DType::F64).unwrap();
        let y = x.add(&b).unwrap();
        assert_eq!(y.dims(), &[2, 3]);
        assert_eq!(
            y.to_f64_vec().unwrap(),
            vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
        );
    }

    #[test]
    fn test_matmul() {
        let a = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64)
            .unwrap();
        let b = Tensor::from_f64_slice(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], (3, 2), DType::F64)
            .unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_f64_vec().unwrap(), vec![4.0, 5.0, 10.0, 11.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Tensor::zeros((2, 3), DType::F64).unwrap();
        let b = Tensor::zeros((4, 2), DType::F64).unwrap();
        assert!(matches!(
            a.matmul(&b),
            Err(Error::MatmulShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_sum_all_and_scalar() {
        let x = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64).unwrap();
        let s = x.sum_all().unwrap();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.to_scalar().unwrap(), 10.0);
        assert!(matches!(x.to_scalar(), Err(Error::NotAScalar { .. })));
    }

    #[test]
    fn test_narrow_squeeze_dim0() {
        // Select timestep 1 of a [3, 2, 2] sequence
        let data: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let xs = Tensor::from_f64_slice(&data, (3, 2, 2), DType::F64).unwrap();
        let x1 = xs.narrow(0, 1, 1).unwrap().squeeze(0).unwrap();
        assert_eq!(x1.dims(), &[2, 2]);
        assert_eq!(x1.to_f64_vec().unwrap(), vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_transpose() {
        let a = Tensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64)
            .unwrap();
        let at = a.t().unwrap();
        assert_eq!(at.dims(), &[3, 2]);
        assert_eq!(at.to_f64_vec().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_f32_storage_rounds() {
        let x = Tensor::from_f64_slice(&[0.1], 1, DType::F32).unwrap();
        let v = x.to_f64_vec().unwrap()[0];
        assert_eq!(v, 0.1f32 as f64);
    }

    #[test]
    fn test_dtype_mismatch() {
        let a = Tensor::zeros(3, DType::F32).unwrap();
        let b = Tensor::zeros(3, DType::F64).unwrap();
        assert!(matches!(a.add(&b), Err(Error::DTypeMismatch { .. })));
    }

    #[test]
    fn test_same_storage() {
        let x = Tensor::rand((2, 2), DType::F32).unwrap();
        let y = x.clone();
        assert!(x.same_storage(&y));
        let z = Tensor::zeros((2, 2), DType::F32).unwrap();
        assert!(!x.same_storage(&z));
    }

    #[test]
    fn test_ones_and_abs() {
        let x = Tensor::ones((2, 2), DType::F64).unwrap();
        assert_eq!(x.to_f64_vec().unwrap(), vec![1.0; 4]);
        // 1 * -3 + 1 = -2 everywhere, abs flips the sign back
        let y = x.affine(-3.0, 1.0).unwrap().abs().unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), vec![2.0; 4]);
    }

    #[test]
    fn test_like_constructors() {
        let x = Tensor::rand((3, 2), DType::F32).unwrap();
        let z = Tensor::zeros_like(&x).unwrap();
        assert_eq!(z.dims(), x.dims());
        assert_eq!(z.dtype(), x.dtype());
        assert!(z.to_f64_vec().unwrap().iter().all(|&v| v == 0.0));

        let r = Tensor::rand_like(&x).unwrap();
        assert_eq!(r.dims(), x.dims());
        assert!(r
            .to_f64_vec()
            .unwrap()
            .iter()
            .all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_rand_range() {
        let x = Tensor::rand((4, 4), DType::F32).unwrap();
        for v in x.to_f64_vec().unwrap() {
            assert!((0.0..1.0).contains(&v));
        }
    }
}
