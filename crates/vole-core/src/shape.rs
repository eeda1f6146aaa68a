use std::fmt;

// Shape — n-dimensional shape of a tensor.
//
// The shape determines the element count (product of dims), the row-major
// strides used to walk flat storage, and — via NumPy broadcasting rules —
// whether two tensors are compatible for element-wise operations.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, ...).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar shape [] has 1 element
    /// (empty product); a shape with a zero dim has 0.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Row-major (C-order) strides for this shape.
    ///
    /// For [2, 3, 4] the strides are [12, 4, 1]: the last dimension is
    /// contiguous, each earlier dimension jumps the product of the later ones.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0.get(d).copied().ok_or(crate::Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// NumPy rules: align from the right; dimensions are compatible when
    /// equal or when one of them is 1; missing leading dimensions act as 1.
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> crate::Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd || rd == 1 {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else {
                return Err(crate::Error::msg(format!(
                    "shapes {:?} and {:?} are not broadcast-compatible (dim {} from right: {} vs {})",
                    l, r, i, ld, rd
                )));
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Strides for reading this shape as if it had the target broadcast shape.
    ///
    /// Dimensions where self is 1 but the target is larger get stride 0
    /// (the single element repeats); missing leading dimensions also get 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();

        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
            // self_dims[i] == 1 → stride stays 0 (broadcast)
        }
        result
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert_eq!(s.stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(s.elem_count(), 24);
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::from((3, 4));
        let b = Shape::from(4);
        let out = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(out.dims(), &[3, 4]);

        let a = Shape::from((1, 4));
        let b = Shape::from((10, 4));
        let out = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(out.dims(), &[10, 4]);

        let a = Shape::from(3);
        let b = Shape::from(4);
        assert!(Shape::broadcast_shape(&a, &b).is_err());
    }

    #[test]
    fn test_broadcast_strides() {
        let a = Shape::from((1, 4));
        let target = Shape::from((10, 4));
        assert_eq!(a.broadcast_strides(&target), vec![0, 1]);
    }
}
