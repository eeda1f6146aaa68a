use std::fmt;

// DType — supported element types.
//
// f32 is the dtype the conformance models run in; f64 is kept for
// high-precision checks in tests. Integer types have no use in this runtime
// — comparison results are materialized as 0.0/1.0 scalars of the operand
// dtype rather than as a separate bool storage.

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
        }
    }
}
