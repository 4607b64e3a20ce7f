//! Core value types shared across the IR, scheduler and ABI.

use serde::{Deserialize, Serialize};

/// Stable integer identifier for an IR node. Assigned by insertion order,
/// never reused. Stored as `u32` internally; the native ABI narrows it to
/// a signed 32-bit value, with `-1` meaning "none/failure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(v: u32) -> Self {
        NodeId(v)
    }
}

/// Element type tag. Only `F32` carries a numeric execution contract today;
/// the others round-trip through the IR, shape inference and the ABI's
/// dtype enum but are not yet backed by kernels (the ABI pointer type is
/// "F32 storage for now", per the native interface contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    I32,
    I8,
}

impl DType {
    /// Wire value used by the native ABI's dtype enum.
    pub fn wire_value(self) -> i32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
            DType::I32 => 2,
            DType::I8 => 3,
        }
    }

    pub fn from_wire_value(v: i32) -> Option<Self> {
        match v {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::I32),
            3 => Some(DType::I8),
            _ => None,
        }
    }

    /// Size in bytes of one element of this dtype.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I32 => 4,
            DType::I8 => 1,
        }
    }
}

/// A finite, ordered sequence of positive dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Shape(dims.into())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total element count (product of dimensions). An empty shape
    /// (rank 0) has size 1, matching scalar semantics.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn byte_size(&self, dtype: DType) -> usize {
        self.size() * dtype.size_bytes()
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}
