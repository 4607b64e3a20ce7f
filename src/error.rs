//! Build-time and compile-time error taxonomy.
//!
//! Execute-time logic violations (an unset `Input`, a SIMD kernel
//! precondition failure) are never represented here — per the engine's
//! error/panic boundary they abort the process instead of flowing through
//! a `Result`, since the dispatcher is responsible for having already
//! picked a compatible kernel.

use thiserror::Error;

use crate::types::NodeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectoriaError {
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: Vec<usize>, found: Vec<usize> },

    #[error("dtype mismatch: expected {expected:?}, found {found:?}")]
    DTypeMismatch { expected: String, found: String },

    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: i64, rank: usize },

    #[error("invalid permutation {perm:?} for rank {rank}")]
    InvalidPerm { perm: Vec<usize>, rank: usize },

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("graph is frozen; no further insertions are accepted")]
    GraphFrozen,

    #[error("graph has no output set")]
    NoOutput,

    #[error("engine has not been compiled yet")]
    NotCompiled,

    #[error("d_model {d_model} is not divisible by num_heads {num_heads}")]
    DivisorMismatch { d_model: usize, num_heads: usize },

    #[error("internal expansion error: {0}")]
    InternalExpansionError(String),
}

pub type VectoriaResult<T> = Result<T, VectoriaError>;
