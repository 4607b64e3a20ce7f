//! Capability-gated kernel dispatch (spec §4.4).
//!
//! Dispatch is a pure function of `(op, dtype, shape, capabilities)` rather
//! than a trait-object lookup — per the spec's own redesign guidance, a flat
//! match over a closed `PrimitiveOp` enum is both simpler and faster than
//! the teacher's `Box<dyn Operation>` hierarchy, and it is the only shape
//! that lets [`Variant`] be compared for the determinism tests that assert
//! "SIMD and reference dispatch give bit-identical results below the width
//! threshold" without executing either kernel.

pub mod reference;
pub mod simd;

use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilitySnapshot;
use crate::ir::PrimitiveOp;
use crate::types::{DType, Shape};

/// Kernels below this element count on their last axis gain nothing from a
/// vector instruction — the dispatcher keeps them on the reference path so
/// small-row results are identical in both modes by construction instead of
/// by coincidence of rounding.
pub const SIMD_MIN_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    Reference,
    SimdAvx2,
    SimdNeon,
}

impl Variant {
    /// Name used in `KernelDispatch` trace details (spec §4.4). Trace
    /// consumers (`examples/original_source/python/vectoria/tools/trace_viz.py`,
    /// `trace_analyzer.py`) match on these exact hyphenated strings, not the
    /// enum's `Debug` spelling.
    pub fn spec_name(self) -> &'static str {
        match self {
            Variant::Reference => "Reference",
            Variant::SimdAvx2 => "SIMD-AVX2",
            Variant::SimdNeon => "SIMD-NEON",
        }
    }
}

/// The subset of [`PrimitiveOp`]s with a SIMD implementation at all. Kept
/// deliberately narrow: `Exp`/`Log` stay reference-only everywhere because
/// the determinism contract requires the platform's `expf`/`logf` with no
/// polynomial substitution, and a hand-rolled vector transcendental would
/// either violate that or just re-derive the scalar result per lane — no
/// real gain for the risk. `MatMul`/`Transpose`/`Reshape`/`Concat` are also
/// reference-only: their cost is memory movement or non-elementwise
/// reduction, not a shape SIMD lanes help with at the sizes this engine
/// targets.
fn simd_eligible(op: &PrimitiveOp) -> bool {
    use crate::ir::ElementwiseOp as E;
    matches!(
        op,
        PrimitiveOp::Add
            | PrimitiveOp::Mul
            | PrimitiveOp::Relu
            | PrimitiveOp::BiasAdd
            | PrimitiveOp::ReduceSum
            | PrimitiveOp::Elementwise(E::Sub)
            | PrimitiveOp::Elementwise(E::DivRow)
            | PrimitiveOp::Elementwise(E::Neg)
            | PrimitiveOp::Elementwise(E::ScalarMul { .. })
            | PrimitiveOp::Elementwise(E::RecipSqrt { .. })
    )
}

pub fn select_variant(op: &PrimitiveOp, dtype: DType, shape: &Shape, caps: CapabilitySnapshot) -> Variant {
    if dtype != DType::F32 {
        return Variant::Reference;
    }
    if !simd_eligible(op) {
        return Variant::Reference;
    }
    let width = shape.as_slice().last().copied().unwrap_or(0);
    if width < SIMD_MIN_WIDTH || !caps.simd_enabled() {
        return Variant::Reference;
    }
    match caps.arch {
        crate::capabilities::Architecture::X86_64 => Variant::SimdAvx2,
        crate::capabilities::Architecture::Arm64 => Variant::SimdNeon,
        crate::capabilities::Architecture::Unknown => Variant::Reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Architecture;

    fn caps(simd: bool, arch: Architecture) -> CapabilitySnapshot {
        CapabilitySnapshot { arch, simd_compiled: true, simd_supported: simd }
    }

    #[test]
    fn narrow_rows_always_stay_reference() {
        let v = select_variant(&PrimitiveOp::Add, DType::F32, &Shape::new(vec![4]), caps(true, Architecture::X86_64));
        assert_eq!(v, Variant::Reference);
    }

    #[test]
    fn wide_rows_pick_simd_when_supported() {
        let v = select_variant(&PrimitiveOp::Add, DType::F32, &Shape::new(vec![64]), caps(true, Architecture::X86_64));
        assert_eq!(v, Variant::SimdAvx2);
    }

    #[test]
    fn disabled_capability_forces_reference_regardless_of_width() {
        let v = select_variant(&PrimitiveOp::Add, DType::F32, &Shape::new(vec![64]), caps(false, Architecture::X86_64));
        assert_eq!(v, Variant::Reference);
    }

    #[test]
    fn matmul_never_dispatches_to_simd() {
        let v = select_variant(&PrimitiveOp::MatMul, DType::F32, &Shape::new(vec![64, 64]), caps(true, Architecture::X86_64));
        assert_eq!(v, Variant::Reference);
    }
}
