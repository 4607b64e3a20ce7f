//! Reference kernels: the numeric ground truth every SIMD variant must
//! reproduce (spec §4.4, §8 determinism contract).
//!
//! Every kernel here is scalar and single-threaded by construction. Sums use
//! strict left-to-right accumulation — never pairwise or tree reduction —
//! because the determinism contract fixes summation order, not just the
//! final rounded value.

use crate::ir::{ElementwiseOp, PrimitiveOp};
use crate::types::Shape;

/// Executes `op` against already-shape-checked inputs, writing into `out`.
/// Shapes are assumed consistent with what the IR builder already validated
/// — this is an execute-time kernel, not a fallible API, so a shape
/// violation here is an engine bug and panics rather than returning a
/// `Result` (see the error/panic boundary note in `error.rs`).
pub fn execute(op: &PrimitiveOp, inputs: &[&[f32]], input_shapes: &[&Shape], out: &mut [f32]) {
    match op {
        PrimitiveOp::MatMul => matmul(inputs[0], input_shapes[0], inputs[1], input_shapes[1], out),
        PrimitiveOp::BiasAdd => bias_add(inputs[0], input_shapes[0], inputs[1], out),
        PrimitiveOp::Relu => relu(inputs[0], out),
        PrimitiveOp::Add => add(inputs[0], inputs[1], out),
        PrimitiveOp::Mul => mul(inputs[0], input_shapes[0], inputs[1], input_shapes[1], out),
        PrimitiveOp::ReduceSum => reduce_last_axis(inputs[0], input_shapes[0], out, ReduceKind::Sum),
        PrimitiveOp::ReduceMax => reduce_last_axis(inputs[0], input_shapes[0], out, ReduceKind::Max),
        PrimitiveOp::Transpose { perm } => transpose(inputs[0], input_shapes[0], perm, out),
        PrimitiveOp::Reshape { .. } => out.copy_from_slice(inputs[0]),
        PrimitiveOp::Concat { axis } => concat(inputs, input_shapes, *axis, out),
        PrimitiveOp::Elementwise(e) => elementwise(e, inputs, input_shapes, out),
    }
}

fn matmul(a: &[f32], a_shape: &Shape, b: &[f32], b_shape: &Shape, out: &mut [f32]) {
    let ad = a_shape.as_slice();
    let bd = b_shape.as_slice();
    match (ad.len(), bd.len()) {
        (2, 2) => matmul_2d(a, ad[0], ad[1], b, bd[1], out),
        (3, 3) => {
            let (batch, m, k, n) = (ad[0], ad[1], ad[2], bd[2]);
            for batch_idx in 0..batch {
                let a_slice = &a[batch_idx * m * k..(batch_idx + 1) * m * k];
                let b_slice = &b[batch_idx * k * n..(batch_idx + 1) * k * n];
                let out_slice = &mut out[batch_idx * m * n..(batch_idx + 1) * m * n];
                matmul_2d(a_slice, m, k, b_slice, n, out_slice);
            }
        }
        (3, 2) => {
            let (batch, m, k, n) = (ad[0], ad[1], ad[2], bd[1]);
            for batch_idx in 0..batch {
                let a_slice = &a[batch_idx * m * k..(batch_idx + 1) * m * k];
                let out_slice = &mut out[batch_idx * m * n..(batch_idx + 1) * m * n];
                matmul_2d(a_slice, m, k, b, n, out_slice);
            }
        }
        _ => panic!("matmul: unsupported rank combination {:?} x {:?}", ad, bd),
    }
}

fn matmul_2d(a: &[f32], m: usize, k: usize, b: &[f32], n: usize, out: &mut [f32]) {
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for p in 0..k {
                acc += a[i * k + p] * b[p * n + j];
            }
            out[i * n + j] = acc;
        }
    }
}

fn bias_add(a: &[f32], a_shape: &Shape, bias: &[f32], out: &mut [f32]) {
    let c = *a_shape.as_slice().last().unwrap();
    for (i, chunk) in out.chunks_mut(c).enumerate() {
        let row = &a[i * c..(i + 1) * c];
        for j in 0..c {
            chunk[j] = row[j] + bias[j];
        }
    }
}

fn relu(a: &[f32], out: &mut [f32]) {
    for (o, &x) in out.iter_mut().zip(a) {
        *o = x.max(0.0);
    }
}

fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = x + y;
    }
}

/// `Mul` accepts same-shape, column-broadcast (`b` is `a`'s last axis), or
/// row-broadcast (`b` is `a`'s shape with the last axis dropped) operands —
/// whichever the IR builder validated when this node was constructed.
fn mul(a: &[f32], a_shape: &Shape, b: &[f32], b_shape: &Shape, out: &mut [f32]) {
    if a_shape.as_slice() == b_shape.as_slice() {
        for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
            *o = x * y;
        }
        return;
    }
    let c = *a_shape.as_slice().last().unwrap();
    if b_shape.as_slice() == [c] || b_shape.as_slice() == [1, c] {
        for (i, chunk) in out.chunks_mut(c).enumerate() {
            let row = &a[i * c..(i + 1) * c];
            for j in 0..c {
                chunk[j] = row[j] * b[j];
            }
        }
        return;
    }
    // Row-broadcast: b has a_shape with the last axis dropped.
    for (i, chunk) in out.chunks_mut(c).enumerate() {
        let row = &a[i * c..(i + 1) * c];
        let scalar = b[i];
        for j in 0..c {
            chunk[j] = row[j] * scalar;
        }
    }
}

enum ReduceKind {
    Sum,
    Max,
}

/// Reduces the last axis, one row at a time, strictly left to right — the
/// left-to-right summation order the determinism contract fixes for
/// `ReduceSum`.
fn reduce_last_axis(a: &[f32], a_shape: &Shape, out: &mut [f32], kind: ReduceKind) {
    let c = *a_shape.as_slice().last().unwrap();
    for (i, o) in out.iter_mut().enumerate() {
        let row = &a[i * c..(i + 1) * c];
        *o = match kind {
            ReduceKind::Sum => {
                let mut acc = 0.0f32;
                for &x in row {
                    acc += x;
                }
                acc
            }
            ReduceKind::Max => row.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        };
    }
}

fn transpose(a: &[f32], a_shape: &Shape, perm: &[usize], out: &mut [f32]) {
    let dims = a_shape.as_slice();
    let rank = dims.len();
    let mut in_strides = vec![1usize; rank];
    for i in (0..rank - 1).rev() {
        in_strides[i] = in_strides[i + 1] * dims[i + 1];
    }
    let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let mut out_strides = vec![1usize; rank];
    for i in (0..rank - 1).rev() {
        out_strides[i] = out_strides[i + 1] * out_dims[i + 1];
    }

    let total = a.len();
    let mut idx = vec![0usize; rank];
    for flat in 0..total {
        let mut rem = flat;
        for i in 0..rank {
            idx[i] = rem / in_strides[i];
            rem %= in_strides[i];
        }
        let mut out_flat = 0usize;
        for (out_axis, &src_axis) in perm.iter().enumerate() {
            out_flat += idx[src_axis] * out_strides[out_axis];
        }
        out[out_flat] = a[flat];
    }
}

fn concat(inputs: &[&[f32]], shapes: &[&Shape], axis: usize, out: &mut [f32]) {
    let rank = shapes[0].ndim();
    let outer: usize = shapes[0].as_slice()[..axis].iter().product();
    let inner: usize = shapes[0].as_slice()[axis + 1..].iter().product();
    let axis_sizes: Vec<usize> = shapes.iter().map(|s| s.as_slice()[axis]).collect();
    let total_axis: usize = axis_sizes.iter().sum();
    let _ = rank;

    for o in 0..outer {
        let mut axis_offset = 0;
        for (input, &axis_size) in inputs.iter().zip(&axis_sizes) {
            let src_start = o * axis_size * inner;
            let dst_start = o * total_axis * inner + axis_offset * inner;
            out[dst_start..dst_start + axis_size * inner].copy_from_slice(&input[src_start..src_start + axis_size * inner]);
            axis_offset += axis_size;
        }
    }
}

fn elementwise(op: &ElementwiseOp, inputs: &[&[f32]], shapes: &[&Shape], out: &mut [f32]) {
    match op {
        ElementwiseOp::Exp => {
            for (o, &x) in out.iter_mut().zip(inputs[0]) {
                *o = x.exp();
            }
        }
        ElementwiseOp::Log => {
            for (o, &x) in out.iter_mut().zip(inputs[0]) {
                *o = x.ln();
            }
        }
        ElementwiseOp::Neg => {
            for (o, &x) in out.iter_mut().zip(inputs[0]) {
                *o = -x;
            }
        }
        ElementwiseOp::Sub => row_broadcast(inputs[0], shapes[0], inputs[1], out, |a, b| a - b),
        ElementwiseOp::DivRow => row_broadcast(inputs[0], shapes[0], inputs[1], out, |a, b| a / b),
        ElementwiseOp::RecipSqrt { eps } => {
            for (o, &x) in out.iter_mut().zip(inputs[0]) {
                *o = 1.0 / (x + eps).sqrt();
            }
        }
        ElementwiseOp::ScalarMul { scalar } => {
            for (o, &x) in out.iter_mut().zip(inputs[0]) {
                *o = x * scalar;
            }
        }
    }
}

fn row_broadcast(full: &[f32], full_shape: &Shape, row: &[f32], out: &mut [f32], f: impl Fn(f32, f32) -> f32) {
    let c = *full_shape.as_slice().last().unwrap();
    for (i, chunk) in out.chunks_mut(c).enumerate() {
        let src = &full[i * c..(i + 1) * c];
        let scalar = row[i];
        for j in 0..c {
            chunk[j] = f(src[j], scalar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_identity() {
        let a = [1.0f32, 0.0, 0.0, 1.0];
        let b = [5.0f32, 6.0, 7.0, 8.0];
        let mut out = [0.0f32; 4];
        let shape = Shape::new(vec![2, 2]);
        matmul(&a, &shape, &b, &shape, &mut out);
        assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn reduce_sum_is_left_to_right() {
        let a = [1e10f32, 1.0, -1e10];
        let shape = Shape::new(vec![1, 3]);
        let mut out = [0.0f32; 1];
        reduce_last_axis(&a, &shape, &mut out, ReduceKind::Sum);
        // (1e10 + 1.0) rounds back to 1e10 in f32, then subtracting 1e10
        // gives 0.0 — this exact value is the point of the test, not an
        // approximation.
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn bias_add_broadcasts_across_rows() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let shape = Shape::new(vec![2, 2]);
        let bias = [10.0f32, 20.0];
        let mut out = [0.0f32; 4];
        bias_add(&a, &shape, &bias, &mut out);
        assert_eq!(out, [11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn transpose_2d_matches_manual() {
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let shape = Shape::new(vec![2, 3]);
        let mut out = [0.0f32; 6];
        transpose(&a, &shape, &[1, 0], &mut out);
        assert_eq!(out, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
