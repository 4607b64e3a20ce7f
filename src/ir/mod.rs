//! Immutable-once-frozen intermediate representation (spec §4.1).
//!
//! A [`Graph`] is built incrementally through its `add_*` methods, each of
//! which validates shapes/dtypes against the nodes already present and
//! returns a [`NodeId`] the caller threads into later calls. Builder state
//! lives behind a mutex rather than requiring `&mut self` so the same handle
//! can be driven from the native ABI, where callers hold only an opaque
//! pointer. [`Graph::freeze`] flips an atomic flag that turns every further
//! `add_*`/`set_output` call into `Err(VectoriaError::GraphFrozen)`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{VectoriaError, VectoriaResult};
use crate::types::{DType, NodeId, Shape};

/// The handful of ops a kernel actually dispatches on. Composite ops never
/// reach this enum directly — the expander rewrites them into sub-DAGs built
/// entirely from these kinds before scheduling.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveOp {
    MatMul,
    BiasAdd,
    Relu,
    Add,
    Mul,
    ReduceSum,
    ReduceMax,
    Transpose { perm: Vec<usize> },
    Reshape { target_shape: Shape },
    Concat { axis: usize },
    Elementwise(ElementwiseOp),
}

/// Unary and scalar-parameterized elementwise kinds. Kept as a closed set
/// distinct from [`PrimitiveOp`]'s binary/structural members because every
/// kernel variant for these shares one dispatch shape (one tensor in, one
/// tensor out, no shape change).
#[derive(Debug, Clone, PartialEq)]
pub enum ElementwiseOp {
    Exp,
    Log,
    Neg,
    /// `a - b`, `b` broadcast across `a`'s last axis when `b`'s shape is
    /// `a`'s shape with the last axis dropped (the shape a `ReduceMax` or
    /// `ReduceSum` over that axis leaves behind).
    Sub,
    /// `a / b` under the same row-broadcast rule as `Sub`.
    DivRow,
    /// `1 / sqrt(x + eps)`. `eps` is carried on the op rather than folded
    /// into a separate add because there is no standalone scalar-add
    /// primitive; this mirrors how `Transpose`/`Reshape`/`Concat` already
    /// carry their own attributes.
    RecipSqrt { eps: f32 },
    /// Multiply every element by a compile-time scalar baked in at
    /// expansion time (`1/n` for a mean, `1/sqrt(d_k)` for attention
    /// scaling).
    ScalarMul { scalar: f32 },
}

/// A node in the graph. `Op` carries its already-validated output shape and
/// dtype so downstream consumers (the expander, the scheduler, the arena
/// planner) never need to re-run shape inference.
#[derive(Debug, Clone)]
pub enum Node {
    Input {
        name: String,
        shape: Shape,
        dtype: DType,
    },
    Parameter {
        name: String,
        shape: Shape,
        dtype: DType,
    },
    Op {
        op: OpKind,
        inputs: Vec<NodeId>,
        shape: Shape,
        dtype: DType,
    },
    /// Emitted by the expander in place of an expanded composite node so
    /// that any reference to the composite's original id transparently
    /// resolves to the primitive node that actually produces the value.
    Alias { target: NodeId },
}

impl Node {
    pub fn shape(&self) -> &Shape {
        match self {
            Node::Input { shape, .. } => shape,
            Node::Parameter { shape, .. } => shape,
            Node::Op { shape, .. } => shape,
            Node::Alias { .. } => panic!("Alias nodes have no shape of their own; resolve first"),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Node::Input { dtype, .. } => *dtype,
            Node::Parameter { dtype, .. } => *dtype,
            Node::Op { dtype, .. } => *dtype,
            Node::Alias { .. } => panic!("Alias nodes have no dtype of their own; resolve first"),
        }
    }
}

/// The full op vocabulary a user-facing builder call can append: primitives
/// plus the composite ops the expander is responsible for lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Primitive(PrimitiveOp),
    Softmax,
    SoftmaxStable,
    LogSoftmax,
    CrossEntropy,
    LayerNorm { eps: f32 },
    Attention,
    MultiHeadAttention { num_heads: usize },
    TransformerEncoder { num_heads: usize, eps: f32 },
}

struct GraphState {
    nodes: Vec<Node>,
    output: Option<NodeId>,
}

/// The builder and, post-[`Graph::freeze`], the immutable artifact the
/// expander and scheduler consume. Exposed as `&self` throughout (rather
/// than `&mut self`) so the native ABI can drive it through a shared opaque
/// handle.
pub struct Graph {
    state: Mutex<GraphState>,
    frozen: AtomicBool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            state: Mutex::new(GraphState {
                nodes: Vec::new(),
                output: None,
            }),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> VectoriaResult<()> {
        if self.is_frozen() {
            Err(VectoriaError::GraphFrozen)
        } else {
            Ok(())
        }
    }

    pub fn add_input(&self, name: impl Into<String>, shape: Shape, dtype: DType) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let id = NodeId(state.nodes.len() as u32);
        state.nodes.push(Node::Input { name: name.into(), shape, dtype });
        Ok(id)
    }

    pub fn add_parameter(&self, name: impl Into<String>, shape: Shape, dtype: DType) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let id = NodeId(state.nodes.len() as u32);
        state.nodes.push(Node::Parameter { name: name.into(), shape, dtype });
        Ok(id)
    }

    /// Every caller of `add_op*` already has an in-bounds `NodeId` from an
    /// earlier call on the same graph (ids are assigned by insertion order
    /// and never reused), so [`VectoriaError::UnknownNode`] only fires for
    /// a genuinely stale id from another graph.
    fn node(&self, state: &GraphState, id: NodeId) -> VectoriaResult<Node> {
        state
            .nodes
            .get(id.index())
            .cloned()
            .ok_or(VectoriaError::UnknownNode(id))
    }

    fn push_op(&self, state: &mut GraphState, op: OpKind, inputs: Vec<NodeId>, shape: Shape, dtype: DType) -> NodeId {
        let id = NodeId(state.nodes.len() as u32);
        state.nodes.push(Node::Op { op, inputs, shape, dtype });
        id
    }

    pub fn add_op_matmul(&self, lhs: NodeId, rhs: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, lhs)?;
        let b = self.node(&state, rhs)?;
        let shape = matmul_shape(a.shape(), b.shape())?;
        if a.dtype() != b.dtype() {
            return Err(VectoriaError::DTypeMismatch {
                expected: format!("{:?}", a.dtype()),
                found: format!("{:?}", b.dtype()),
            });
        }
        let dtype = a.dtype();
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::MatMul), vec![lhs, rhs], shape, dtype))
    }

    pub fn add_op_bias_add(&self, input: NodeId, bias: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        let b = self.node(&state, bias)?;
        check_column_broadcast(a.shape(), b.shape())?;
        let shape = a.shape().clone();
        let dtype = a.dtype();
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::BiasAdd), vec![input, bias], shape, dtype))
    }

    pub fn add_op_relu(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Relu), vec![input], shape, dtype))
    }

    pub fn add_op_add(&self, lhs: NodeId, rhs: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, lhs)?;
        let b = self.node(&state, rhs)?;
        require_same_shape(a.shape(), b.shape())?;
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Add), vec![lhs, rhs], shape, dtype))
    }

    /// `Mul` accepts same-shape operands or either of `BiasAdd`'s
    /// column-broadcast shape or the row-broadcast shape `Sub`/`DivRow` use
    /// (`rhs` equal to `lhs` with its last axis dropped). Both broadcast
    /// forms are needed to lower `LayerNorm`'s `γ · normalized` (column) and
    /// `centered * centered` (same-shape); see DESIGN.md.
    pub fn add_op_mul(&self, lhs: NodeId, rhs: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, lhs)?;
        let b = self.node(&state, rhs)?;
        if a.shape() != b.shape() && check_column_broadcast(a.shape(), b.shape()).is_err() && check_row_broadcast(a.shape(), b.shape()).is_err() {
            return Err(VectoriaError::ShapeMismatch {
                expected: a.shape().as_slice().to_vec(),
                found: b.shape().as_slice().to_vec(),
            });
        }
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Mul), vec![lhs, rhs], shape, dtype))
    }

    pub fn add_op_reduce_sum(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_reduce(input, PrimitiveOp::ReduceSum)
    }

    pub fn add_op_reduce_max(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_reduce(input, PrimitiveOp::ReduceMax)
    }

    fn add_reduce(&self, input: NodeId, op: PrimitiveOp) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        if a.shape().ndim() == 0 {
            return Err(VectoriaError::InvalidAxis { axis: -1, rank: 0 });
        }
        let shape = Shape::new(a.shape().as_slice()[..a.shape().ndim() - 1].to_vec());
        let dtype = a.dtype();
        Ok(self.push_op(&mut state, OpKind::Primitive(op), vec![input], shape, dtype))
    }

    pub fn add_op_transpose(&self, input: NodeId, perm: Vec<usize>) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        let rank = a.shape().ndim();
        if perm.len() != rank || !is_permutation(&perm, rank) {
            return Err(VectoriaError::InvalidPerm { perm, rank });
        }
        let dims = a.shape().as_slice();
        let shape = Shape::new(perm.iter().map(|&i| dims[i]).collect::<Vec<_>>());
        let dtype = a.dtype();
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Transpose { perm }), vec![input], shape, dtype))
    }

    pub fn add_op_reshape(&self, input: NodeId, target_shape: Shape) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        if a.shape().size() != target_shape.size() {
            return Err(VectoriaError::ShapeMismatch {
                expected: a.shape().as_slice().to_vec(),
                found: target_shape.as_slice().to_vec(),
            });
        }
        let dtype = a.dtype();
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Reshape { target_shape: target_shape.clone() }), vec![input], target_shape, dtype))
    }

    pub fn add_op_concat(&self, inputs: Vec<NodeId>, axis: usize) -> VectoriaResult<NodeId> {
        self.check_open()?;
        if inputs.is_empty() {
            return Err(VectoriaError::InternalExpansionError("concat requires at least one input".into()));
        }
        let mut state = self.state.lock().unwrap();
        let nodes: Vec<Node> = inputs.iter().map(|&id| self.node(&state, id)).collect::<VectoriaResult<_>>()?;
        let rank = nodes[0].shape().ndim();
        if axis >= rank {
            return Err(VectoriaError::InvalidAxis { axis: axis as i64, rank });
        }
        let mut out_dims = nodes[0].shape().as_slice().to_vec();
        let mut axis_total = 0usize;
        for n in &nodes {
            let dims = n.shape().as_slice();
            if dims.len() != rank {
                return Err(VectoriaError::ShapeMismatch { expected: out_dims.clone(), found: dims.to_vec() });
            }
            for (i, (&d, &o)) in dims.iter().zip(out_dims.iter()).enumerate() {
                if i != axis && d != o {
                    return Err(VectoriaError::ShapeMismatch { expected: out_dims.clone(), found: dims.to_vec() });
                }
            }
            axis_total += dims[axis];
        }
        out_dims[axis] = axis_total;
        let dtype = nodes[0].dtype();
        let shape = Shape::new(out_dims);
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Concat { axis }), inputs, shape, dtype))
    }

    fn add_op_elementwise_unary(&self, input: NodeId, op: ElementwiseOp) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Elementwise(op)), vec![input], shape, dtype))
    }

    pub fn add_op_exp(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_op_elementwise_unary(input, ElementwiseOp::Exp)
    }

    pub fn add_op_log(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_op_elementwise_unary(input, ElementwiseOp::Log)
    }

    pub fn add_op_neg(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_op_elementwise_unary(input, ElementwiseOp::Neg)
    }

    pub fn add_op_scalar_mul(&self, input: NodeId, scalar: f32) -> VectoriaResult<NodeId> {
        self.add_op_elementwise_unary(input, ElementwiseOp::ScalarMul { scalar })
    }

    pub fn add_op_recip_sqrt(&self, input: NodeId, eps: f32) -> VectoriaResult<NodeId> {
        self.add_op_elementwise_unary(input, ElementwiseOp::RecipSqrt { eps })
    }

    fn add_op_row_broadcast(&self, full: NodeId, row: NodeId, op: ElementwiseOp) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, full)?;
        let b = self.node(&state, row)?;
        check_row_broadcast(a.shape(), b.shape())?;
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, OpKind::Primitive(PrimitiveOp::Elementwise(op)), vec![full, row], shape, dtype))
    }

    pub fn add_op_sub(&self, full: NodeId, row: NodeId) -> VectoriaResult<NodeId> {
        self.add_op_row_broadcast(full, row, ElementwiseOp::Sub)
    }

    pub fn add_op_div_row(&self, full: NodeId, row: NodeId) -> VectoriaResult<NodeId> {
        self.add_op_row_broadcast(full, row, ElementwiseOp::DivRow)
    }

    pub fn add_op_softmax(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_composite_unary(input, OpKind::Softmax)
    }

    pub fn add_op_softmax_stable(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_composite_unary(input, OpKind::SoftmaxStable)
    }

    pub fn add_op_log_softmax(&self, input: NodeId) -> VectoriaResult<NodeId> {
        self.add_composite_unary(input, OpKind::LogSoftmax)
    }

    fn add_composite_unary(&self, input: NodeId, op: OpKind) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, op, vec![input], shape, dtype))
    }

    pub fn add_op_cross_entropy(&self, logits: NodeId, target: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, logits)?;
        let b = self.node(&state, target)?;
        require_same_shape(a.shape(), b.shape())?;
        if a.shape().ndim() == 0 {
            return Err(VectoriaError::InvalidAxis { axis: -1, rank: 0 });
        }
        let shape = Shape::new(a.shape().as_slice()[..a.shape().ndim() - 1].to_vec());
        let dtype = a.dtype();
        Ok(self.push_op(&mut state, OpKind::CrossEntropy, vec![logits, target], shape, dtype))
    }

    pub fn add_op_layer_norm(&self, input: NodeId, gamma: NodeId, beta: NodeId, eps: f32) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let a = self.node(&state, input)?;
        let g = self.node(&state, gamma)?;
        let b = self.node(&state, beta)?;
        check_column_broadcast(a.shape(), g.shape())?;
        check_column_broadcast(a.shape(), b.shape())?;
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        Ok(self.push_op(&mut state, OpKind::LayerNorm { eps }, vec![input, gamma, beta], shape, dtype))
    }

    pub fn add_op_attention(&self, q: NodeId, k: NodeId, v: NodeId) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let qn = self.node(&state, q)?;
        let kn = self.node(&state, k)?;
        let vn = self.node(&state, v)?;
        if qn.shape() != kn.shape() {
            return Err(VectoriaError::ShapeMismatch {
                expected: qn.shape().as_slice().to_vec(),
                found: kn.shape().as_slice().to_vec(),
            });
        }
        let dims = qn.shape().as_slice();
        if dims.len() != 2 {
            return Err(VectoriaError::InvalidAxis { axis: -1, rank: dims.len() });
        }
        let t = dims[0];
        let dk_v = vn.shape().as_slice();
        if dk_v.len() != 2 || dk_v[0] != t {
            return Err(VectoriaError::ShapeMismatch { expected: vec![t, dk_v.get(1).copied().unwrap_or(0)], found: dk_v.to_vec() });
        }
        let shape = Shape::new(vec![t, dk_v[1]]);
        let dtype = qn.dtype();
        Ok(self.push_op(&mut state, OpKind::Attention, vec![q, k, v], shape, dtype))
    }

    pub fn add_op_multi_head_attention(
        &self,
        x: NodeId,
        wq: NodeId,
        wk: NodeId,
        wv: NodeId,
        wo: NodeId,
        num_heads: usize,
    ) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let xn = self.node(&state, x)?;
        let dims = xn.shape().as_slice();
        if dims.len() != 2 {
            return Err(VectoriaError::InvalidAxis { axis: -1, rank: dims.len() });
        }
        let (t, d_model) = (dims[0], dims[1]);
        if d_model % num_heads != 0 {
            return Err(VectoriaError::DivisorMismatch { d_model, num_heads });
        }
        for w in [wq, wk, wv, wo] {
            let wn = self.node(&state, w)?;
            if wn.shape().as_slice() != [d_model, d_model] {
                return Err(VectoriaError::ShapeMismatch {
                    expected: vec![d_model, d_model],
                    found: wn.shape().as_slice().to_vec(),
                });
            }
        }
        let dtype = xn.dtype();
        let shape = Shape::new(vec![t, d_model]);
        Ok(self.push_op(&mut state, OpKind::MultiHeadAttention { num_heads }, vec![x, wq, wk, wv, wo], shape, dtype))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_op_transformer_encoder(
        &self,
        x: NodeId,
        wq: NodeId,
        wk: NodeId,
        wv: NodeId,
        wo: NodeId,
        gamma1: NodeId,
        beta1: NodeId,
        w_ff1: NodeId,
        b_ff1: NodeId,
        w_ff2: NodeId,
        b_ff2: NodeId,
        gamma2: NodeId,
        beta2: NodeId,
        num_heads: usize,
        eps: f32,
    ) -> VectoriaResult<NodeId> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let xn = self.node(&state, x)?;
        let dims = xn.shape().as_slice();
        if dims.len() != 2 {
            return Err(VectoriaError::InvalidAxis { axis: -1, rank: dims.len() });
        }
        let (t, d_model) = (dims[0], dims[1]);
        if d_model % num_heads != 0 {
            return Err(VectoriaError::DivisorMismatch { d_model, num_heads });
        }
        let w_ff1_n = self.node(&state, w_ff1)?;
        let d_ff = *w_ff1_n.shape().as_slice().get(1).unwrap_or(&0);
        if w_ff1_n.shape().as_slice() != [d_model, d_ff] {
            return Err(VectoriaError::ShapeMismatch { expected: vec![d_model, d_ff], found: w_ff1_n.shape().as_slice().to_vec() });
        }
        let w_ff2_n = self.node(&state, w_ff2)?;
        if w_ff2_n.shape().as_slice() != [d_ff, d_model] {
            return Err(VectoriaError::ShapeMismatch { expected: vec![d_ff, d_model], found: w_ff2_n.shape().as_slice().to_vec() });
        }
        let dtype = xn.dtype();
        let shape = Shape::new(vec![t, d_model]);
        let inputs = vec![
            x, wq, wk, wv, wo, gamma1, beta1, w_ff1, b_ff1, w_ff2, b_ff2, gamma2, beta2,
        ];
        Ok(self.push_op(&mut state, OpKind::TransformerEncoder { num_heads, eps }, inputs, shape, dtype))
    }

    pub fn set_output(&self, node: NodeId) -> VectoriaResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let _ = self.node(&state, node)?;
        state.output = Some(node);
        Ok(())
    }

    pub fn output(&self) -> VectoriaResult<NodeId> {
        self.state.lock().unwrap().output.ok_or(VectoriaError::NoOutput)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state.lock().unwrap().nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn require_same_shape(a: &Shape, b: &Shape) -> VectoriaResult<()> {
    if a != b {
        return Err(VectoriaError::ShapeMismatch {
            expected: a.as_slice().to_vec(),
            found: b.as_slice().to_vec(),
        });
    }
    Ok(())
}

/// `b` must equal `a` with the last axis dropped — the shape a `ReduceSum`
/// or `ReduceMax` over `a`'s last axis leaves behind.
fn check_row_broadcast(a: &Shape, b: &Shape) -> VectoriaResult<()> {
    let ad = a.as_slice();
    if ad.is_empty() || &ad[..ad.len() - 1] != b.as_slice() {
        return Err(VectoriaError::ShapeMismatch {
            expected: ad.get(..ad.len().saturating_sub(1)).unwrap_or(&[]).to_vec(),
            found: b.as_slice().to_vec(),
        });
    }
    Ok(())
}

/// `b` must be `[C]` or `[1, C]` where `C` is `a`'s last dimension (the
/// `BiasAdd`/layer-norm-affine broadcast shape).
fn check_column_broadcast(a: &Shape, b: &Shape) -> VectoriaResult<()> {
    let ad = a.as_slice();
    let c = *ad.last().unwrap_or(&0);
    let bd = b.as_slice();
    let ok = bd == [c] || bd == [1, c];
    if !ok {
        return Err(VectoriaError::ShapeMismatch { expected: vec![c], found: bd.to_vec() });
    }
    Ok(())
}

fn is_permutation(perm: &[usize], rank: usize) -> bool {
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

/// Supports plain 2-D matmul, a batched 3-D matmul where the leading axis
/// matches on both operands, and a 3-D-by-2-D matmul that broadcasts a
/// shared weight matrix across the batch axis — the minimum needed to
/// express multi-head attention's per-head matmuls without a dedicated
/// batch primitive. See DESIGN.md.
fn matmul_shape(a: &Shape, b: &Shape) -> VectoriaResult<Shape> {
    let ad = a.as_slice();
    let bd = b.as_slice();
    match (ad.len(), bd.len()) {
        (2, 2) => {
            if ad[1] != bd[0] {
                return Err(VectoriaError::ShapeMismatch { expected: vec![ad[1]], found: vec![bd[0]] });
            }
            Ok(Shape::new(vec![ad[0], bd[1]]))
        }
        (3, 3) => {
            if ad[0] != bd[0] || ad[2] != bd[1] {
                return Err(VectoriaError::ShapeMismatch { expected: ad.to_vec(), found: bd.to_vec() });
            }
            Ok(Shape::new(vec![ad[0], ad[1], bd[2]]))
        }
        (3, 2) => {
            if ad[2] != bd[0] {
                return Err(VectoriaError::ShapeMismatch { expected: vec![ad[2]], found: vec![bd[0]] });
            }
            Ok(Shape::new(vec![ad[0], ad[1], bd[1]]))
        }
        _ => Err(VectoriaError::ShapeMismatch { expected: ad.to_vec(), found: bd.to_vec() }),
    }
}
