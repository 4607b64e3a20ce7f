//! Engine facade: compile, execute, read back buffers (spec §4.7).
//!
//! `compile()` is idempotent — calling it twice just re-runs expansion,
//! scheduling and arena planning and replaces the previous plan, emitting a
//! fresh `GraphCompilation` event rather than erroring. `execute()` is not
//! reentrant: it requires `&mut self` so two threads can never drive the
//! same dispatch loop over the same arena concurrently, matching the
//! single-arena design in §5.

use tracing::instrument;

use crate::capabilities::{self, CapabilitySnapshot};
use crate::config::EngineConfig;
use crate::error::{VectoriaError, VectoriaResult};
use crate::expander::{self, ExpandedGraph};
use crate::ir::{Graph, Node, PrimitiveOp};
use crate::kernels::{self, Variant};
use crate::scheduler::{self, arena, Schedule};
use crate::trace::{EventKind, Trace, TraceEvent};
use crate::types::NodeId;

struct CompiledPlan {
    expanded: ExpandedGraph,
    schedule: Schedule,
    arena: arena::ArenaPlan,
}

pub struct Engine {
    config: EngineConfig,
    capabilities: CapabilitySnapshot,
    plan: Option<CompiledPlan>,
    buffers: Vec<f32>,
    trace: Trace,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            config: EngineConfig::from_env(),
            capabilities: capabilities::capabilities(),
            plan: None,
            buffers: Vec::new(),
            trace: Trace::with_capacity(4),
        }
    }

    #[instrument(skip(self, graph), level = "debug")]
    pub fn compile(&mut self, graph: &Graph) -> VectoriaResult<()> {
        graph.freeze();
        let expanded = expander::expand(graph)?;
        let sched = scheduler::schedule(&expanded.nodes);
        let arena_plan = arena::plan(&expanded.nodes, &sched, expanded.output);

        let capacity = Trace::capacity_for_schedule_len(sched.as_slice().len(), self.config.trace_capacity_hint);
        let mut trace = Trace::with_capacity(capacity);
        trace.record(EventKind::GraphCompilation, None, None, format!("{} nodes, {} scheduled", expanded.nodes.len(), sched.as_slice().len()));

        self.buffers = vec![0.0f32; arena_plan.total_bytes / std::mem::size_of::<f32>()];
        for (i, &is_pinned) in arena_plan.pinned.iter().enumerate() {
            if is_pinned {
                let slot = arena_plan.slots[i];
                trace.record(
                    EventKind::MemoryAllocation,
                    Some(NodeId(i as u32)),
                    None,
                    format!("{}", slot.len),
                );
            }
        }

        self.trace = trace;
        self.plan = Some(CompiledPlan { expanded, schedule: sched, arena: arena_plan });
        Ok(())
    }

    /// Writes an `Input`/`Parameter` node's initial value into its pinned
    /// arena slot. Must be called after `compile()` for every input the
    /// graph declares before the first `execute()`.
    pub fn set_buffer(&mut self, node: NodeId, values: &[f32]) -> VectoriaResult<()> {
        let plan = self.plan.as_ref().ok_or(VectoriaError::NotCompiled)?;
        let slot = plan.arena.slots[node.index()];
        let elems = slot.len / std::mem::size_of::<f32>();
        if values.len() != elems {
            return Err(VectoriaError::ShapeMismatch { expected: vec![elems], found: vec![values.len()] });
        }
        let start = slot.offset / std::mem::size_of::<f32>();
        self.buffers[start..start + elems].copy_from_slice(values);
        Ok(())
    }

    pub fn buffer(&self, node: NodeId) -> VectoriaResult<&[f32]> {
        let plan = self.plan.as_ref().ok_or(VectoriaError::NotCompiled)?;
        let node = resolve_alias(&plan.expanded.nodes, node);
        let slot = plan.arena.slots[node.index()];
        let start = slot.offset / std::mem::size_of::<f32>();
        let elems = slot.len / std::mem::size_of::<f32>();
        Ok(&self.buffers[start..start + elems])
    }

    /// Raw pointer into the arena slot backing `node`, for callers across
    /// the native ABI boundary that need to read/write it directly without
    /// going through `set_buffer`/`buffer` on every element. Valid until
    /// the next `compile()` call, which replaces `self.buffers` wholesale.
    pub fn buffer_ptr_mut(&mut self, node: NodeId) -> VectoriaResult<*mut f32> {
        let plan = self.plan.as_ref().ok_or(VectoriaError::NotCompiled)?;
        let node = resolve_alias(&plan.expanded.nodes, node);
        let start = plan.arena.slots[node.index()].offset / std::mem::size_of::<f32>();
        Ok(unsafe { self.buffers.as_mut_ptr().add(start) })
    }

    #[instrument(skip(self), level = "debug")]
    pub fn execute(&mut self) -> VectoriaResult<()> {
        self.trace.clear_execution_events();

        let CompiledPlan { expanded, schedule, arena: arena_plan } = self.plan.as_ref().ok_or(VectoriaError::NotCompiled)?;

        for &id in schedule.as_slice() {
            let i = id.index();
            let Node::Op { op, inputs, shape, dtype } = &expanded.nodes[i] else {
                continue;
            };

            self.trace.record(EventKind::NodeExecutionStart, Some(id), None, String::new());

            let variant = kernels::select_variant(op, *dtype, shape, self.capabilities);
            let input_ids = inputs.iter().map(|n| n.0.to_string()).collect::<Vec<_>>().join(",");
            let detail = format!("{} | Inputs: [{input_ids}]", variant.spec_name());
            self.trace.record(EventKind::KernelDispatch, Some(id), Some(variant), detail);

            dispatch_kernel(id, op, inputs, &expanded.nodes, arena_plan, &mut self.buffers, variant);

            self.trace.record(EventKind::NodeExecutionEnd, Some(id), None, String::new());
        }
        Ok(())
    }

    pub fn trace_events(&self) -> &[TraceEvent] {
        self.trace.events()
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.capabilities
    }
}

fn resolve_alias(nodes: &[Node], mut id: NodeId) -> NodeId {
    loop {
        match &nodes[id.index()] {
            Node::Alias { target } => id = *target,
            _ => return id,
        }
    }
}

/// Runs one node's kernel in place in the shared arena.
///
/// # Safety
/// The arena plan guarantees a node's output slot never overlaps any slot
/// still live when the node executes — in particular never one of its own
/// inputs' slots, since an input is only freed once *this* node (its last
/// consumer) has already run. Reading the input slices and writing the
/// output slice therefore never alias, even though the borrow checker
/// cannot see that from one `&mut [f32]` arena.
fn dispatch_kernel(
    id: NodeId,
    op: &PrimitiveOp,
    inputs: &[NodeId],
    nodes: &[Node],
    arena_plan: &arena::ArenaPlan,
    buffers: &mut [f32],
    variant: Variant,
) {
    let input_shapes: Vec<&crate::types::Shape> = inputs.iter().map(|&id| nodes[id.index()].shape()).collect();
    let input_slots: Vec<arena::BufferSlot> = inputs.iter().map(|&id| arena_plan.slots[id.index()]).collect();
    let output_slot = arena_plan.slots[id.index()];

    let base = buffers.as_mut_ptr();
    let input_bufs: Vec<&[f32]> = input_slots
        .iter()
        .map(|slot| {
            let start = slot.offset / std::mem::size_of::<f32>();
            let elems = slot.len / std::mem::size_of::<f32>();
            unsafe { std::slice::from_raw_parts(base.add(start), elems) }
        })
        .collect();

    let out_start = output_slot.offset / std::mem::size_of::<f32>();
    let out_elems = output_slot.len / std::mem::size_of::<f32>();
    let out = unsafe { std::slice::from_raw_parts_mut(base.add(out_start), out_elems) };

    match variant {
        Variant::Reference => crate::kernels::reference::execute(op, &input_bufs, &input_shapes, out),
        Variant::SimdAvx2 => crate::kernels::simd::execute_avx2(op, &input_bufs, &input_shapes, out),
        Variant::SimdNeon => crate::kernels::simd::execute_neon(op, &input_bufs, &input_shapes, out),
    }
}
