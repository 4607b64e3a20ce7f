//! Native C ABI (spec §4.8).
//!
//! Mirrors the handle-based surface the Python `Runtime`/`capabilities`
//! bindings call through `ctypes`: opaque `vectoria_graph_*`/`vectoria_engine_*`
//! handles, `c_int` node ids with `-1` meaning "operation failed", and a
//! handful of out-parameters for the trace reader and the capability probe.
//! Every exported symbol here owns its own panic boundary — a builder
//! error (bad shape, frozen graph, unknown node) is reported as `-1`
//! rather than unwinding across the FFI edge, since Rust panics unwinding
//! into C call frames are undefined behavior.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use crate::capabilities;
use crate::engine::Engine;
use crate::ir::Graph;
use crate::trace::EventKind;
use crate::types::{DType, NodeId, Shape};

/// `LayerNorm`'s ABI entry point carries no `eps` argument (see the Python
/// ctypes signature this mirrors), so it is baked in here rather than
/// threaded through from the caller.
const DEFAULT_LAYER_NORM_EPS: f32 = 1e-5;

const INVALID_NODE: c_int = -1;

pub struct EngineHandle {
    graph: *const Graph,
    engine: Mutex<Engine>,
}

fn catch_abi<F: FnOnce() -> c_int>(f: F) -> c_int {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(INVALID_NODE)
}

fn node_id(raw: c_int) -> Option<NodeId> {
    if raw < 0 {
        None
    } else {
        Some(NodeId(raw as u32))
    }
}

fn shape_from_raw(dims: *const i64, ndim: c_int) -> Shape {
    if dims.is_null() || ndim <= 0 {
        return Shape::new(Vec::new());
    }
    let slice = unsafe { std::slice::from_raw_parts(dims, ndim as usize) };
    Shape::new(slice.iter().map(|&d| d as usize).collect::<Vec<usize>>())
}

unsafe fn graph_ref<'a>(graph: *const Graph) -> &'a Graph {
    &*graph
}

// ---------------------------------------------------------------------
// Graph lifecycle
// ---------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vectoria_graph_create() -> *mut Graph {
    Box::into_raw(Box::new(Graph::new()))
}

#[no_mangle]
pub extern "C" fn vectoria_graph_destroy(graph: *mut Graph) {
    if !graph.is_null() {
        drop(unsafe { Box::from_raw(graph) });
    }
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_input(
    graph: *mut Graph,
    name: *const c_char,
    shape: *const i64,
    ndim: c_int,
    dtype: c_int,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        let dtype = DType::from_wire_value(dtype).unwrap_or(DType::F32);
        match g.add_input(name, shape_from_raw(shape, ndim), dtype) {
            Ok(id) => id.0 as c_int,
            Err(_) => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_parameter(
    graph: *mut Graph,
    name: *const c_char,
    shape: *const i64,
    ndim: c_int,
    dtype: c_int,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        let dtype = DType::from_wire_value(dtype).unwrap_or(DType::F32);
        match g.add_parameter(name, shape_from_raw(shape, ndim), dtype) {
            Ok(id) => id.0 as c_int,
            Err(_) => INVALID_NODE,
        }
    })
}

// ---------------------------------------------------------------------
// Primitive ops
// ---------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_matmul(graph: *mut Graph, lhs: c_int, rhs: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(lhs), node_id(rhs)) {
            (Some(a), Some(b)) => g.add_op_matmul(a, b).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_bias_add(graph: *mut Graph, input: c_int, bias: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(input), node_id(bias)) {
            (Some(a), Some(b)) => g.add_op_bias_add(a, b).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_relu(graph: *mut Graph, input: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(input) {
            Some(a) => g.add_op_relu(a).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_add(graph: *mut Graph, lhs: c_int, rhs: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(lhs), node_id(rhs)) {
            (Some(a), Some(b)) => g.add_op_add(a, b).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_mul(graph: *mut Graph, lhs: c_int, rhs: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(lhs), node_id(rhs)) {
            (Some(a), Some(b)) => g.add_op_mul(a, b).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_reduce_sum(graph: *mut Graph, input: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(input) {
            Some(a) => g.add_op_reduce_sum(a).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_reduce_max(graph: *mut Graph, input: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(input) {
            Some(a) => g.add_op_reduce_max(a).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_transpose(
    graph: *mut Graph,
    input: c_int,
    perm: *const i64,
    perm_len: c_int,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let Some(a) = node_id(input) else { return INVALID_NODE };
        let perm_vec = unsafe { std::slice::from_raw_parts(perm, perm_len as usize) }
            .iter()
            .map(|&p| p as usize)
            .collect::<Vec<usize>>();
        g.add_op_transpose(a, perm_vec).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE)
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_reshape(
    graph: *mut Graph,
    input: c_int,
    target_shape: *const i64,
    ndim: c_int,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let Some(a) = node_id(input) else { return INVALID_NODE };
        g.add_op_reshape(a, shape_from_raw(target_shape, ndim)).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE)
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_op_concat(
    graph: *mut Graph,
    inputs: *const c_int,
    num_inputs: c_int,
    axis: i64,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let raw = unsafe { std::slice::from_raw_parts(inputs, num_inputs as usize) };
        let Some(ids) = raw.iter().map(|&r| node_id(r)).collect::<Option<Vec<NodeId>>>() else {
            return INVALID_NODE;
        };
        g.add_op_concat(ids, axis as usize).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE)
    })
}

// ---------------------------------------------------------------------
// Composite ops
// ---------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vectoria_graph_add_softmax(graph: *mut Graph, input: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(input) {
            Some(a) => g.add_op_softmax(a).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_softmax_stable(graph: *mut Graph, input: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(input) {
            Some(a) => g.add_op_softmax_stable(a).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_logsoftmax(graph: *mut Graph, input: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(input) {
            Some(a) => g.add_op_log_softmax(a).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_crossentropy(graph: *mut Graph, logits: c_int, target: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(logits), node_id(target)) {
            (Some(a), Some(b)) => g.add_op_cross_entropy(a, b).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_attention(graph: *mut Graph, q: c_int, k: c_int, v: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(q), node_id(k), node_id(v)) {
            (Some(q), Some(k), Some(v)) => g.add_op_attention(q, k, v).map(|n| n.0 as c_int).unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn vectoria_graph_add_multi_head_attention(
    graph: *mut Graph,
    x: c_int,
    wq: c_int,
    wk: c_int,
    wv: c_int,
    wo: c_int,
    num_heads: c_int,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let ids = [x, wq, wk, wv, wo].map(node_id);
        let [Some(x), Some(wq), Some(wk), Some(wv), Some(wo)] = ids else {
            return INVALID_NODE;
        };
        g.add_op_multi_head_attention(x, wq, wk, wv, wo, num_heads as usize)
            .map(|n| n.0 as c_int)
            .unwrap_or(INVALID_NODE)
    })
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn vectoria_graph_add_transformer_encoder(
    graph: *mut Graph,
    x: c_int,
    wq: c_int,
    wk: c_int,
    wv: c_int,
    wo: c_int,
    num_heads: c_int,
    gamma1: c_int,
    beta1: c_int,
    w_ff1: c_int,
    b_ff1: c_int,
    w_ff2: c_int,
    b_ff2: c_int,
    gamma2: c_int,
    beta2: c_int,
) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        let raw = [x, wq, wk, wv, wo, gamma1, beta1, w_ff1, b_ff1, w_ff2, b_ff2, gamma2, beta2];
        let Some(ids) = raw.iter().map(|&r| node_id(r)).collect::<Option<Vec<NodeId>>>() else {
            return INVALID_NODE;
        };
        let Ok(arr) = TryInto::<[NodeId; 13]>::try_into(ids) else {
            return INVALID_NODE;
        };
        let [x, wq, wk, wv, wo, gamma1, beta1, w_ff1, b_ff1, w_ff2, b_ff2, gamma2, beta2] = arr;
        g.add_op_transformer_encoder(
            x, wq, wk, wv, wo, gamma1, beta1, w_ff1, b_ff1, w_ff2, b_ff2, gamma2, beta2, num_heads as usize,
            DEFAULT_LAYER_NORM_EPS,
        )
        .map(|n| n.0 as c_int)
        .unwrap_or(INVALID_NODE)
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_add_layernorm(graph: *mut Graph, input: c_int, gamma: c_int, beta: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match (node_id(input), node_id(gamma), node_id(beta)) {
            (Some(x), Some(gamma), Some(beta)) => g
                .add_op_layer_norm(x, gamma, beta, DEFAULT_LAYER_NORM_EPS)
                .map(|n| n.0 as c_int)
                .unwrap_or(INVALID_NODE),
            _ => INVALID_NODE,
        }
    })
}

#[no_mangle]
pub extern "C" fn vectoria_graph_set_output(graph: *mut Graph, node: c_int) -> c_int {
    catch_abi(|| {
        let g = unsafe { graph_ref(graph) };
        match node_id(node) {
            Some(id) => g.set_output(id).map(|_| 0).unwrap_or(INVALID_NODE),
            None => INVALID_NODE,
        }
    })
}

// ---------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vectoria_engine_create(graph: *const Graph) -> *mut EngineHandle {
    Box::into_raw(Box::new(EngineHandle { graph, engine: Mutex::new(Engine::new()) }))
}

#[no_mangle]
pub extern "C" fn vectoria_engine_destroy(engine: *mut EngineHandle) {
    if !engine.is_null() {
        drop(unsafe { Box::from_raw(engine) });
    }
}

#[no_mangle]
pub extern "C" fn vectoria_engine_compile(engine: *mut EngineHandle) {
    let _ = catch_abi(|| {
        let handle = unsafe { &*engine };
        let graph = unsafe { graph_ref(handle.graph) };
        let mut e = handle.engine.lock().unwrap();
        match e.compile(graph) {
            Ok(()) => 0,
            Err(_) => INVALID_NODE,
        }
    });
}

#[no_mangle]
pub extern "C" fn vectoria_engine_execute(engine: *mut EngineHandle) {
    let _ = catch_abi(|| {
        let handle = unsafe { &*engine };
        let mut e = handle.engine.lock().unwrap();
        match e.execute() {
            Ok(()) => 0,
            Err(_) => INVALID_NODE,
        }
    });
}

#[no_mangle]
pub extern "C" fn vectoria_engine_get_buffer(engine: *mut EngineHandle, node: c_int) -> *mut c_void {
    let handle = unsafe { &*engine };
    let Some(id) = node_id(node) else { return std::ptr::null_mut() };
    let mut e = handle.engine.lock().unwrap();
    match e.buffer_ptr_mut(id) {
        Ok(ptr) => ptr as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn vectoria_engine_get_trace_size(engine: *mut EngineHandle) -> usize {
    let handle = unsafe { &*engine };
    let e = handle.engine.lock().unwrap();
    e.trace_events().len()
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn vectoria_engine_get_trace_event(
    engine: *mut EngineHandle,
    index: usize,
    kind_out: *mut c_int,
    timestamp_out: *mut u64,
    node_out: *mut i64,
    detail_buf: *mut c_char,
    detail_buf_len: usize,
) {
    let handle = unsafe { &*engine };
    let e = handle.engine.lock().unwrap();
    let Some(event) = e.trace_events().get(index) else { return };

    let kind = match event.kind {
        EventKind::GraphCompilation => 0,
        EventKind::MemoryAllocation => 1,
        EventKind::NodeExecutionStart => 2,
        EventKind::NodeExecutionEnd => 3,
        EventKind::KernelDispatch => 4,
    };
    unsafe {
        if !kind_out.is_null() {
            *kind_out = kind;
        }
        if !timestamp_out.is_null() {
            *timestamp_out = event.timestamp_nanos;
        }
        if !node_out.is_null() {
            *node_out = event.node.map(|n| n.0 as i64).unwrap_or(-1);
        }
    }
    write_c_string(&event.detail, detail_buf, detail_buf_len);
}

fn write_c_string(s: &str, buf: *mut c_char, buf_len: usize) {
    if buf.is_null() || buf_len == 0 {
        return;
    }
    let Ok(cstr) = CString::new(s) else { return };
    let bytes = cstr.as_bytes_with_nul();
    let n = bytes.len().min(buf_len);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buf, n);
        if n == buf_len {
            *buf.add(buf_len - 1) = 0;
        }
    }
}

// ---------------------------------------------------------------------
// Capability probe
// ---------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vectoria_get_capabilities(
    arch_out: *mut c_int,
    compiled_out: *mut c_int,
    supported_out: *mut c_int,
    name_buf: *mut c_char,
    name_buf_len: usize,
) {
    let snap = capabilities::capabilities();
    unsafe {
        if !arch_out.is_null() {
            *arch_out = snap.arch.wire_value();
        }
        if !compiled_out.is_null() {
            *compiled_out = snap.simd_compiled as c_int;
        }
        if !supported_out.is_null() {
            *supported_out = snap.simd_supported as c_int;
        }
    }
    write_c_string(snap.arch.name(), name_buf, name_buf_len);
}
