//! Native ABI surface, exercised the way an out-of-process host would
//! (opaque handles, raw buffer pointers, out-parameters).

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use vectoria::abi::*;
use vectoria::ir::Graph;
use vectoria::DType;

#[test]
fn layernorm_graph_round_trips_through_the_c_surface() {
    let graph = vectoria_graph_create();

    let x_name = CString::new("x").unwrap();
    let gamma_name = CString::new("gamma").unwrap();
    let beta_name = CString::new("beta").unwrap();

    let row_shape = [1i64, 4i64];
    let vec_shape = [4i64];

    let x = vectoria_graph_add_input(graph, x_name.as_ptr(), row_shape.as_ptr(), 2, DType::F32.wire_value());
    let gamma = vectoria_graph_add_parameter(graph, gamma_name.as_ptr(), vec_shape.as_ptr(), 1, DType::F32.wire_value());
    let beta = vectoria_graph_add_parameter(graph, beta_name.as_ptr(), vec_shape.as_ptr(), 1, DType::F32.wire_value());
    assert!(x >= 0 && gamma >= 0 && beta >= 0);

    let out = vectoria_graph_add_layernorm(graph, x, gamma, beta);
    assert!(out >= 0);
    assert_eq!(vectoria_graph_set_output(graph, out), 0);

    let engine = vectoria_engine_create(graph as *const Graph);
    vectoria_engine_compile(engine);

    let x_ptr = vectoria_engine_get_buffer(engine, x) as *mut f32;
    let gamma_ptr = vectoria_engine_get_buffer(engine, gamma) as *mut f32;
    let beta_ptr = vectoria_engine_get_buffer(engine, beta) as *mut f32;
    assert!(!x_ptr.is_null() && !gamma_ptr.is_null() && !beta_ptr.is_null());

    unsafe {
        std::ptr::copy_nonoverlapping([7.0f32, 7.0, 7.0, 7.0].as_ptr(), x_ptr, 4);
        std::ptr::copy_nonoverlapping([1.0f32, 1.0, 1.0, 1.0].as_ptr(), gamma_ptr, 4);
        std::ptr::copy_nonoverlapping([0.1f32, 0.2, 0.3, 0.4].as_ptr(), beta_ptr, 4);
    }

    vectoria_engine_execute(engine);

    let out_ptr = vectoria_engine_get_buffer(engine, out) as *const f32;
    let result = unsafe { std::slice::from_raw_parts(out_ptr, 4) };
    for (got, want) in result.iter().zip([0.1f32, 0.2, 0.3, 0.4]) {
        assert!((got - want).abs() < 1e-3, "{got} vs {want}");
    }

    vectoria_engine_destroy(engine);
    vectoria_graph_destroy(graph);
}

#[test]
fn invalid_node_id_reports_failure_without_panicking() {
    let graph = vectoria_graph_create();
    let result = vectoria_graph_add_op_relu(graph, 99);
    assert_eq!(result, -1);
    vectoria_graph_destroy(graph);
}

#[test]
fn trace_events_are_readable_after_execute() {
    let graph = vectoria_graph_create();
    let name = CString::new("x").unwrap();
    let shape = [8i64];
    let x = vectoria_graph_add_input(graph, name.as_ptr(), shape.as_ptr(), 1, DType::F32.wire_value());
    let out = vectoria_graph_add_op_relu(graph, x);
    vectoria_graph_set_output(graph, out);

    let engine = vectoria_engine_create(graph as *const Graph);
    vectoria_engine_compile(engine);
    let ptr = vectoria_engine_get_buffer(engine, x) as *mut f32;
    unsafe { std::ptr::copy_nonoverlapping([1.0f32; 8].as_ptr(), ptr, 8) };
    vectoria_engine_execute(engine);

    let count = vectoria_engine_get_trace_size(engine);
    assert!(count > 0);

    let mut kind = -1;
    let mut ts = 0u64;
    let mut node = -1i64;
    let mut buf = [0u8; 64];
    vectoria_engine_get_trace_event(engine, 0, &mut kind, &mut ts, &mut node, buf.as_mut_ptr() as *mut c_char, buf.len());
    assert!(kind >= 0);
    let _ = unsafe { CStr::from_ptr(buf.as_ptr() as *const c_char) };

    vectoria_engine_destroy(engine);
    vectoria_graph_destroy(graph);
}

#[test]
fn capabilities_probe_reports_a_known_architecture() {
    let mut arch = -1;
    let mut compiled = -1;
    let mut supported = -1;
    let mut name_buf = [0u8; 64];
    vectoria_get_capabilities(&mut arch, &mut compiled, &mut supported, name_buf.as_mut_ptr() as *mut c_char, name_buf.len());
    assert!((0..=2).contains(&arch));
    let name = unsafe { CStr::from_ptr(name_buf.as_ptr() as *const c_char) }.to_str().unwrap();
    assert!(!name.is_empty());
}
