//! End-to-end scenarios 1-6 (spec §8).

use vectoria::trace::EventKind;
use vectoria::{DType, Engine, Graph, Shape};

fn approx_eq(a: &[f32], b: &[f32], atol: f32) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() <= atol, "{x} vs {y} exceeds tolerance {atol}");
    }
}

#[test]
fn scenario_1_matmul_identity() {
    let g = Graph::new();
    let x = g.add_input("x", Shape::new(vec![2, 2]), DType::F32).unwrap();
    let w = g.add_input("w", Shape::new(vec![2, 2]), DType::F32).unwrap();
    let out = g.add_op_matmul(x, w).unwrap();
    g.set_output(out).unwrap();

    let mut engine = Engine::new();
    engine.compile(&g).unwrap();
    engine.set_buffer(x, &[1.0, 0.0, 0.0, 1.0]).unwrap();
    engine.set_buffer(w, &[1.0, 0.0, 0.0, 1.0]).unwrap();
    engine.execute().unwrap();

    assert_eq!(engine.buffer(out).unwrap(), &[1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn scenario_2_linear_bias_relu() {
    let g = Graph::new();
    let x = g.add_input("x", Shape::new(vec![1, 2]), DType::F32).unwrap();
    let w = g.add_input("w", Shape::new(vec![2, 2]), DType::F32).unwrap();
    let b = g.add_input("b", Shape::new(vec![2]), DType::F32).unwrap();
    let h = g.add_op_matmul(x, w).unwrap();
    let h = g.add_op_bias_add(h, b).unwrap();
    let out = g.add_op_relu(h).unwrap();
    g.set_output(out).unwrap();

    let mut engine = Engine::new();
    engine.compile(&g).unwrap();
    engine.set_buffer(x, &[1.0, -1.0]).unwrap();
    engine.set_buffer(w, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    engine.set_buffer(b, &[1.0, 3.0]).unwrap();
    engine.execute().unwrap();

    approx_eq(engine.buffer(out).unwrap(), &[0.0, 1.0], 1e-6);
}

#[test]
fn scenario_3_softmax_of_1_2_3_dispatches_at_least_five_kernels() {
    let g = Graph::new();
    let x = g.add_input("x", Shape::new(vec![3]), DType::F32).unwrap();
    let out = g.add_op_softmax(x).unwrap();
    g.set_output(out).unwrap();

    let mut engine = Engine::new();
    engine.compile(&g).unwrap();
    engine.set_buffer(x, &[1.0, 2.0, 3.0]).unwrap();
    engine.execute().unwrap();

    approx_eq(engine.buffer(out).unwrap(), &[0.09003, 0.24473, 0.66524], 1e-5);

    let dispatch_events: Vec<_> = engine.trace_events().iter().filter(|e| e.kind == EventKind::KernelDispatch).collect();
    assert!(dispatch_events.len() >= 5, "expected >=5 KernelDispatch events from softmax expansion, found {}", dispatch_events.len());

    // External trace consumers split on "Inputs: [" and look for "simd" in
    // the lowercased detail to classify dispatch variants (spec §4.4).
    for event in &dispatch_events {
        assert!(event.detail.starts_with("Reference") || event.detail.starts_with("SIMD-"), "unexpected variant prefix in {:?}", event.detail);
        assert!(event.detail.contains("| Inputs: ["), "missing Inputs marker in {:?}", event.detail);
    }
}

#[test]
fn scenario_4_softmax_stable_of_saturated_input() {
    let g = Graph::new();
    let x = g.add_input("x", Shape::new(vec![3]), DType::F32).unwrap();
    let out = g.add_op_softmax_stable(x).unwrap();
    g.set_output(out).unwrap();

    let mut engine = Engine::new();
    engine.compile(&g).unwrap();
    engine.set_buffer(x, &[1000.0, 1000.0, 1000.0]).unwrap();
    engine.execute().unwrap();

    let third = 1.0f32 / 3.0;
    approx_eq(engine.buffer(out).unwrap(), &[third, third, third], 1e-5);
}

#[test]
fn scenario_5_layer_norm_of_standard_normal_row() {
    let g = Graph::new();
    let x = g.add_input("x", Shape::new(vec![2, 5]), DType::F32).unwrap();
    let gamma = g.add_parameter("gamma", Shape::new(vec![5]), DType::F32).unwrap();
    let beta = g.add_parameter("beta", Shape::new(vec![5]), DType::F32).unwrap();
    let out = g.add_op_layer_norm(x, gamma, beta, 1e-5).unwrap();
    g.set_output(out).unwrap();

    // A deterministic stand-in for "standard-normal row": mean ~0, spread ~1.
    let row0 = [-1.2f32, 0.5, 1.1, -0.3, -0.1];
    let row1 = [0.8f32, -0.9, 0.2, 1.3, -1.4];

    let mut engine = Engine::new();
    engine.compile(&g).unwrap();
    engine.set_buffer(x, &[row0, row1].concat()).unwrap();
    engine.set_buffer(gamma, &[1.0; 5]).unwrap();
    engine.set_buffer(beta, &[0.0; 5]).unwrap();
    engine.execute().unwrap();

    let result = engine.buffer(out).unwrap();
    for row in result.chunks(5) {
        let mean: f32 = row.iter().sum::<f32>() / 5.0;
        let var: f32 = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 5.0;
        assert!(mean.abs() < 1e-4, "row mean {mean} not close to 0");
        assert!((var - 1.0).abs() < 1e-2, "row variance {var} not close to 1");
    }
}

#[test]
fn scenario_6_attention_with_polarising_queries_and_keys() {
    let g = Graph::new();
    let q = g.add_input("q", Shape::new(vec![2, 2]), DType::F32).unwrap();
    let k = g.add_input("k", Shape::new(vec![2, 2]), DType::F32).unwrap();
    let v = g.add_input("v", Shape::new(vec![2, 2]), DType::F32).unwrap();
    let out = g.add_op_attention(q, k, v).unwrap();
    g.set_output(out).unwrap();

    let qk = [1000.0f32, 0.0, 0.0, 1000.0];
    let vv = [1.0f32, 2.0, 3.0, 4.0];

    let mut engine = Engine::new();
    engine.compile(&g).unwrap();
    engine.set_buffer(q, &qk).unwrap();
    engine.set_buffer(k, &qk).unwrap();
    engine.set_buffer(v, &vv).unwrap();
    engine.execute().unwrap();

    approx_eq(engine.buffer(out).unwrap(), &vv, 1e-5);
}
