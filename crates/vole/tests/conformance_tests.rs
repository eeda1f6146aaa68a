// Conformance Tests — eager and compiled execution agree on the gated RNN

use vole::frontend::import;
use vole::nn::{GatedRnn, Module};
use vole::testing::{allclose, assert_allclose, max_abs_diff};
use vole::vm::VmExecutor;
use vole::{DType, Tensor};

const SEQ_LEN: usize = 10;
const BATCH: usize = 10;
const FEATURES: usize = 4;
const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-5;

#[test]
fn test_rnn_conformance_repeated_trials() {
    let rnn = GatedRnn::new(FEATURES, FEATURES, DType::F32).unwrap();
    let (program, params) = import(&rnn, "X", (SEQ_LEN, BATCH, FEATURES)).unwrap();
    let vm = VmExecutor::compile(&program).unwrap();

    for _ in 0..5 {
        let xs = Tensor::rand((SEQ_LEN, BATCH, FEATURES), DType::F32).unwrap();
        let expected = rnn.forward(&xs).unwrap();

        let mut bindings = params.clone();
        bindings.insert("X".to_string(), xs);
        let actual = vm.evaluate(&bindings).unwrap();

        assert!(max_abs_diff(&actual, &expected).unwrap() <= ATOL + RTOL);
        assert_allclose(&actual, &expected, RTOL, ATOL);
    }
}

#[test]
fn test_rnn_conformance_fresh_model_per_trial() {
    // Re-capture with fresh random weights each trial; the agreement must
    // not depend on any particular initialization.
    for _ in 0..5 {
        let rnn = GatedRnn::new(FEATURES, FEATURES, DType::F32).unwrap();
        let (program, mut bindings) = import(&rnn, "X", (SEQ_LEN, BATCH, FEATURES)).unwrap();
        let vm = VmExecutor::compile(&program).unwrap();

        let xs = Tensor::rand((SEQ_LEN, BATCH, FEATURES), DType::F32).unwrap();
        let expected = rnn.forward(&xs).unwrap();

        bindings.insert("X".to_string(), xs);
        let actual = vm.evaluate(&bindings).unwrap();

        assert!(allclose(&actual, &expected, RTOL, ATOL).unwrap());
    }
}

#[test]
fn test_rnn_conformance_signed_inputs() {
    // Uniform [0,1) inputs mostly drive the positive branch; centered
    // inputs exercise both sides of the gate inside the scan body.
    let rnn = GatedRnn::new(FEATURES, FEATURES, DType::F32).unwrap();
    let (program, params) = import(&rnn, "X", (SEQ_LEN, BATCH, FEATURES)).unwrap();
    let vm = VmExecutor::compile(&program).unwrap();

    for _ in 0..5 {
        let xs = Tensor::rand((SEQ_LEN, BATCH, FEATURES), DType::F32)
            .unwrap()
            .affine(2.0, -1.0)
            .unwrap();
        let expected = rnn.forward(&xs).unwrap();

        let mut bindings = params.clone();
        bindings.insert("X".to_string(), xs);
        let actual = vm.evaluate(&bindings).unwrap();
        assert_allclose(&actual, &expected, RTOL, ATOL);
    }
}
