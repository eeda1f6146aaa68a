// Conformance harness: run the gated RNN eagerly and through the VM on the
// same random inputs, and check the results agree element-wise.
//
// The model is captured once; each trial draws a fresh random input, runs
// both paths, prints the worst discrepancy, and asserts the tolerance.

use tracing::info;

use vole::frontend::import;
use vole::nn::{GatedRnn, Module};
use vole::testing::{assert_allclose, max_abs_diff};
use vole::vm::VmExecutor;
use vole::{DType, Result, Tensor};

const SEQ_LEN: usize = 10;
const BATCH: usize = 10;
const FEATURES: usize = 4;
const TRIALS: usize = 5;
const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-5;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let rnn = GatedRnn::new(FEATURES, FEATURES, DType::F32)?;
    info!(
        params = rnn.num_parameters(),
        "built gated RNN ({FEATURES} -> {FEATURES})"
    );

    let (program, params) = import(&rnn, "X", (SEQ_LEN, BATCH, FEATURES))?;
    let vm = VmExecutor::compile(&program)?;
    if let Some(stats) = vm.stats("main") {
        info!(%stats, "compiled entry graph");
    }

    for trial in 1..=TRIALS {
        let xs = Tensor::rand((SEQ_LEN, BATCH, FEATURES), DType::F32)?;
        let expected = rnn.forward(&xs)?;

        let mut bindings = params.clone();
        bindings.insert("X".to_string(), xs);
        let actual = vm.evaluate(&bindings)?;

        let diff = max_abs_diff(&actual, &expected)?;
        println!("trial {trial}/{TRIALS}: max abs discrepancy = {diff:e}");
        assert_allclose(&actual, &expected, RTOL, ATOL);
    }

    println!("all {TRIALS} trials within rtol={RTOL:e}, atol={ATOL:e}");
    Ok(())
}
