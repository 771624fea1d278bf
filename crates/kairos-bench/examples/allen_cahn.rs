//! Allen–Cahn phase separation with output streamed off the step loop.
//!
//! Demonstrates: profile → Problem with adaptive step size → output sink
//! on the background thread → run to a fixed time. Set `RUST_LOG=debug`
//! to see every step.

use kairos_bench::allen_cahn;
use kairos_engine::{
    AdaptiveDtConfig, BroydenConfig, BroydenSolver, IterationAdaptiveDt, LinearPredictor,
    OutputFrame, OutputSink, Problem, ProblemConfig, SinkError, VariableSpec,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs the fraction of points near a well (|u| > 0.9) every tenth frame.
struct PhaseReport;

impl OutputSink for PhaseReport {
    fn consume(&mut self, frame: OutputFrame) -> Result<(), SinkError> {
        if frame.step % 10 != 0 {
            return Ok(());
        }
        let u = frame.buffers.get("u").ok_or("u is not mirrored")?;
        let separated = u.as_slice().iter().filter(|v| v.abs() > 0.9).count();
        let fraction = separated as f64 / u.len() as f64;
        info!(step = frame.step, time = frame.time, fraction, "frame");
        Ok(())
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "allen_cahn=info,kairos_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let profile = allen_cahn(512, 1e-3, 42).unwrap();
    let mut store = profile.store;

    let predictor = LinearPredictor::new(&mut store, "u", 1.0);
    let solver = BroydenSolver::new(
        BroydenConfig {
            variables: vec![VariableSpec::new("u", "u_hat", "n_hat").with_linear("l_hat")],
            ..BroydenConfig::default()
        },
        &mut store,
    )
    .unwrap()
    .with_predictor(Box::new(predictor));

    let mut config = ProblemConfig::new(profile.root, 0.05);
    config.solver = Some(Box::new(solver));
    config.time_step = Box::new(
        IterationAdaptiveDt::new(AdaptiveDtConfig {
            dt: 0.05,
            dt_min: 1e-6,
            dt_max: 0.5,
            ..AdaptiveDtConfig::default()
        })
        .unwrap(),
    );
    config.outputs = vec!["u".into()];
    config.sink = Some(Box::new(PhaseReport));

    let mut problem = Problem::new(config, store, profile.graph, Box::new(profile.domain)).unwrap();
    let steps = problem.run_until(20.0).unwrap();
    problem.finish().unwrap();

    let metrics = problem.metrics();
    info!(
        steps,
        last_dt = metrics.dt,
        iterations = metrics.iterations,
        "done"
    );
}
