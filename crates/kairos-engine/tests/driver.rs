//! Integration test: the problem driver's retry, stability and output paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kairos_core::{BufferHandle, BufferSet, NodeError, NodeId, SolveError, Tensor};
use kairos_engine::{
    AdamsBashforthMoulton, AdamsConfig, AdaptiveDtConfig, ChebyshevConfig, ForwardEuler, ForwardEulerConfig, IterationAdaptiveDt,
    OutputFrame, OutputSink, Problem, ProblemConfig, ProblemError, RungeKuttaChebyshev, SinkError,
    SolveEnv, SolveReport, TimeIntegrator, VariableSpec,
};
use kairos_graph::{ComputeGraph, ComputeGroup, ComputeNode, ExecContext};
use kairos_store::BufferStore;
use kairos_test_utils::{CopyNode, IdentityDomain, PointwiseRhsNode, TransformNode};

/// Executes the root once, but only for steps no larger than `limit`.
struct StepLimited {
    limit: f64,
    attempts: Arc<AtomicUsize>,
}

impl TimeIntegrator for StepLimited {
    fn name(&self) -> &str {
        "step-limited"
    }

    fn execute(&mut self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        // Scribble first so a restore is observable.
        let x = env.store.handle("x")?;
        env.store.get_mut(x)?.fill(f64::NAN);
        if env.dt > self.limit {
            return Err(SolveError::NotConverged {
                solver: self.name().into(),
                iterations: 3,
                residual: 1.0,
            });
        }
        env.store.get_mut(x)?.fill(env.time + env.dt);
        env.graph
            .execute(env.root, env.store, env.domain, env.time, env.dt)?;
        Ok(SolveReport {
            substeps: 1,
            iterations: 1,
            ..SolveReport::default()
        })
    }
}

fn copy_graph() -> (BufferStore, ComputeGraph, NodeId) {
    let mut store = BufferStore::new();
    store.register_with("x", Tensor::filled(&[2], 0.0)).unwrap();
    let mut graph = ComputeGraph::new();
    let root = graph
        .add_node(Box::new(CopyNode::new("copy", &mut store, "x", "y")))
        .unwrap();
    (store, graph, root)
}

fn limited(limit: f64, adaptive: AdaptiveDtConfig) -> (Problem, Arc<AtomicUsize>) {
    let (store, graph, root) = copy_graph();
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut config = ProblemConfig::new(root, adaptive.dt);
    config.solver = Some(Box::new(StepLimited {
        limit,
        attempts: Arc::clone(&attempts),
    }));
    config.time_step = Box::new(IterationAdaptiveDt::new(adaptive).unwrap());
    let problem = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[2]))).unwrap();
    (problem, attempts)
}

fn x(problem: &Problem) -> f64 {
    let h = problem.store().handle("x").unwrap();
    problem.store().get(h).unwrap().as_slice()[0]
}

#[test]
fn failed_steps_are_retried_smaller() {
    let (mut p, attempts) = limited(
        0.15,
        AdaptiveDtConfig {
            dt: 0.4,
            dt_min: 0.01,
            min_iterations: 0,
            ..AdaptiveDtConfig::default()
        },
    );
    let metrics = p.step().unwrap();
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.dt, 0.1);
    assert_eq!(metrics.root_executions, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(p.time(), 0.1);
    assert_eq!(x(&p), 0.1);
    assert_eq!(p.dt(), 0.1);
}

#[test]
fn growth_waits_one_step_after_cutback() {
    let (mut p, _) = limited(
        0.3,
        AdaptiveDtConfig {
            dt: 0.4,
            dt_min: 0.01,
            min_iterations: 2,
            max_iterations: 10,
            ..AdaptiveDtConfig::default()
        },
    );
    p.step().unwrap();
    assert_eq!(p.previous_dt(), Some(0.2));
    assert_eq!(p.dt(), 0.2);
    p.step().unwrap();
    assert_eq!(p.dt(), 0.4);
}

#[test]
fn cutback_below_minimum_fails_the_step() {
    let (mut p, attempts) = limited(
        0.0,
        AdaptiveDtConfig {
            dt: 0.1,
            dt_min: 0.05,
            ..AdaptiveDtConfig::default()
        },
    );
    assert_eq!(
        p.step().unwrap_err(),
        ProblemError::TimeStepTooSmall {
            dt: 0.05,
            dt_min: 0.05
        }
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(p.time(), 0.0);
    assert_eq!(p.step_count(), 0);
    assert_eq!(x(&p), 0.0);
}

#[test]
fn retries_are_capped() {
    let (store, graph, root) = copy_graph();
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut config = ProblemConfig::new(root, 1.0);
    config.solver = Some(Box::new(StepLimited {
        limit: 0.0,
        attempts: Arc::clone(&attempts),
    }));
    config.time_step = Box::new(
        IterationAdaptiveDt::new(AdaptiveDtConfig {
            dt: 1.0,
            dt_min: 1e-12,
            ..AdaptiveDtConfig::default()
        })
        .unwrap(),
    );
    config.max_retries = 3;
    let mut p = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[2]))).unwrap();
    assert!(matches!(
        p.step(),
        Err(ProblemError::Solve(SolveError::NotConverged { .. }))
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

/// `du/dt = -50·u` from `u = 1`.
fn stiff_decay(store: &mut BufferStore, graph: &mut ComputeGraph) -> NodeId {
    store.register_with("u", Tensor::filled(&[3], 1.0)).unwrap();
    graph
        .add_node(Box::new(TransformNode::new("fwd", store, "u", "u_hat")))
        .unwrap();
    graph
        .add_node(Box::new(PointwiseRhsNode::new("rhs", store, "u", "du_hat", |u| -50.0 * u)))
        .unwrap();
    graph
        .add_group(ComputeGroup::new("root", ["fwd", "rhs"]))
        .unwrap()
}

fn explicit_run(build: impl FnOnce(&mut BufferStore) -> Box<dyn TimeIntegrator>) -> f64 {
    let mut store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let root = stiff_decay(&mut store, &mut graph);
    let mut config = ProblemConfig::new(root, 0.1);
    config.solver = Some(build(&mut store));
    let mut p = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[3]))).unwrap();
    for _ in 0..10 {
        p.step().unwrap();
    }
    p.store_mut().current("u").unwrap().as_slice()[0]
}

#[test]
fn chebyshev_stages_stabilize_a_stiff_decay() {
    let variables = vec![VariableSpec::new("u", "u_hat", "du_hat")];

    let euler = explicit_run(|store| {
        let config = ForwardEulerConfig {
            variables: variables.clone(),
            ..ForwardEulerConfig::default()
        };
        Box::new(ForwardEuler::new(config, store).unwrap())
    });
    // Amplification 1 - 5 = -4 per step.
    assert!((euler - 4f64.powi(10)).abs() < 1e-6 * 4f64.powi(10));

    let chebyshev = explicit_run(|store| {
        let config = ChebyshevConfig {
            variables: variables.clone(),
            ..ChebyshevConfig::default()
        };
        Box::new(RungeKuttaChebyshev::new(config, store).unwrap())
    });
    assert!(chebyshev.abs() < 1.0);
}

#[test]
fn non_finite_explicit_state_is_a_recoverable_failure() {
    let mut store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let root = stiff_decay(&mut store, &mut graph);
    let solver = ForwardEuler::new(
        ForwardEulerConfig {
            variables: vec![VariableSpec::new("u", "u_hat", "du_hat")],
            ..ForwardEulerConfig::default()
        },
        &mut store,
    )
    .unwrap();
    let u = store.handle("u").unwrap();
    store.set(u, Tensor::filled(&[3], f64::MAX)).unwrap();
    let mut config = ProblemConfig::new(root, 0.1);
    config.solver = Some(Box::new(solver));
    let mut p = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[3]))).unwrap();
    match p.step() {
        Err(ProblemError::Solve(e)) => assert!(e.is_recoverable(), "{e}"),
        other => panic!("expected a solve error, got {other:?}"),
    }
    assert_eq!(p.store_mut().current("u").unwrap().as_slice()[0], f64::MAX);
}

/// Records `(step, time, x[0])` of every frame.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(u64, f64, f64)>>>,
}

impl OutputSink for Recorder {
    fn consume(&mut self, frame: OutputFrame) -> Result<(), SinkError> {
        let x = frame.buffers.get("x").ok_or("x missing")?.as_slice()[0];
        self.seen
            .lock()
            .map_err(|_| "poisoned")?
            .push((frame.step, frame.time, x));
        Ok(())
    }
}

#[test]
fn frames_snapshot_each_accepted_step() {
    let (store, graph, root) = copy_graph();
    let recorder = Recorder::default();
    let mut config = ProblemConfig::new(root, 0.25);
    config.solver = Some(Box::new(StepLimited {
        limit: 1.0,
        attempts: Arc::new(AtomicUsize::new(0)),
    }));
    config.outputs = vec!["x".into()];
    config.sink = Some(Box::new(recorder.clone()));
    let mut p = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[2]))).unwrap();
    assert_eq!(p.run_until(0.75).unwrap(), 3);
    p.finish().unwrap();

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        [(0, 0.0, 0.0), (1, 0.25, 0.25), (2, 0.5, 0.5), (3, 0.75, 0.75)]
    );
}

/// Post-processing node that fails on exactly one call.
struct FailsOnCall {
    output: BufferHandle,
    calls: usize,
    fail_at: usize,
}

impl ComputeNode for FailsOnCall {
    fn name(&self) -> &str {
        "post"
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::empty()
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from(["post_flag"])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        let call = self.calls;
        self.calls += 1;
        if call == self.fail_at {
            return Err(NodeError::ExecutionFailed {
                reason: format!("post failed on call {}", call + 1),
            });
        }
        ctx.write(self.output)?.fill(1.0);
        Ok(())
    }
}

#[test]
fn failed_postprocess_restarts_the_multistep_order() {
    let mut store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    store.register_with("u", Tensor::filled(&[2], 1.0)).unwrap();
    graph
        .add_node(Box::new(TransformNode::new("fwd", &mut store, "u", "u_hat")))
        .unwrap();
    graph
        .add_node(Box::new(PointwiseRhsNode::new("rhs", &mut store, "u", "n_hat", |u| -u)))
        .unwrap();
    let root = graph
        .add_group(ComputeGroup::new("root", ["fwd", "rhs"]))
        .unwrap();
    let post = graph
        .add_node(Box::new(FailsOnCall {
            output: store.handle_or_register("post_flag"),
            calls: 0,
            fail_at: 1,
        }))
        .unwrap();
    let solver = AdamsBashforthMoulton::new(
        AdamsConfig {
            variables: vec![VariableSpec::new("u", "u_hat", "n_hat")],
            predictor_order: 3,
            ..AdamsConfig::default()
        },
        &mut store,
    )
    .unwrap();
    let mut config = ProblemConfig::new(root, 0.1);
    config.solver = Some(Box::new(solver));
    config.postprocess = Some(post);
    let mut p = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[2]))).unwrap();

    assert_eq!(p.step().unwrap().predictor_lookback, [0]);
    match p.step() {
        Err(ProblemError::Node { phase, .. }) => assert_eq!(phase, "postprocess"),
        other => panic!("expected a postprocess failure, got {other:?}"),
    }
    assert_eq!(p.time(), 0.1);
    assert!((p.store_mut().current("u").unwrap().as_slice()[0] - 0.9).abs() < 1e-14);

    // The rolled-back sub-step no longer counts towards the order.
    assert_eq!(p.step().unwrap().predictor_lookback, [0]);
    assert_eq!(p.step().unwrap().predictor_lookback, [1]);
}
