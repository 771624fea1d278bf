//! Solver and problem configuration, validation, and error types.
//!
//! Every solver is built from a plain config struct plus the buffer store
//! its variables live in. `validate()` checks parameter ranges before any
//! buffer is resolved; the solver constructors call it themselves.

use std::error::Error;
use std::fmt;

use kairos_core::{GraphError, NodeId, StoreError};

use crate::coefficients::MAX_ORDER;
use crate::output::OutputSink;
use crate::solver::TimeIntegrator;
use crate::timestep::{ConstantDt, StepSizeController};
use crate::variable::VariableSpec;

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while validating configuration or wiring a problem.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// A parameter is out of range.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// Graph resolution failed.
    Graph(GraphError),
    /// A named buffer could not be resolved.
    Store(StoreError),
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter { name, reason } => write!(f, "invalid {name}: {reason}"),
            Self::Graph(e) => write!(f, "graph: {e}"),
            Self::Store(e) => write!(f, "buffer store: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::InvalidParameter { .. } => None,
        }
    }
}

impl From<GraphError> for ConfigError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<StoreError> for ConfigError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            name,
            format!("must be finite and positive, got {value}"),
        ))
    }
}

fn check_substeps(substeps: u32) -> Result<(), ConfigError> {
    if substeps == 0 {
        return Err(ConfigError::invalid("substeps", "must be at least 1"));
    }
    Ok(())
}

fn check_variables(variables: &[VariableSpec]) -> Result<(), ConfigError> {
    if variables.is_empty() {
        return Err(ConfigError::invalid("variables", "no variables to integrate"));
    }
    Ok(())
}

// ── AdamsConfig ────────────────────────────────────────────────────

/// One off-diagonal entry `L_ij` of a coupled linear operator.
#[derive(Clone, Debug, PartialEq)]
pub struct OffDiagonal {
    /// Row (equation) index into the variable list.
    pub row: usize,
    /// Column (unknown) index into the variable list.
    pub col: usize,
    /// Buffer holding the coefficients in reciprocal space.
    pub buffer: String,
}

/// Dense coupling between variables' linear operators.
///
/// With coupling configured, the implicit-linear part is solved as one
/// `N×N` system per grid point instead of `N` scalar divisions. Diagonal
/// entries come from each variable's own linear buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CouplingConfig {
    /// Off-diagonal operator buffers.
    pub off_diagonal: Vec<OffDiagonal>,
    /// Mirror `(i, j)` into `(j, i)` when `(j, i)` is not given.
    pub assume_symmetric: bool,
}

/// Configuration for [`AdamsBashforthMoulton`](crate::adams::AdamsBashforthMoulton).
#[derive(Clone, Debug)]
pub struct AdamsConfig {
    /// Integrated variables.
    pub variables: Vec<VariableSpec>,
    /// Sub-steps per outer step. Default: 1.
    pub substeps: u32,
    /// Adams–Bashforth predictor order, `1..=5`. Default: 2.
    pub predictor_order: usize,
    /// Adams–Moulton corrector order, `1..=5`. Default: 2.
    pub corrector_order: usize,
    /// Corrector passes per sub-step; 0 disables the corrector. Default: 0.
    pub corrector_steps: usize,
    /// Dense coupling of the linear operators. Default: none.
    pub coupling: Option<CouplingConfig>,
    /// `(target, source)` buffers copied after every root execution.
    pub forward: Vec<(String, String)>,
}

impl Default for AdamsConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            substeps: 1,
            predictor_order: 2,
            corrector_order: 2,
            corrector_steps: 0,
            coupling: None,
            forward: Vec::new(),
        }
    }
}

impl AdamsConfig {
    /// History depth to request on each nonlinear buffer.
    pub fn history_depth(&self) -> usize {
        let predictor = self.predictor_order.saturating_sub(1);
        let corrector = if self.corrector_steps > 0 {
            self.corrector_order.saturating_sub(2)
        } else {
            0
        };
        predictor.max(corrector)
    }

    /// Check parameter ranges and coupling indices.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_variables(&self.variables)?;
        check_substeps(self.substeps)?;
        for (name, order) in [
            ("predictor_order", self.predictor_order),
            ("corrector_order", self.corrector_order),
        ] {
            if !(1..=MAX_ORDER).contains(&order) {
                return Err(ConfigError::invalid(
                    name,
                    format!("must be in 1..={MAX_ORDER}, got {order}"),
                ));
            }
        }
        if let Some(coupling) = &self.coupling {
            let n = self.variables.len();
            for entry in &coupling.off_diagonal {
                if entry.row >= n || entry.col >= n {
                    return Err(ConfigError::invalid(
                        "coupling",
                        format!(
                            "entry ({}, {}) out of range for {n} variables",
                            entry.row, entry.col
                        ),
                    ));
                }
                if entry.row == entry.col {
                    return Err(ConfigError::invalid(
                        "coupling",
                        format!(
                            "diagonal entry ({0}, {0}) belongs in the variable's linear buffer",
                            entry.row
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ── Iterative solvers ──────────────────────────────────────────────

/// Stopping rules and step damping for quasi-Newton iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationLimits {
    /// Iteration cap per sub-step. Default: 20.
    pub max_iterations: u32,
    /// Converged when `‖R‖ / ‖R₀‖` falls below this. Default: 1e-9.
    pub relative_tolerance: f64,
    /// Converged when `‖R‖` falls below this. Default: 1e-9.
    pub absolute_tolerance: f64,
    /// Scale applied to every update step, in `(0, 1]`. Default: 1.0.
    pub damping: f64,
    /// Abort once `‖R‖` exceeds this multiple of `‖R₀‖`. Default: 1e6.
    pub divergence_limit: f64,
}

impl Default for IterationLimits {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            relative_tolerance: 1e-9,
            absolute_tolerance: 1e-9,
            damping: 1.0,
            divergence_limit: 1e6,
        }
    }
}

impl IterationLimits {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("max_iterations", "must be at least 1"));
        }
        check_positive("relative_tolerance", self.relative_tolerance)?;
        check_positive("absolute_tolerance", self.absolute_tolerance)?;
        check_positive("divergence_limit", self.divergence_limit)?;
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(ConfigError::invalid(
                "damping",
                format!("must be in (0, 1], got {}", self.damping),
            ));
        }
        Ok(())
    }
}

/// Configuration for [`BroydenSolver`](crate::broyden::BroydenSolver).
#[derive(Clone, Debug)]
pub struct BroydenConfig {
    /// Integrated variables; may be coupled through their nonlinear terms.
    pub variables: Vec<VariableSpec>,
    /// Sub-steps per outer step. Default: 1.
    pub substeps: u32,
    /// Stopping rules.
    pub limits: IterationLimits,
    /// `(target, source)` buffers copied after every root execution.
    pub forward: Vec<(String, String)>,
}

impl Default for BroydenConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            substeps: 1,
            limits: IterationLimits::default(),
            forward: Vec::new(),
        }
    }
}

impl BroydenConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_variables(&self.variables)?;
        check_substeps(self.substeps)?;
        self.limits.validate()
    }
}

/// Configuration for [`SecantSolver`](crate::secant::SecantSolver).
#[derive(Clone, Debug)]
pub struct SecantConfig {
    /// Integrated variables. The secant estimate is per variable, so
    /// strongly coupled variables converge slowly; prefer Broyden there.
    pub variables: Vec<VariableSpec>,
    /// Sub-steps per outer step. Default: 1.
    pub substeps: u32,
    /// Stopping rules.
    pub limits: IterationLimits,
    /// `(target, source)` buffers copied after every root execution.
    pub forward: Vec<(String, String)>,
}

impl Default for SecantConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            substeps: 1,
            limits: IterationLimits {
                max_iterations: 30,
                ..IterationLimits::default()
            },
            forward: Vec::new(),
        }
    }
}

impl SecantConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_variables(&self.variables)?;
        check_substeps(self.substeps)?;
        self.limits.validate()
    }
}

// ── Explicit solvers ───────────────────────────────────────────────

/// Configuration for [`ForwardEuler`](crate::explicit::ForwardEuler).
#[derive(Clone, Debug)]
pub struct ForwardEulerConfig {
    /// Integrated variables; `nonlinear` is the time derivative.
    pub variables: Vec<VariableSpec>,
    /// Sub-steps per outer step. Default: 1.
    pub substeps: u32,
    /// `(target, source)` buffers copied after every root execution.
    pub forward: Vec<(String, String)>,
}

impl Default for ForwardEulerConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            substeps: 1,
            forward: Vec::new(),
        }
    }
}

impl ForwardEulerConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_variables(&self.variables)?;
        check_substeps(self.substeps)
    }
}

/// Configuration for [`RungeKuttaChebyshev`](crate::explicit::RungeKuttaChebyshev).
#[derive(Clone, Debug)]
pub struct ChebyshevConfig {
    /// Integrated variables; `nonlinear` is the time derivative.
    pub variables: Vec<VariableSpec>,
    /// Sub-steps per outer step. Default: 1.
    pub substeps: u32,
    /// Stages per sub-step. One stage is forward Euler; `s` stages extend
    /// the real stability interval to about `2s²`. Default: 4.
    pub stages: u32,
    /// Damping ε, shrinking the stability interval slightly in exchange
    /// for a margin against neutral modes. Default: 0.05.
    pub damping: f64,
    /// `(target, source)` buffers copied after every root execution.
    pub forward: Vec<(String, String)>,
}

impl Default for ChebyshevConfig {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            substeps: 1,
            stages: 4,
            damping: 0.05,
            forward: Vec::new(),
        }
    }
}

impl ChebyshevConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_variables(&self.variables)?;
        check_substeps(self.substeps)?;
        if self.stages == 0 {
            return Err(ConfigError::invalid("stages", "must be at least 1"));
        }
        if !(self.damping.is_finite() && self.damping >= 0.0) {
            return Err(ConfigError::invalid(
                "damping",
                format!("must be finite and non-negative, got {}", self.damping),
            ));
        }
        Ok(())
    }
}

// ── AdaptiveDtConfig ───────────────────────────────────────────────

/// Configuration for [`IterationAdaptiveDt`](crate::timestep::IterationAdaptiveDt).
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveDtConfig {
    /// Initial step size.
    pub dt: f64,
    /// Smallest step a cutback may produce. Default: 1e-12.
    pub dt_min: f64,
    /// Largest step growth may produce. Default: unbounded.
    pub dt_max: f64,
    /// Grow when a step took fewer iterations than this. Default: 3.
    pub min_iterations: u32,
    /// Shrink when a step took more iterations than this. Default: 10.
    pub max_iterations: u32,
    /// Growth factor for easy steps. Default: 2.0.
    pub growth_factor: f64,
    /// Shrink factor for hard steps. Default: 0.5.
    pub cutback_factor: f64,
    /// Shrink factor when a step fails outright. Default: 0.5.
    pub cutback_factor_at_failure: f64,
}

impl Default for AdaptiveDtConfig {
    fn default() -> Self {
        Self {
            dt: 1e-3,
            dt_min: 1e-12,
            dt_max: f64::INFINITY,
            min_iterations: 3,
            max_iterations: 10,
            growth_factor: 2.0,
            cutback_factor: 0.5,
            cutback_factor_at_failure: 0.5,
        }
    }
}

impl AdaptiveDtConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("dt", self.dt)?;
        check_positive("dt_min", self.dt_min)?;
        if !(self.dt_max > 0.0) {
            return Err(ConfigError::invalid("dt_max", "must be positive"));
        }
        if self.dt_min > self.dt_max {
            return Err(ConfigError::invalid(
                "dt_min",
                format!("{} exceeds dt_max {}", self.dt_min, self.dt_max),
            ));
        }
        if self.min_iterations > self.max_iterations {
            return Err(ConfigError::invalid(
                "min_iterations",
                format!(
                    "{} exceeds max_iterations {}",
                    self.min_iterations, self.max_iterations
                ),
            ));
        }
        if !(self.growth_factor.is_finite() && self.growth_factor >= 1.0) {
            return Err(ConfigError::invalid("growth_factor", "must be at least 1"));
        }
        for (name, factor) in [
            ("cutback_factor", self.cutback_factor),
            ("cutback_factor_at_failure", self.cutback_factor_at_failure),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(ConfigError::invalid(
                    name,
                    format!("must be in (0, 1), got {factor}"),
                ));
            }
        }
        Ok(())
    }
}

// ── ProblemConfig ──────────────────────────────────────────────────

/// Builder input for [`Problem`](crate::problem::Problem).
///
/// Node ids refer to the [`ComputeGraph`](kairos_graph::ComputeGraph)
/// handed to [`Problem::new`](crate::problem::Problem::new).
pub struct ProblemConfig {
    /// Node executed by the solver, usually a group.
    pub root: NodeId,
    /// Node run once before the first step to set initial conditions.
    pub initial: Option<NodeId>,
    /// Node run after every successful solve.
    pub postprocess: Option<NodeId>,
    /// Time integrator. `None` executes `root` once per step.
    pub solver: Option<Box<dyn TimeIntegrator>>,
    /// Step size policy.
    pub time_step: Box<dyn StepSizeController>,
    /// Simulation start time. Default: 0.
    pub start_time: f64,
    /// Buffers mirrored and handed to the sink after every step.
    pub outputs: Vec<String>,
    /// Consumer of output frames, fed from a background thread.
    pub sink: Option<Box<dyn OutputSink>>,
    /// Require every requested buffer to be defined before a node runs.
    pub checked: bool,
    /// Retries of one outer step after recoverable failures. Default: 8.
    pub max_retries: u32,
}

impl ProblemConfig {
    /// Minimal config: execute `root` with a constant step `dt`.
    pub fn new(root: NodeId, dt: f64) -> Self {
        Self {
            root,
            initial: None,
            postprocess: None,
            solver: None,
            time_step: Box::new(ConstantDt::new(dt)),
            start_time: 0.0,
            outputs: Vec::new(),
            sink: None,
            checked: false,
            max_retries: 8,
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("dt", self.time_step.initial_dt())?;
        if !self.start_time.is_finite() {
            return Err(ConfigError::invalid("start_time", "must be finite"));
        }
        if !self.outputs.is_empty() && self.sink.is_none() {
            return Err(ConfigError::invalid(
                "outputs",
                "output buffers configured without a sink",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ProblemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemConfig")
            .field("root", &self.root)
            .field("initial", &self.initial)
            .field("postprocess", &self.postprocess)
            .field("solver", &self.solver.as_ref().map(|s| s.name().to_owned()))
            .field("start_time", &self.start_time)
            .field("outputs", &self.outputs)
            .field("checked", &self.checked)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_variable() -> Vec<VariableSpec> {
        vec![VariableSpec::new("u", "u_hat", "n_hat")]
    }

    #[test]
    fn adams_defaults_are_valid() {
        let cfg = AdamsConfig {
            variables: one_variable(),
            ..AdamsConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.history_depth(), 1);
    }

    #[test]
    fn adams_order_out_of_range() {
        let cfg = AdamsConfig {
            variables: one_variable(),
            predictor_order: 6,
            ..AdamsConfig::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidParameter { name, .. }) => assert_eq!(name, "predictor_order"),
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
    }

    #[test]
    fn history_depth_covers_active_corrector() {
        let cfg = AdamsConfig {
            variables: one_variable(),
            predictor_order: 2,
            corrector_order: 5,
            corrector_steps: 1,
            ..AdamsConfig::default()
        };
        assert_eq!(cfg.history_depth(), 3);
        let inactive = AdamsConfig {
            corrector_steps: 0,
            ..cfg
        };
        assert_eq!(inactive.history_depth(), 1);
    }

    #[test]
    fn coupling_indices_checked() {
        let cfg = AdamsConfig {
            variables: one_variable(),
            coupling: Some(CouplingConfig {
                off_diagonal: vec![OffDiagonal {
                    row: 0,
                    col: 1,
                    buffer: "l01".into(),
                }],
                assume_symmetric: false,
            }),
            ..AdamsConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidParameter { name: "coupling", .. })
        ));
    }

    #[test]
    fn no_variables_rejected() {
        assert!(BroydenConfig::default().validate().is_err());
        assert!(SecantConfig::default().validate().is_err());
    }

    #[test]
    fn damping_range_enforced() {
        let limits = IterationLimits {
            damping: 0.0,
            ..IterationLimits::default()
        };
        assert!(limits.validate().is_err());
        let limits = IterationLimits {
            damping: 0.5,
            ..IterationLimits::default()
        };
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn chebyshev_needs_a_stage() {
        let cfg = ChebyshevConfig {
            variables: one_variable(),
            stages: 0,
            ..ChebyshevConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn adaptive_dt_bounds_checked() {
        assert!(AdaptiveDtConfig::default().validate().is_ok());
        let cfg = AdaptiveDtConfig {
            dt_min: 1.0,
            dt_max: 0.5,
            ..AdaptiveDtConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = AdaptiveDtConfig {
            cutback_factor: 1.5,
            ..AdaptiveDtConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn problem_outputs_need_a_sink() {
        let mut cfg = ProblemConfig::new(NodeId(0), 0.1);
        assert!(cfg.validate().is_ok());
        cfg.outputs.push("u".into());
        assert!(cfg.validate().is_err());
        let bad_dt = ProblemConfig::new(NodeId(0), -1.0);
        assert!(bad_dt.validate().is_err());
    }

    #[test]
    fn error_display_names_parameter() {
        let e = ConfigError::InvalidParameter {
            name: "substeps",
            reason: "must be at least 1".into(),
        };
        assert_eq!(e.to_string(), "invalid substeps: must be at least 1");
    }
}
