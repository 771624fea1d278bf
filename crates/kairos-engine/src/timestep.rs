//! Step size policies.

use crate::config::{AdaptiveDtConfig, ConfigError};
use crate::solver::SolveReport;

/// What to do after a failed step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cutback {
    /// Retry the step with this size.
    Retry(f64),
    /// The policy does not retry.
    GiveUp,
    /// Cutting back would go below the smallest allowed step.
    BelowMinimum {
        /// The smallest allowed step.
        dt_min: f64,
    },
}

/// Chooses the size of each outer step.
pub trait StepSizeController: Send {
    /// Size of the first step.
    fn initial_dt(&self) -> f64;

    /// Size of the next step after a step of size `dt` succeeded.
    fn accepted(&mut self, dt: f64, report: &SolveReport) -> f64;

    /// Reaction to a recoverable failure of a step of size `dt`.
    fn rejected(&mut self, dt: f64) -> Cutback;
}

/// A fixed step that never retries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantDt {
    dt: f64,
}

impl ConstantDt {
    /// A constant step of size `dt`.
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }
}

impl StepSizeController for ConstantDt {
    fn initial_dt(&self) -> f64 {
        self.dt
    }

    fn accepted(&mut self, _dt: f64, _report: &SolveReport) -> f64 {
        self.dt
    }

    fn rejected(&mut self, _dt: f64) -> Cutback {
        Cutback::GiveUp
    }
}

/// Grows or shrinks the step from the iteration count of the last solve.
///
/// A step that needed fewer than `min_iterations` grows the next one, more
/// than `max_iterations` shrinks it. Growth is suppressed for the first
/// step after a cutback so a failure is not immediately repeated.
#[derive(Clone, Debug)]
pub struct IterationAdaptiveDt {
    config: AdaptiveDtConfig,
    cut_back: bool,
}

impl IterationAdaptiveDt {
    /// Validate `config` and start from `config.dt`.
    pub fn new(config: AdaptiveDtConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cut_back: false,
        })
    }

    fn clamp(&self, dt: f64) -> f64 {
        dt.clamp(self.config.dt_min, self.config.dt_max)
    }
}

impl StepSizeController for IterationAdaptiveDt {
    fn initial_dt(&self) -> f64 {
        self.clamp(self.config.dt)
    }

    fn accepted(&mut self, dt: f64, report: &SolveReport) -> f64 {
        let cfg = &self.config;
        let next = if report.iterations > cfg.max_iterations {
            dt * cfg.cutback_factor
        } else if report.iterations < cfg.min_iterations {
            if self.cut_back {
                dt
            } else {
                dt * cfg.growth_factor
            }
        } else {
            dt
        };
        self.cut_back = false;
        let next = self.clamp(next);
        if next != dt {
            tracing::debug!(dt, next, iterations = report.iterations, "step size adapted");
        }
        next
    }

    fn rejected(&mut self, dt: f64) -> Cutback {
        self.cut_back = true;
        let next = dt * self.config.cutback_factor_at_failure;
        if next < self.config.dt_min {
            return Cutback::BelowMinimum {
                dt_min: self.config.dt_min,
            };
        }
        Cutback::Retry(next.min(self.config.dt_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(iterations: u32) -> SolveReport {
        SolveReport {
            iterations,
            ..SolveReport::default()
        }
    }

    fn adaptive() -> IterationAdaptiveDt {
        IterationAdaptiveDt::new(AdaptiveDtConfig {
            dt: 0.1,
            dt_min: 0.01,
            dt_max: 0.4,
            min_iterations: 2,
            max_iterations: 6,
            ..AdaptiveDtConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn constant_never_changes() {
        let mut c = ConstantDt::new(0.5);
        assert_eq!(c.initial_dt(), 0.5);
        assert_eq!(c.accepted(0.5, &report(100)), 0.5);
        assert_eq!(c.rejected(0.5), Cutback::GiveUp);
    }

    #[test]
    fn easy_steps_grow_to_the_cap() {
        let mut c = adaptive();
        let mut dt = c.initial_dt();
        for _ in 0..5 {
            dt = c.accepted(dt, &report(1));
        }
        assert_eq!(dt, 0.4);
    }

    #[test]
    fn hard_steps_shrink() {
        let mut c = adaptive();
        assert_eq!(c.accepted(0.2, &report(9)), 0.1);
        assert_eq!(c.accepted(0.2, &report(4)), 0.2);
    }

    #[test]
    fn no_growth_right_after_cutback() {
        let mut c = adaptive();
        assert_eq!(c.rejected(0.2), Cutback::Retry(0.1));
        assert_eq!(c.accepted(0.1, &report(1)), 0.1);
        assert_eq!(c.accepted(0.1, &report(1)), 0.2);
    }

    #[test]
    fn cutback_below_minimum_is_reported() {
        let mut c = adaptive();
        assert_eq!(c.rejected(0.015), Cutback::BelowMinimum { dt_min: 0.01 });
    }

    proptest! {
        #[test]
        fn step_stays_within_bounds(
            events in prop::collection::vec(prop::option::of(0u32..20), 1..40)
        ) {
            let mut c = adaptive();
            let mut dt = c.initial_dt();
            for event in events {
                match event {
                    Some(iterations) => dt = c.accepted(dt, &report(iterations)),
                    None => match c.rejected(dt) {
                        Cutback::Retry(next) => dt = next,
                        Cutback::BelowMinimum { dt_min } => prop_assert!(dt * 0.5 < dt_min),
                        Cutback::GiveUp => prop_assert!(false, "adaptive policy gave up"),
                    },
                }
                prop_assert!((0.01..=0.4).contains(&dt), "dt = {}", dt);
            }
        }
    }
}
