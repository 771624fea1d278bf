//! Initial guesses for implicit iterations.

use kairos_core::{BufferHandle, SolveError};
use kairos_store::BufferStore;

/// Adjusts buffers before an implicit solve starts iterating.
///
/// Runs after the solver has captured the old state, so a predictor only
/// moves the starting point of the iteration, never the equation solved.
pub trait Predictor: Send {
    /// Predictor name for logs.
    fn name(&self) -> &str;

    /// Apply the prediction. Returns `false` when there was not enough
    /// history to predict anything and the buffers are untouched.
    fn apply(&mut self, store: &mut BufferStore) -> Result<bool, SolveError>;
}

/// Linear extrapolation `u ← u + scale·(u₋₁ − u₋₂)` from the two most
/// recent committed values of a real-space buffer.
#[derive(Clone, Debug)]
pub struct LinearPredictor {
    buffer: BufferHandle,
    scale: f64,
}

impl LinearPredictor {
    /// Requests two entries of history on `buffer`.
    pub fn new(store: &mut BufferStore, buffer: &str, scale: f64) -> Self {
        Self {
            buffer: store.request_history(buffer, 2),
            scale,
        }
    }
}

impl Predictor for LinearPredictor {
    fn name(&self) -> &str {
        "linear"
    }

    fn apply(&mut self, store: &mut BufferStore) -> Result<bool, SolveError> {
        let history = store.history_of(self.buffer)?;
        let (Some(newest), Some(older)) = (history.get(0), history.get(1)) else {
            return Ok(false);
        };
        let mut delta = newest.clone();
        delta.axpy(-1.0, older);
        store.get_mut(self.buffer)?.axpy(self.scale, &delta);
        Ok(true)
    }
}
