//! Background output: hands mirrored buffers to a sink off the step loop.
//!
//! The driver snapshots the requested buffers into read-only mirrors
//! synchronously, then [`OutputWorker::start`]s a frame. The sink runs on
//! a dedicated thread while the next step computes. Before that step
//! writes anything the driver calls [`OutputWorker::wait`], so at most one
//! frame is ever in flight.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use kairos_core::Tensor;

/// Mirrored buffers of one completed step.
#[derive(Clone, Debug)]
pub struct OutputFrame {
    /// Outer step index; 0 is the initial condition.
    pub step: u64,
    /// Simulation time.
    pub time: f64,
    /// Snapshots by buffer name, in registration order.
    pub buffers: IndexMap<String, Arc<Tensor>>,
}

/// Error type sinks report failures with.
pub type SinkError = Box<dyn Error + Send + Sync>;

/// Consumer of output frames. Runs on the output thread.
pub trait OutputSink: Send + 'static {
    /// Consume one frame.
    fn consume(&mut self, frame: OutputFrame) -> Result<(), SinkError>;
}

/// Errors from the output worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputError {
    /// `start` was called while a frame was still being consumed.
    AlreadyRunning,
    /// The output thread exited, usually because the sink panicked.
    WorkerGone,
    /// The sink reported an error.
    SinkFailed {
        /// Step of the frame that failed.
        step: u64,
        /// The sink's message.
        reason: String,
    },
    /// The output thread could not be spawned.
    SpawnFailed {
        /// OS error message.
        reason: String,
    },
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "output is already running for a previous step"),
            Self::WorkerGone => write!(f, "output thread has exited"),
            Self::SinkFailed { step, reason } => {
                write!(f, "output sink failed on step {step}: {reason}")
            }
            Self::SpawnFailed { reason } => write!(f, "cannot spawn output thread: {reason}"),
        }
    }
}

impl Error for OutputError {}

/// Owns the output thread and enforces one frame in flight.
pub struct OutputWorker {
    frames: Option<Sender<OutputFrame>>,
    done: Receiver<Result<(), OutputError>>,
    busy: bool,
    thread: Option<JoinHandle<()>>,
}

impl OutputWorker {
    /// Spawn the output thread around `sink`.
    pub fn spawn(mut sink: Box<dyn OutputSink>) -> Result<Self, OutputError> {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<OutputFrame>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let thread = thread::Builder::new()
            .name("kairos-output".into())
            .spawn(move || {
                for frame in frame_rx {
                    let step = frame.step;
                    let result = sink.consume(frame).map_err(|e| OutputError::SinkFailed {
                        step,
                        reason: e.to_string(),
                    });
                    if done_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| OutputError::SpawnFailed {
                reason: e.to_string(),
            })?;
        Ok(Self {
            frames: Some(frame_tx),
            done: done_rx,
            busy: false,
            thread: Some(thread),
        })
    }

    /// Whether a frame is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Hand `frame` to the sink.
    ///
    /// # Errors
    ///
    /// [`OutputError::AlreadyRunning`] if the previous frame has not been
    /// waited for. Frames are never queued.
    pub fn start(&mut self, frame: OutputFrame) -> Result<(), OutputError> {
        if self.busy {
            return Err(OutputError::AlreadyRunning);
        }
        let frames = self.frames.as_ref().ok_or(OutputError::WorkerGone)?;
        frames.send(frame).map_err(|_| OutputError::WorkerGone)?;
        self.busy = true;
        Ok(())
    }

    /// Block until the in-flight frame is consumed. No-op when idle.
    pub fn wait(&mut self) -> Result<(), OutputError> {
        if !self.busy {
            return Ok(());
        }
        self.busy = false;
        self.done.recv().map_err(|_| OutputError::WorkerGone)?
    }
}

impl Drop for OutputWorker {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            tracing::warn!(error = %e, "output lost at shutdown");
        }
        self.frames = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}

/// Sink that keeps every frame in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct CollectSink {
    frames: Arc<Mutex<Vec<OutputFrame>>>,
}

impl CollectSink {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames consumed so far.
    pub fn frames(&self) -> Vec<OutputFrame> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }
}

impl OutputSink for CollectSink {
    fn consume(&mut self, frame: OutputFrame) -> Result<(), SinkError> {
        self.frames
            .lock()
            .map_err(|_| "frame buffer poisoned")?
            .push(frame);
        Ok(())
    }
}
