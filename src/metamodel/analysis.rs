//! Iteration budgets and checkpointing for model analysis.
//!
//! Providers implement [`AnalysisTarget`] (one inference step, one durable
//! commit) and hand it to [`run_analysis`], which enforces the iteration
//! count, the advisory wall-clock budget, cooperative interruption and the
//! checkpoint schedule the same way for every metamodel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::ModelNumber;
use crate::error::{Error, Result};

/// Cooperative cancellation for a running analysis.
///
/// Clones share the same flag, so one can be handed to another thread or to
/// a progress hook and triggered there.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the analysis to stop before its next iteration.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress reported after each completed iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisProgress {
    /// Iterations completed in this call.
    pub iteration: usize,
    /// Iterations completed in this call and durably committed.
    pub committed_iterations: usize,
    /// Wall-clock time since the call started.
    pub elapsed: Duration,
}

type ProgressFn = dyn Fn(&AnalysisProgress) + Send + Sync;

/// Callback invoked with [`AnalysisProgress`] after every iteration.
#[derive(Clone)]
pub struct ProgressHook(Arc<ProgressFn>);

impl ProgressHook {
    pub fn new(f: impl Fn(&AnalysisProgress) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn call(&self, progress: &AnalysisProgress) {
        (self.0)(progress)
    }
}

impl fmt::Debug for ProgressHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressHook(..)")
    }
}

/// Options for [`Metamodel::analyze_models`].
///
/// [`Metamodel::analyze_models`]: super::Metamodel::analyze_models
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Models to analyze; all models when `None`.
    pub modelnos: Option<Vec<ModelNumber>>,

    /// Maximum iterations per model.
    pub iterations: usize,

    /// Advisory wall-clock budget.
    pub max_duration: Option<Duration>,

    /// Commit progress every this many iterations.
    ///
    /// When `None`, progress is committed only when the call ends.
    pub iterations_per_checkpoint: Option<usize>,

    /// Cancellation token checked before every iteration.
    pub interrupt: Option<Interrupt>,

    /// Called after every iteration.
    pub on_progress: Option<ProgressHook>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            modelnos: None,
            iterations: 1,
            max_duration: None,
            iterations_per_checkpoint: None,
            interrupt: None,
            on_progress: None,
        }
    }
}

impl AnalyzeOptions {
    /// Restrict analysis to these model numbers.
    pub fn with_models(mut self, modelnos: impl IntoIterator<Item = ModelNumber>) -> Self {
        self.modelnos = Some(modelnos.into_iter().collect());
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_max_seconds(mut self, seconds: u64) -> Self {
        self.max_duration = Some(Duration::from_secs(seconds));
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn with_checkpoint_every(mut self, iterations: usize) -> Self {
        self.iterations_per_checkpoint = Some(iterations);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_progress(mut self, f: impl Fn(&AnalysisProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(ProgressHook::new(f));
        self
    }

    /// Reject a zero checkpoint interval.
    pub fn validate(&self) -> Result<()> {
        if self.iterations_per_checkpoint == Some(0) {
            return Err(Error::invalid("iterations_per_checkpoint must be at least 1"));
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(Interrupt::is_triggered)
    }
}

/// Why an analysis call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// All requested iterations ran.
    Completed,
    /// The wall-clock budget ran out first.
    TimeBudget,
    /// The interrupt was triggered; progress after the last checkpoint was
    /// discarded.
    Interrupted,
}

/// Outcome of an analysis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Iterations run in this call.
    pub iterations: usize,
    /// Iterations whose results were committed.
    pub committed_iterations: usize,
    /// Number of commits made.
    pub checkpoints: usize,
    pub stop: StopReason,
}

/// One resumable analysis, as driven by [`run_analysis`].
pub trait AnalysisTarget {
    /// Advance every selected model by one iteration.
    fn step(&mut self, iteration: usize) -> Result<()>;

    /// Durably commit the current state of every selected model.
    ///
    /// `completed` is the number of iterations run so far in this call.
    fn checkpoint(&mut self, completed: usize) -> Result<()>;
}

/// Run `target` under the budgets and checkpoint schedule of `options`.
///
/// Stops at `options.iterations`, at the wall-clock budget, or at an
/// interrupt, whichever comes first. On a normal stop any uncommitted
/// progress is committed; on an interrupt it is not, and the caller is
/// expected to fall back to the last checkpoint.
pub fn run_analysis<T: AnalysisTarget + ?Sized>(
    options: &AnalyzeOptions,
    target: &mut T,
) -> Result<AnalysisReport> {
    options.validate()?;

    let started = Instant::now();
    let deadline = options.max_duration.map(|d| started + d);

    let mut completed = 0;
    let mut committed = 0;
    let mut checkpoints = 0;
    let mut stop = StopReason::Completed;

    while completed < options.iterations {
        if options.interrupted() {
            stop = StopReason::Interrupted;
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            stop = StopReason::TimeBudget;
            break;
        }

        target.step(completed)?;
        completed += 1;

        if let Some(every) = options.iterations_per_checkpoint {
            if completed - committed >= every {
                target.checkpoint(completed)?;
                committed = completed;
                checkpoints += 1;
                debug!(completed, "analysis checkpoint");
            }
        }

        if let Some(hook) = &options.on_progress {
            hook.call(&AnalysisProgress {
                iteration: completed,
                committed_iterations: committed,
                elapsed: started.elapsed(),
            });
        }
    }

    if stop == StopReason::Completed && options.interrupted() {
        stop = StopReason::Interrupted;
    }

    if stop == StopReason::Interrupted {
        warn!(
            completed,
            committed, "analysis interrupted; keeping last checkpoint"
        );
    } else if completed > committed {
        target.checkpoint(completed)?;
        committed = completed;
        checkpoints += 1;
    }

    Ok(AnalysisReport {
        iterations: completed,
        committed_iterations: committed,
        checkpoints,
        stop,
    })
}
