//! Bounded worker pool over discovered units.
//!
//! Units are pushed onto a crossbeam queue and pulled by `width` worker
//! threads. Every finished unit is written to a shared [`OutcomeLog`] and
//! acknowledged on a completion channel; the coordinating thread counts
//! acknowledgements until the queue drains, the wall-clock ceiling passes,
//! or the run is cancelled.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::run::CancelToken;
use crate::pipeline::{panic_message, UnitJob};
use crate::report::RunSummary;
use crate::state::{Failure, JobOutcome};
use crate::testgen::candidate::CompilationUnit;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub width: usize,
    pub ceiling: Duration,
    pub grace: Duration,
}

impl SchedulerOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            width: cfg.parallelism,
            ceiling: cfg.run_ceiling(),
            grace: cfg.cancel_grace(),
        }
    }
}

/* ============================================================
   Outcome log
   ============================================================ */

/// Thread-safe sink for per-unit outcomes. Callers never lock.
#[derive(Debug, Default)]
pub struct OutcomeLog {
    successes: Mutex<Vec<CompilationUnit>>,
    failures: Mutex<BTreeMap<CompilationUnit, Failure>>,
}

impl OutcomeLog {
    pub fn record(&self, unit: CompilationUnit, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Success => lock(&self.successes).push(unit),
            JobOutcome::Failure(f) => {
                lock(&self.failures).insert(unit, f);
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.successes).len() + lock(&self.failures).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, unit: &CompilationUnit) -> bool {
        lock(&self.successes).contains(unit) || lock(&self.failures).contains_key(unit)
    }

    /// Both lists are read under one critical section.
    pub fn snapshot(&self) -> (Vec<CompilationUnit>, Vec<(CompilationUnit, Failure)>) {
        let successes = lock(&self.successes);
        let failures = lock(&self.failures);
        (
            successes.clone(),
            failures.iter().map(|(u, f)| (u.clone(), f.clone())).collect(),
        )
    }
}

/// Units absent from the snapshot that feeds the summary.
fn unaccounted(
    units: Vec<CompilationUnit>,
    successes: &[CompilationUnit],
    failures: &[(CompilationUnit, Failure)],
) -> Vec<CompilationUnit> {
    let seen: HashSet<&CompilationUnit> = successes
        .iter()
        .chain(failures.iter().map(|(u, _)| u))
        .collect();
    units.into_iter().filter(|u| !seen.contains(u)).collect()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/* ============================================================
   Scheduler
   ============================================================ */

pub struct Scheduler {
    options: SchedulerOptions,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self::with_cancel(options, CancelToken::new())
    }

    /// Shares `cancel` with whoever raises the shutdown signal.
    pub fn with_cancel(options: SchedulerOptions, cancel: CancelToken) -> Self {
        Self { options, cancel }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&self, units: Vec<CompilationUnit>, job: Arc<dyn UnitJob>) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let total = units.len();

        if total == 0 {
            info!("no compilation units found; nothing to do");
            return RunSummary::new(started_at, 0, Vec::new(), Vec::new(), Vec::new());
        }

        let width = self.options.width.clamp(1, total);
        info!(units = total, workers = width, "starting run");

        let log = Arc::new(OutcomeLog::default());

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<CompilationUnit>();
        for unit in &units {
            let _ = work_tx.send(unit.clone());
        }
        drop(work_tx);

        let (done_tx, done_rx) = crossbeam_channel::unbounded::<()>();
        let handles = self.spawn_workers(width, &work_rx, &done_tx, &job, &log);
        drop(done_tx);
        drop(work_rx);

        /* ---------- wait for completion, ceiling or cancel ---------- */

        let deadline = started + self.options.ceiling;
        let mut completed = 0usize;
        let mut ceiling_reached = false;

        while completed < total {
            if self.cancel.is_cancelled() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                ceiling_reached = true;
                break;
            }
            match done_rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(()) => completed += 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let cancelled = self.cancel.is_cancelled();

        if completed < total {
            if ceiling_reached {
                warn!(ceiling_secs = self.options.ceiling.as_secs(), "wall-clock ceiling reached; cancelling in-flight units");
            } else if cancelled {
                warn!("cancellation requested; stopping dispatch");
            }
            self.cancel.cancel();
            self.drain_with_grace(&done_rx);
        }

        for h in handles {
            if h.is_finished() {
                let _ = h.join();
            }
        }

        let (successes, failures) = log.snapshot();
        let unfinished = unaccounted(units, &successes, &failures);

        let mut summary = RunSummary::new(started_at, total, successes, failures, unfinished);
        summary.cancelled = cancelled;
        summary.ceiling_reached = ceiling_reached;

        info!(
            successes = summary.successes.len(),
            failures = summary.failure_count(),
            unfinished = summary.unfinished.len(),
            elapsed_secs = started.elapsed().as_secs(),
            "run finished"
        );

        summary
    }

    fn spawn_workers(
        &self,
        width: usize,
        work_rx: &Receiver<CompilationUnit>,
        done_tx: &Sender<()>,
        job: &Arc<dyn UnitJob>,
        log: &Arc<OutcomeLog>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(width);

        for id in 0..width {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let job = Arc::clone(job);
            let log = Arc::clone(log);
            let cancel = self.cancel.clone();

            let spawned = thread::Builder::new()
                .name(format!("evogen-worker-{id}"))
                .spawn(move || worker_loop(work_rx, done_tx, job, log, cancel));

            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => warn!(worker = id, error = %e, "failed to spawn worker"),
            }
        }

        handles
    }

    /// Gives in-flight jobs the grace period to unwind. Workers still busy
    /// afterwards are abandoned.
    fn drain_with_grace(&self, done_rx: &Receiver<()>) {
        let grace_deadline = Instant::now() + self.options.grace;
        loop {
            match done_rx.recv_deadline(grace_deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("all workers exited");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(grace_secs = self.options.grace.as_secs(), "workers still busy after grace period; abandoning");
                    return;
                }
            }
        }
    }
}

fn worker_loop(
    work_rx: Receiver<CompilationUnit>,
    done_tx: Sender<()>,
    job: Arc<dyn UnitJob>,
    log: Arc<OutcomeLog>,
    cancel: CancelToken,
) {
    for unit in work_rx.iter() {
        if cancel.is_cancelled() {
            break;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&unit, &cancel)))
            .unwrap_or_else(|payload| {
                Failure::other(format!("panic: {}", panic_message(payload.as_ref()))).into()
            });

        log.record(unit, outcome);
        if done_tx.send(()).is_err() {
            break;
        }
    }
}
