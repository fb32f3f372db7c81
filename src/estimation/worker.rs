//! Estimation worker pool.
//!
//! Pose estimation is the slowest and least predictable step, so it never
//! runs on the control path. An [`ExecutionStrategy`] runs estimation tasks
//! somewhere else (a thread or a child process) and hands back an
//! [`EstimationHandle`]; the [`EstimationPool`] enforces at most one task in
//! flight per estimator and keeps the caller's context next to it so the
//! result can be re-associated with the vehicle state at submission.
//!
//! Swapping the strategy retires the old one: its in-flight task still
//! completes under the old estimator and is delivered by [`EstimationPool::poll`]
//! before the retired strategy is shut down.

use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, info, warn};

use super::estimator::{ImagePair, PoseEstimator};
use super::process::ProcessExecutor;
use super::registry::{EstimatorRegistry, EstimatorSpec};
use crate::error::{NavError, Result};
use crate::geometry::Pose;
use crate::system::config::ExecutionKind;

/// One unit of work: a pair, an optional prior and its ticket id.
#[derive(Debug, Clone)]
pub struct EstimationTask {
    pub id: u64,
    pub pair: ImagePair,
    pub prior: Option<Pose>,
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct EstimationResult {
    pub task_id: u64,
    /// Timestamp of the query frame the task was built from.
    pub timestamp: f64,
    /// Backend that produced the result.
    pub backend: String,
    pub pose: Option<Pose>,
}

/// State of a submitted task as seen from the control path.
#[derive(Debug)]
pub enum HandleState {
    Pending,
    Ready(EstimationResult),
    /// The executor went away without answering.
    Lost,
}

/// Future-like handle to a submitted task.
#[derive(Debug)]
pub struct EstimationHandle {
    task_id: u64,
    receiver: Receiver<EstimationResult>,
}

impl EstimationHandle {
    /// Handle paired with the sender the executor answers on.
    pub fn channel(task_id: u64) -> (Sender<EstimationResult>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { task_id, receiver: rx })
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Non-blocking check for the result.
    pub fn try_take(&self) -> HandleState {
        match self.receiver.try_recv() {
            Ok(result) => HandleState::Ready(result),
            Err(TryRecvError::Empty) => HandleState::Pending,
            Err(TryRecvError::Disconnected) => HandleState::Lost,
        }
    }
}

/// Where estimation tasks run.
pub trait ExecutionStrategy: Send {
    /// Identifier of the estimator behind this strategy.
    fn backend(&self) -> &str;

    /// Start a task. Must not block on the estimation itself.
    fn submit(&mut self, task: EstimationTask) -> Result<EstimationHandle>;

    /// `false` once the executor can no longer run tasks (its thread or
    /// child process has gone away).
    fn is_alive(&self) -> bool;

    /// Stop accepting work and release the executor.
    fn shutdown(&mut self);
}

/// Build the strategy for `spec`.
///
/// The estimator is constructed before this returns, so construction
/// failures surface here and never on the first task.
pub fn spawn_strategy(
    kind: ExecutionKind,
    spec: &EstimatorSpec,
    registry: &EstimatorRegistry,
    worker_program: Option<&Path>,
) -> Result<Box<dyn ExecutionStrategy>> {
    match kind {
        ExecutionKind::InProcess => Ok(Box::new(ThreadExecutor::spawn(registry.build(spec)?)?)),
        ExecutionKind::OutOfProcess => {
            registry.check(spec)?;
            let program = match worker_program {
                Some(p) => p.to_path_buf(),
                None => std::env::current_exe()?,
            };
            Ok(Box::new(ProcessExecutor::spawn(&program, spec)?))
        }
    }
}

// ============================================================================
// In-process execution
// ============================================================================

struct Job {
    task: EstimationTask,
    reply: Sender<EstimationResult>,
}

/// Runs one estimator on a dedicated thread.
pub struct ThreadExecutor {
    backend: String,
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadExecutor {
    pub fn spawn(estimator: Box<dyn PoseEstimator>) -> Result<Self> {
        let backend = estimator.name().to_string();
        let (jobs, job_receiver) = bounded::<Job>(1);
        let handle = thread::Builder::new()
            .name(format!("estimator-{}", backend))
            .spawn(move || run_estimator(estimator, job_receiver))?;
        info!("Started in-process estimator '{}'", backend);

        Ok(Self {
            backend,
            jobs: Some(jobs),
            handle: Some(handle),
        })
    }
}

fn run_estimator(mut estimator: Box<dyn PoseEstimator>, jobs: Receiver<Job>) {
    for Job { task, reply } in jobs.iter() {
        let pose = estimator.estimate(&task.pair, task.prior.as_ref());
        let result = EstimationResult {
            task_id: task.id,
            timestamp: task.pair.timestamp(),
            backend: estimator.name().to_string(),
            pose,
        };
        // The pool may have been dropped in the meantime.
        let _ = reply.send(result);
    }
    debug!("Estimator '{}' thread exiting", estimator.name());
}

impl ExecutionStrategy for ThreadExecutor {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn submit(&mut self, task: EstimationTask) -> Result<EstimationHandle> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| NavError::Worker(format!("estimator '{}' is shut down", self.backend)))?;
        let (reply, handle) = EstimationHandle::channel(task.id);
        match jobs.try_send(Job { task, reply }) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(_)) => Err(NavError::Worker(format!("estimator '{}' is busy", self.backend))),
            Err(TrySendError::Disconnected(_)) => {
                Err(NavError::Worker(format!("estimator '{}' thread has exited", self.backend)))
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.jobs.is_some() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Closes the job channel and waits for the thread, which finishes any
    /// task it is running first.
    fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Estimator '{}' thread panicked", self.backend);
            }
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Result of [`EstimationPool::try_submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted under this ticket.
    Submitted(u64),
    /// A task is already in flight; the new one was dropped.
    Dropped,
}

/// A finished task with the context it was submitted with.
#[derive(Debug)]
pub struct Completed<C> {
    pub result: EstimationResult,
    pub context: C,
}

struct InFlight<C> {
    handle: EstimationHandle,
    context: C,
}

/// A strategy and its (at most one) outstanding task.
struct Lane<C> {
    strategy: Box<dyn ExecutionStrategy>,
    in_flight: Option<InFlight<C>>,
}

impl<C> Lane<C> {
    fn new(strategy: Box<dyn ExecutionStrategy>) -> Self {
        Self {
            strategy,
            in_flight: None,
        }
    }

    fn poll(&mut self) -> Option<Completed<C>> {
        let state = self.in_flight.as_ref()?.handle.try_take();
        match state {
            HandleState::Pending => None,
            HandleState::Ready(result) => {
                let InFlight { context, .. } = self.in_flight.take()?;
                Some(Completed { result, context })
            }
            HandleState::Lost => {
                if let Some(lost) = self.in_flight.take() {
                    warn!(
                        "Estimator '{}' lost task {}",
                        self.strategy.backend(),
                        lost.handle.task_id()
                    );
                }
                None
            }
        }
    }
}

/// Drop-newest-while-busy front end over an [`ExecutionStrategy`].
pub struct EstimationPool<C> {
    active: Lane<C>,
    retired: Vec<Lane<C>>,
    next_id: u64,
}

impl<C> EstimationPool<C> {
    pub fn new(strategy: Box<dyn ExecutionStrategy>) -> Self {
        Self {
            active: Lane::new(strategy),
            retired: Vec::new(),
            next_id: 1,
        }
    }

    /// Backend of the active strategy.
    pub fn backend(&self) -> &str {
        self.active.strategy.backend()
    }

    /// `true` while the active strategy has a task in flight.
    pub fn is_busy(&self) -> bool {
        self.active.in_flight.is_some()
    }

    /// `false` once the active strategy has died and needs replacing.
    pub fn is_alive(&self) -> bool {
        self.active.strategy.is_alive()
    }

    /// Retired strategies still waiting for their last task.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Submit a pair unless a task is already in flight.
    pub fn try_submit(&mut self, pair: ImagePair, prior: Option<Pose>, context: C) -> Result<SubmitOutcome> {
        if self.is_busy() {
            debug!("Estimator busy, dropping frame at {:.3}", pair.timestamp());
            return Ok(SubmitOutcome::Dropped);
        }
        let id = self.next_id;
        self.next_id += 1;

        let handle = self.active.strategy.submit(EstimationTask { id, pair, prior })?;
        self.active.in_flight = Some(InFlight { handle, context });
        Ok(SubmitOutcome::Submitted(id))
    }

    /// Collect finished tasks, retired strategies first. Retired strategies
    /// are shut down once their last task has been delivered.
    pub fn poll(&mut self) -> Vec<Completed<C>> {
        let mut done = Vec::new();
        for lane in self.retired.iter_mut() {
            done.extend(lane.poll());
        }
        self.retired.retain_mut(|lane| {
            if lane.in_flight.is_some() {
                return true;
            }
            lane.strategy.shutdown();
            false
        });
        done.extend(self.active.poll());
        done
    }

    /// Make `strategy` the active one. A task in flight on the old
    /// strategy still completes and is returned by a later [`poll`](Self::poll).
    pub fn swap(&mut self, strategy: Box<dyn ExecutionStrategy>) {
        let mut old = std::mem::replace(&mut self.active, Lane::new(strategy));
        info!(
            "Estimator swapped: '{}' -> '{}'",
            old.strategy.backend(),
            self.active.strategy.backend()
        );
        if old.in_flight.is_some() {
            self.retired.push(old);
        } else {
            old.strategy.shutdown();
        }
    }

    /// Shut down every strategy, discarding tasks in flight.
    pub fn shutdown(&mut self) {
        for mut lane in self.retired.drain(..) {
            lane.strategy.shutdown();
        }
        self.active.in_flight = None;
        self.active.strategy.shutdown();
    }
}
