//! Out-of-process estimation.
//!
//! [`ProcessExecutor`] runs the estimator in a child process (`<program>
//! worker`) and talks to it over stdin/stdout with the frames defined in
//! [`super::wire`]. Only the [`EstimatorSpec`] crosses the boundary; the child
//! builds its own estimator from the registry. [`run_worker`] is the child
//! side of the protocol.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::registry::{EstimatorRegistry, EstimatorSpec};
use super::wire::{read_frame, write_frame, WireTask, WorkerRequest, WorkerResponse};
use super::worker::{EstimationHandle, EstimationResult, EstimationTask, ExecutionStrategy};
use crate::error::{NavError, Result};

struct Job {
    task: EstimationTask,
    reply: Sender<EstimationResult>,
}

/// Runs one estimator in a child process.
pub struct ProcessExecutor {
    backend: String,
    child: Child,
    jobs: Option<Sender<Job>>,
    io_thread: Option<JoinHandle<()>>,
}

impl ProcessExecutor {
    /// Start `program worker` and construct the estimator in it.
    ///
    /// Blocks until the child reports that construction succeeded or failed.
    pub fn spawn(program: &Path, spec: &EstimatorSpec) -> Result<Self> {
        let mut child = Command::new(program)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| NavError::Worker(format!("failed to start {}: {}", program.display(), e)))?;

        match Self::handshake(&mut child, spec) {
            Ok((backend, stdin, stdout)) => {
                let (jobs, job_receiver) = bounded::<Job>(1);
                let name = backend.clone();
                let io_thread = thread::Builder::new()
                    .name(format!("worker-io-{}", backend))
                    .spawn(move || serve(name, stdin, stdout, job_receiver))?;
                info!("Started out-of-process estimator '{}' (pid {})", backend, child.id());
                Ok(Self {
                    backend,
                    child,
                    jobs: Some(jobs),
                    io_thread: Some(io_thread),
                })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn handshake(
        child: &mut Child,
        spec: &EstimatorSpec,
    ) -> Result<(String, BufWriter<ChildStdin>, BufReader<ChildStdout>)> {
        let stdin = child.stdin.take().ok_or_else(|| NavError::Worker("child stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| NavError::Worker("child stdout unavailable".into()))?;
        let mut writer = BufWriter::new(stdin);
        let mut reader = BufReader::new(stdout);

        write_frame(&mut writer, &WorkerRequest::Init(spec.clone()))?;
        match read_frame::<_, WorkerResponse>(&mut reader)? {
            Some(WorkerResponse::Ready { backend }) => Ok((backend, writer, reader)),
            Some(WorkerResponse::Failed { reason }) => Err(NavError::construction(spec.backend.clone(), reason)),
            Some(other) => Err(NavError::Worker(format!("unexpected handshake reply {:?}", other))),
            None => Err(NavError::Worker("worker exited during handshake".into())),
        }
    }
}

/// IO loop: forward each job to the child and its reply back to the pool.
fn serve(
    backend: String,
    mut writer: BufWriter<ChildStdin>,
    mut reader: BufReader<ChildStdout>,
    jobs: Receiver<Job>,
) {
    for Job { task, reply } in jobs.iter() {
        let timestamp = task.pair.timestamp();
        let task_id = task.id;
        let answer = |pose| {
            let _ = reply.send(EstimationResult {
                task_id,
                timestamp,
                backend: backend.clone(),
                pose,
            });
        };
        match write_frame(&mut writer, &WorkerRequest::Estimate(WireTask::from_task(&task))) {
            Ok(()) => {}
            // Rejected before anything was written; the session is intact.
            Err(NavError::Wire(reason)) => {
                warn!("Worker '{}': task {} not sent: {}", backend, task_id, reason);
                answer(None);
                continue;
            }
            Err(e) => {
                warn!("Worker '{}': send failed: {}", backend, e);
                return;
            }
        }
        match read_frame::<_, WorkerResponse>(&mut reader) {
            Ok(Some(WorkerResponse::Estimate { task_id: id, pose })) if id == task_id => {
                answer(pose.map(|p| p.to_pose()));
            }
            Ok(Some(other)) => {
                warn!("Worker '{}': unexpected reply {:?}", backend, other);
                return;
            }
            Ok(None) => {
                debug!("Worker '{}' closed its output", backend);
                return;
            }
            Err(e) => {
                debug!("Worker '{}': receive failed: {}", backend, e);
                return;
            }
        }
    }
    // Job channel closed: ask the child to exit.
    let _ = write_frame(&mut writer, &WorkerRequest::Shutdown);
}

impl ExecutionStrategy for ProcessExecutor {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn submit(&mut self, task: EstimationTask) -> Result<EstimationHandle> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| NavError::Worker(format!("worker '{}' is shut down", self.backend)))?;
        let (reply, handle) = EstimationHandle::channel(task.id);
        match jobs.try_send(Job { task, reply }) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(_)) => Err(NavError::Worker(format!("worker '{}' is busy", self.backend))),
            Err(TrySendError::Disconnected(_)) => {
                Err(NavError::Worker(format!("worker '{}' has exited", self.backend)))
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.jobs.is_some() && self.io_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Kills the child, cancelling any task in flight.
    fn shutdown(&mut self) {
        if self.jobs.take().is_none() && self.io_thread.is_none() {
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!("Worker '{}' already exited: {}", self.backend, e);
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
        let _ = self.child.wait();
        info!("Stopped out-of-process estimator '{}'", self.backend);
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Child side of the protocol: build the estimator from the `Init` spec,
/// then answer `Estimate` requests until `Shutdown` or end of input.
pub fn run_worker<R: Read, W: Write>(reader: &mut R, writer: &mut W, registry: &EstimatorRegistry) -> Result<()> {
    let spec = match read_frame::<_, WorkerRequest>(reader)? {
        Some(WorkerRequest::Init(spec)) => spec,
        Some(WorkerRequest::Shutdown) | None => return Ok(()),
        Some(WorkerRequest::Estimate(_)) => {
            return Err(NavError::Worker("estimate request before init".into()));
        }
    };

    let mut estimator = match registry.build(&spec) {
        Ok(estimator) => estimator,
        Err(e) => {
            write_frame(writer, &WorkerResponse::Failed { reason: e.to_string() })?;
            return Err(e);
        }
    };
    write_frame(writer, &WorkerResponse::Ready { backend: estimator.name().to_string() })?;
    info!("Worker ready with estimator '{}'", estimator.name());

    loop {
        match read_frame::<_, WorkerRequest>(reader)? {
            Some(WorkerRequest::Estimate(wire)) => {
                let task_id = wire.task_id;
                let pose = match wire.into_task() {
                    Ok(task) => estimator.estimate(&task.pair, task.prior.as_ref()),
                    Err(e) => {
                        warn!("Worker: malformed task {}: {}", task_id, e);
                        None
                    }
                };
                write_frame(
                    writer,
                    &WorkerResponse::Estimate {
                        task_id,
                        pose: pose.as_ref().map(Into::into),
                    },
                )?;
            }
            Some(WorkerRequest::Init(_)) => {
                return Err(NavError::Worker("duplicate init request".into()));
            }
            Some(WorkerRequest::Shutdown) | None => break,
        }
    }
    debug!("Worker shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::ImagePair;
    use crate::geometry::{CameraIntrinsics, GeoPoint, Pose};
    use crate::map::{GeoBBox, GeoRaster};
    use crate::telemetry::CameraFrame;
    use image::GrayImage;
    use std::io::Cursor;
    use std::sync::Arc;

    fn task(id: u64) -> EstimationTask {
        let bbox = GeoBBox::around(&GeoPoint::new(10.0, 20.0), 50.0);
        let raster = GeoRaster::new(GrayImage::new(32, 32), bbox, 0.0).unwrap();
        let query = CameraFrame {
            image: GrayImage::new(16, 12),
            intrinsics: CameraIntrinsics::from_hfov(1.0, 16, 12),
            timestamp: 3.0,
        };
        EstimationTask {
            id,
            pair: ImagePair::new(query, Arc::new(raster)),
            prior: Some(Pose::identity()),
        }
    }

    fn session(requests: &[WorkerRequest]) -> (Result<()>, Vec<WorkerResponse>) {
        let mut input = Vec::new();
        for r in requests {
            write_frame(&mut input, r).unwrap();
        }
        let mut output = Vec::new();
        let result = run_worker(&mut Cursor::new(input), &mut output, &EstimatorRegistry::builtin());

        let mut replies = Vec::new();
        let mut cursor = Cursor::new(output);
        while let Some(reply) = read_frame::<_, WorkerResponse>(&mut cursor).unwrap() {
            replies.push(reply);
        }
        (result, replies)
    }

    #[test]
    fn test_worker_session() {
        let (result, replies) = session(&[
            WorkerRequest::Init(EstimatorSpec::new("patch_keypoint")),
            WorkerRequest::Estimate(WireTask::from_task(&task(5))),
            WorkerRequest::Estimate(WireTask::from_task(&task(6))),
            WorkerRequest::Shutdown,
        ]);

        assert!(result.is_ok());
        assert_eq!(
            replies,
            vec![
                WorkerResponse::Ready { backend: "patch_keypoint".into() },
                // Blank images have no features.
                WorkerResponse::Estimate { task_id: 5, pose: None },
                WorkerResponse::Estimate { task_id: 6, pose: None },
            ]
        );
    }

    #[test]
    fn test_worker_answers_malformed_task_and_continues() {
        let mut broken = WireTask::from_task(&task(5));
        broken.query.pixels.truncate(3);
        let (result, replies) = session(&[
            WorkerRequest::Init(EstimatorSpec::new("patch_keypoint")),
            WorkerRequest::Estimate(broken),
            WorkerRequest::Estimate(WireTask::from_task(&task(6))),
            WorkerRequest::Shutdown,
        ]);

        assert!(result.is_ok());
        assert_eq!(
            replies,
            vec![
                WorkerResponse::Ready { backend: "patch_keypoint".into() },
                WorkerResponse::Estimate { task_id: 5, pose: None },
                WorkerResponse::Estimate { task_id: 6, pose: None },
            ]
        );
    }

    #[test]
    fn test_worker_reports_construction_failure() {
        let (result, replies) = session(&[WorkerRequest::Init(EstimatorSpec::new("no_such_backend"))]);

        assert!(matches!(result, Err(NavError::EstimatorConstruction { .. })));
        assert!(matches!(replies.as_slice(), [WorkerResponse::Failed { .. }]));
    }

    #[test]
    fn test_worker_requires_init() {
        let (result, replies) = session(&[WorkerRequest::Estimate(WireTask::from_task(&task(1)))]);
        assert!(matches!(result, Err(NavError::Worker(_))));
        assert!(replies.is_empty());
    }

    #[test]
    fn test_worker_exits_on_eof() {
        let (result, replies) = session(&[WorkerRequest::Init(EstimatorSpec::new("correlation"))]);
        assert!(result.is_ok());
        assert_eq!(replies, vec![WorkerResponse::Ready { backend: "correlation".into() }]);
    }

    #[test]
    fn test_spawn_missing_program() {
        let err = ProcessExecutor::spawn(Path::new("/nonexistent/visnav"), &EstimatorSpec::new("patch_keypoint"));
        assert!(matches!(err, Err(NavError::Worker(_))));
    }
}
