//! Single-slot migration runner.
//!
//! `start` hands out a `JobHandle`; `cancel` needs that handle. Only one job
//! may run at a time.

use crate::engine::{EngineControl, MigrationEngine, ProcessLauncher};
use crate::model::{InfoEvent, JobEvent, JobId, MigrationJob, Selection, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("migration {0} is already running")]
    AlreadyRunning(JobId),
}

/// Proof of a started job; required to cancel it.
#[derive(Debug, PartialEq, Eq)]
pub struct JobHandle {
    id: JobId,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }
}

/// Internal handle for a running job task.
struct RunCtx {
    id: JobId,
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<JoinHandle<MigrationJob>>,
}

pub struct MigrationRunner {
    launcher: Arc<dyn ProcessLauncher>,
    grace_period: Duration,
    next_id: u64,
    active: Option<RunCtx>,
}

impl MigrationRunner {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, grace_period: Duration) -> Self {
        Self {
            launcher,
            grace_period,
            next_id: 1,
            active: None,
        }
    }

    /// Id of the job whose task has not finished yet, if any.
    pub fn running(&self) -> Option<JobId> {
        self.active
            .as_ref()
            .filter(|ctx| ctx.handle.as_ref().is_some_and(|h| !h.is_finished()))
            .map(|ctx| ctx.id)
    }

    /// Validate `selection` and spawn the build. Rejections are reported to
    /// `sink` before this returns.
    pub fn start(
        &mut self,
        selection: &Selection,
        sink: UnboundedSender<JobEvent>,
    ) -> Result<JobHandle, StartError> {
        if let Some(id) = self.running() {
            tracing::warn!(job = %id, "start rejected, a migration is already running");
            let _ = sink.send(JobEvent::Info(InfoEvent::AlreadyRunning { id }));
            return Err(StartError::AlreadyRunning(id));
        }
        let paths = match selection.validate() {
            Ok(paths) => paths,
            Err(e) => {
                tracing::info!(error = %e, "start rejected");
                let _ = sink.send(JobEvent::Info(InfoEvent::ValidationFailed(e.clone())));
                return Err(e.into());
            }
        };

        let id = JobId(self.next_id);
        self.next_id += 1;
        let job = MigrationJob::new(id, paths);
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
        let engine = MigrationEngine::new(job, self.launcher.clone(), self.grace_period);
        let handle = tokio::spawn(async move { engine.run(sink, ctrl_rx).await });
        self.active = Some(RunCtx {
            id,
            ctrl_tx,
            handle: Some(handle),
        });
        Ok(JobHandle { id })
    }

    /// Request cancellation of the job behind `handle`. Returns false when that
    /// job is not running.
    pub fn cancel(&mut self, handle: &JobHandle) -> bool {
        match &self.active {
            Some(ctx) if ctx.id == handle.id && self.running() == Some(handle.id) => {
                tracing::info!(job = %handle.id, "cancel requested");
                ctx.ctrl_tx.send(EngineControl::Cancel).is_ok()
            }
            _ => false,
        }
    }

    /// Wait for the active job task. Pends forever when nothing is running, so
    /// it can sit in a `select!` next to other branches.
    pub async fn finished(&mut self) -> Result<MigrationJob, JoinError> {
        if let Some(ctx) = &mut self.active {
            if let Some(h) = ctx.handle.as_mut() {
                let res = h.await;
                self.active = None;
                return res;
            }
        }
        futures::future::pending().await
    }

    /// Wait for the active job, if there is one.
    pub async fn wait(&mut self) -> Option<Result<MigrationJob, JoinError>> {
        if self.active.is_none() {
            return None;
        }
        Some(self.finished().await)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptLauncher;
    use crate::model::JobState;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn selection() -> Selection {
        Selection {
            plugin: Some("/work/Foo/Foo.uplugin".into()),
            destination: Some("/out".into()),
            engine: Some("/opt/UE_5.3".into()),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn unset_path_is_rejected_without_launching() {
        let launcher = ScriptLauncher::new("echo should-not-run");
        let mut runner = MigrationRunner::new(launcher.clone(), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for category in crate::model::PathCategory::ALL {
            let mut sel = selection();
            sel.set(category, None);
            let err = runner.start(&sel, tx.clone()).unwrap_err();
            assert_eq!(
                err,
                StartError::Validation(ValidationError {
                    missing: vec![category]
                })
            );
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e, JobEvent::Info(InfoEvent::ValidationFailed(_)))));
        assert_eq!(launcher.spawn_count(), 0);
        assert!(runner.wait().await.is_none());
    }

    #[tokio::test]
    async fn relays_lines_in_order_then_reports_success() {
        let launcher = ScriptLauncher::new("for i in 1 2 3 4 5; do echo \"line $i\"; done");
        let mut runner = MigrationRunner::new(launcher.clone(), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = runner.start(&selection(), tx).unwrap();
        let job = runner.wait().await.unwrap().unwrap();
        assert_eq!(job.id, handle.id());
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.exit_code, Some(0));

        let events = drain(&mut rx);
        assert!(matches!(events[0], JobEvent::Started { .. }));
        let lines: Vec<String> = events[1..events.len() - 1]
            .iter()
            .map(|e| match e {
                JobEvent::Output { line, .. } => line.clone(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        let expected: Vec<String> = (1..=5).map(|i| format!("line {i}")).collect();
        assert_eq!(lines, expected);
        assert_eq!(job.output_log, expected);
        match events.last() {
            Some(JobEvent::Finished { job }) => {
                assert_eq!(job.state, JobState::Succeeded);
                assert_eq!(job.summary(), "Plugin migrated successfully (exit code 0)");
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn cancel_terminates_and_finishes_exactly_once() {
        let launcher = ScriptLauncher::new("echo started; exec sleep 60");
        let mut runner = MigrationRunner::new(launcher.clone(), Duration::from_secs(2));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = runner.start(&selection(), tx).unwrap();
        // Wait until the fake build has produced output so it is really running.
        loop {
            match rx.recv().await {
                Some(JobEvent::Output { .. }) => break,
                Some(_) => continue,
                None => panic!("event stream closed early"),
            }
        }
        assert!(runner.cancel(&handle));
        let job = tokio::time::timeout(Duration::from_secs(10), runner.wait())
            .await
            .expect("cancel should not hang")
            .unwrap()
            .unwrap();

        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(launcher.termination_count(), 1);
        let events = drain(&mut rx);
        let finished = events
            .iter()
            .filter(|e| matches!(e, JobEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, JobEvent::Info(InfoEvent::Cancelling { .. }))));

        // The job is gone; a second cancel is a no-op.
        assert!(!runner.cancel(&handle));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let launcher = ScriptLauncher::new("exec sleep 60");
        let mut runner = MigrationRunner::new(launcher.clone(), Duration::from_secs(2));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = runner.start(&selection(), tx.clone()).unwrap();
        let err = runner.start(&selection(), tx).unwrap_err();
        assert_eq!(err, StartError::AlreadyRunning(first.id()));

        // The engine task spawns the process right after announcing the job.
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Some(ev @ JobEvent::Started { .. }) => {
                    seen.push(ev);
                    break;
                }
                Some(ev) => seen.push(ev),
                None => panic!("event stream closed early"),
            }
        }
        assert_eq!(launcher.spawn_count(), 1);

        assert!(runner.cancel(&first));
        let job = runner.wait().await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        seen.extend(drain(&mut rx));
        assert!(seen
            .iter()
            .any(|e| matches!(e, JobEvent::Info(InfoEvent::AlreadyRunning { .. }))));
    }

    #[tokio::test]
    async fn cancel_without_running_job_is_noop() {
        let launcher = ScriptLauncher::new("true");
        let mut runner = MigrationRunner::new(launcher.clone(), Duration::from_secs(1));
        let stale = JobHandle { id: JobId(42) };
        assert!(!runner.cancel(&stale));
        assert_eq!(launcher.termination_count(), 0);
    }

    #[tokio::test]
    async fn new_job_after_completion_gets_fresh_id() {
        let launcher = ScriptLauncher::new("echo ok");
        let mut runner = MigrationRunner::new(launcher.clone(), Duration::from_secs(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = runner.start(&selection(), tx.clone()).unwrap();
        runner.wait().await.unwrap().unwrap();
        let second = runner.start(&selection(), tx).unwrap();
        assert_ne!(first.id(), second.id());
        runner.wait().await.unwrap().unwrap();
        assert_eq!(launcher.spawn_count(), 2);
    }
}
