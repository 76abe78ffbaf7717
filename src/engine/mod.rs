mod command;
mod process;

pub use command::MigrationCommand;
pub use process::{ProcessLauncher, SystemLauncher};

use crate::model::{InfoEvent, JobEvent, JobState, MigrationJob};
use process::{force_kill, spawn_line_reader};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;

/// How long output is still relayed after the build tool has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Stop the build: terminate, then kill after the grace period
    Cancel,
}

enum Relay {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Drives one `MigrationJob` from Idle to a terminal state.
pub struct MigrationEngine {
    job: MigrationJob,
    launcher: Arc<dyn ProcessLauncher>,
    grace_period: Duration,
}

impl MigrationEngine {
    pub fn new(job: MigrationJob, launcher: Arc<dyn ProcessLauncher>, grace_period: Duration) -> Self {
        Self {
            job,
            launcher,
            grace_period,
        }
    }

    /// Run the job to completion. Every outcome, including launch failure,
    /// ends in exactly one `JobEvent::Finished`.
    pub async fn run(
        mut self,
        event_tx: mpsc::UnboundedSender<JobEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> MigrationJob {
        let id = self.job.id;
        self.advance(JobState::Running);
        tracing::info!(job = %id, command = %self.job.command, "starting migration");
        let _ = event_tx.send(JobEvent::Started {
            id,
            command: self.job.command.to_string(),
        });

        let mut child = match self.launcher.spawn(&self.job.command) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job = %id, error = %e, "failed to launch build tool");
                self.job.failure = Some(format!(
                    "could not launch {}: {e}",
                    self.job.command.program.display()
                ));
                self.advance(JobState::Failed);
                return self.finish(&event_tx);
            }
        };

        // stdout and stderr share one channel so lines keep their arrival order.
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_line_reader(out, line_tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_line_reader(err, line_tx.clone()));
        }
        drop(line_tx);

        let relay = self
            .relay(&mut child, &mut line_rx, &mut control_rx, &event_tx)
            .await;

        match relay {
            Relay::Exited(Ok(status)) => {
                self.job.exit_code = status.code();
                if status.success() {
                    self.advance(JobState::Succeeded);
                } else {
                    self.advance(JobState::Failed);
                }
            }
            Relay::Exited(Err(e)) => {
                tracing::error!(job = %id, error = %e, "failed to wait for build tool");
                self.job.failure = Some(format!("could not wait for build tool: {e}"));
                self.advance(JobState::Failed);
            }
            Relay::Cancelled => {
                let _ = event_tx.send(JobEvent::Info(InfoEvent::Cancelling { id }));
                let status = self.shutdown(&mut child).await;
                self.job.exit_code = status.and_then(|s| s.code());
                self.advance(JobState::Cancelled);
            }
        }

        // A descendant may still hold the pipes open; don't wait for it.
        for reader in &readers {
            reader.abort();
        }

        self.finish(&event_tx)
    }

    async fn relay(
        &mut self,
        child: &mut Child,
        line_rx: &mut mpsc::UnboundedReceiver<String>,
        control_rx: &mut mpsc::UnboundedReceiver<EngineControl>,
        event_tx: &mpsc::UnboundedSender<JobEvent>,
    ) -> Relay {
        let mut control_open = true;
        let mut streams_open = true;
        loop {
            tokio::select! {
                biased;
                ctrl = control_rx.recv(), if control_open => match ctrl {
                    Some(EngineControl::Cancel) => return Relay::Cancelled,
                    // Nobody can cancel any more; keep relaying.
                    None => control_open = false,
                },
                line = line_rx.recv(), if streams_open => match line {
                    Some(line) => self.forward(line, event_tx),
                    None => streams_open = false,
                },
                status = child.wait() => {
                    if streams_open {
                        self.drain(line_rx, event_tx).await;
                    }
                    return Relay::Exited(status);
                }
            }
        }
    }

    /// Relay what the exited tool left in its pipes. A descendant that
    /// inherited stdout can keep them open, so stop after `OUTPUT_DRAIN`.
    async fn drain(
        &mut self,
        line_rx: &mut mpsc::UnboundedReceiver<String>,
        event_tx: &mpsc::UnboundedSender<JobEvent>,
    ) {
        let deadline = tokio::time::sleep(OUTPUT_DRAIN);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                line = line_rx.recv() => match line {
                    Some(line) => self.forward(line, event_tx),
                    None => return,
                },
                _ = &mut deadline => {
                    tracing::debug!(job = %self.job.id, "output pipes still open after exit, not waiting");
                    return;
                }
            }
        }
    }

    fn forward(&mut self, line: String, event_tx: &mpsc::UnboundedSender<JobEvent>) {
        self.job.push_output(line.clone());
        let _ = event_tx.send(JobEvent::Output {
            id: self.job.id,
            line,
        });
    }

    async fn shutdown(&self, child: &mut Child) -> Option<ExitStatus> {
        let id = self.job.id;
        if let Err(e) = self.launcher.terminate(child) {
            tracing::warn!(job = %id, error = %e, "termination request failed");
        }
        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(job = %id, error = %e, "failed to reap cancelled build tool");
                None
            }
            Err(_) => {
                tracing::warn!(
                    job = %id,
                    grace = ?self.grace_period,
                    "build tool ignored termination, killing"
                );
                if let Err(e) = force_kill(child) {
                    tracing::warn!(job = %id, error = %e, "force kill failed");
                }
                child.wait().await.ok()
            }
        }
    }

    fn advance(&mut self, next: JobState) {
        if let Err(e) = self.job.advance(next) {
            tracing::error!(error = %e, "job state machine rejected transition");
        }
    }

    fn finish(self, event_tx: &mpsc::UnboundedSender<JobEvent>) -> MigrationJob {
        tracing::info!(
            job = %self.job.id,
            state = ?self.job.state,
            exit_code = ?self.job.exit_code,
            lines = self.job.output_log.len(),
            "{}",
            self.job.summary()
        );
        let _ = event_tx.send(JobEvent::Finished {
            job: Box::new(self.job.clone()),
        });
        self.job
    }
}

/// Fake launchers shared by engine and runner tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::process::Command;

    /// Runs a shell script in place of the build tool and counts calls.
    #[derive(Default)]
    pub struct ScriptLauncher {
        pub script: String,
        pub fail_with: Option<io::ErrorKind>,
        pub spawns: AtomicUsize,
        pub terminations: AtomicUsize,
    }

    impl ScriptLauncher {
        pub fn new(script: &str) -> Arc<Self> {
            Arc::new(Self {
                script: script.to_string(),
                ..Default::default()
            })
        }

        pub fn failing(kind: io::ErrorKind) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Some(kind),
                ..Default::default()
            })
        }

        pub fn spawn_count(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }

        pub fn termination_count(&self) -> usize {
            self.terminations.load(Ordering::SeqCst)
        }
    }

    impl ProcessLauncher for ScriptLauncher {
        fn spawn(&self, _command: &MigrationCommand) -> io::Result<Child> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            if let Some(kind) = self.fail_with {
                return Err(io::Error::new(kind, "fake launch failure"));
            }
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.script);
            process::piped(&mut cmd).spawn()
        }

        fn terminate(&self, child: &Child) -> io::Result<()> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            process::request_termination(child)
        }
    }

    /// Spawns a process that never writes and ignores SIGTERM.
    pub struct StubbornLauncher {
        pub terminations: AtomicUsize,
    }

    impl ProcessLauncher for StubbornLauncher {
        fn spawn(&self, _command: &MigrationCommand) -> io::Result<Child> {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("trap '' TERM; while :; do sleep 1; done");
            process::piped(&mut cmd).spawn()
        }

        fn terminate(&self, child: &Child) -> io::Result<()> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            process::request_termination(child)
        }
    }
}
