//! Run lifecycle controller.
//!
//! Owns start/stop orchestration and emits events for presentation layers.

use super::runner::{JobHandle, MigrationRunner};
use crate::engine::ProcessLauncher;
use crate::model::{InfoEvent, JobEvent, RunConfig, Selection};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers to control migrations.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(Selection),
    Cancel,
    Quit,
}

/// Serve UI commands until `Quit` (or the command channel closes) and emit
/// job events back to presentation layers.
pub(crate) async fn run_controller(
    cfg: &RunConfig,
    launcher: Arc<dyn ProcessLauncher>,
    event_tx: UnboundedSender<JobEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut runner = MigrationRunner::new(launcher, cfg.grace_period);
    let mut active: Option<JobHandle> = None;
    let mut quit_pending = false;
    // Cancel watchdog: if a cancel takes too long, emit a status message to keep UI feedback alive.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Start(selection)) => {
                        // Rejections are reported on event_tx by the runner itself.
                        if let Ok(handle) = runner.start(&selection, event_tx.clone()) {
                            active = Some(handle);
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        if let Some(handle) = &active {
                            if runner.cancel(handle) {
                                cancel_deadline = Some(tokio::time::Instant::now() + cfg.grace_period + cfg.cancel_watchdog);
                            }
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current job so the build tool is never orphaned.
                        quit_pending = true;
                        match &active {
                            Some(handle) if runner.cancel(handle) => {
                                cancel_deadline = Some(tokio::time::Instant::now() + cfg.grace_period + cfg.cancel_watchdog);
                            }
                            _ if runner.running().is_some() => {}
                            _ => break Ok(()),
                        }
                    }
                }
            }
            join_res = runner.finished() => {
                if let Err(e) = join_res {
                    tracing::error!(error = %e, "migration task failed");
                    let _ = event_tx.send(JobEvent::Info(InfoEvent::TaskFailed(e.to_string())));
                }
                active = None;
                cancel_deadline = None;
                if quit_pending {
                    break Ok(());
                }
            }
            // If cancel stalls, keep the user informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline {
                        if let Some(id) = runner.running() {
                            let _ = event_tx.send(JobEvent::Info(InfoEvent::StillCancelling { id }));
                        }
                        cancel_deadline = None;
                    }
                }
            }
        }
    };

    res
}
