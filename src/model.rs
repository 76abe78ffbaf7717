use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::engine::MigrationCommand;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// How long a cancelled build gets to exit before it is force-killed.
    pub grace_period: Duration,
    /// Delay after a cancel request before the UI is told the stop is still pending.
    pub cancel_watchdog: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            cancel_watchdog: Duration::from_secs(3),
        }
    }
}

/// The three path roles remembered between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathCategory {
    Plugin,
    Destination,
    Engine,
}

/// What kind of picker a category needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickKind {
    File { extension: &'static str },
    Folder,
}

impl PathCategory {
    pub const ALL: [PathCategory; 3] = [
        PathCategory::Plugin,
        PathCategory::Destination,
        PathCategory::Engine,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PathCategory::Plugin => ".uplugin file",
            PathCategory::Destination => "Destination folder",
            PathCategory::Engine => "UE root folder",
        }
    }

    pub fn pick_kind(self) -> PickKind {
        match self {
            PathCategory::Plugin => PickKind::File {
                extension: "uplugin",
            },
            PathCategory::Destination | PathCategory::Engine => PickKind::Folder,
        }
    }

    pub fn index(self) -> usize {
        match self {
            PathCategory::Plugin => 0,
            PathCategory::Destination => 1,
            PathCategory::Engine => 2,
        }
    }
}

impl fmt::Display for PathCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current user selection. `None` means nothing has been picked for that role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub plugin: Option<String>,
    pub destination: Option<String>,
    pub engine: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing selection: {}", .missing.iter().map(|c| c.label()).collect::<Vec<_>>().join(", "))]
pub struct ValidationError {
    pub missing: Vec<PathCategory>,
}

/// Three paths that passed validation and can form a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPaths {
    pub engine: PathBuf,
    pub plugin: PathBuf,
    pub destination: PathBuf,
}

impl Selection {
    pub fn get(&self, category: PathCategory) -> Option<&str> {
        match category {
            PathCategory::Plugin => self.plugin.as_deref(),
            PathCategory::Destination => self.destination.as_deref(),
            PathCategory::Engine => self.engine.as_deref(),
        }
    }

    pub fn set(&mut self, category: PathCategory, value: Option<String>) {
        let slot = match category {
            PathCategory::Plugin => &mut self.plugin,
            PathCategory::Destination => &mut self.destination,
            PathCategory::Engine => &mut self.engine,
        };
        *slot = value;
    }

    pub fn validate(&self) -> Result<ValidatedPaths, ValidationError> {
        let missing: Vec<PathCategory> = PathCategory::ALL
            .into_iter()
            .filter(|c| self.get(*c).map_or(true, |p| p.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError { missing });
        }
        let take = |c: PathCategory| PathBuf::from(self.get(c).unwrap_or_default().trim());
        Ok(ValidatedPaths {
            engine: take(PathCategory::Engine),
            plugin: take(PathCategory::Plugin),
            destination: take(PathCategory::Destination),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    fn can_advance_to(self, next: JobState) -> bool {
        match self {
            JobState::Idle => next == JobState::Running,
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {id}: illegal transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// One end-to-end attempt to run the external build tool.
#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub id: JobId,
    pub engine_path: PathBuf,
    pub plugin_descriptor_path: PathBuf,
    pub destination_path: PathBuf,
    pub command: MigrationCommand,
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub output_log: Vec<String>,
    /// Set when the process could not be launched or was not reaped cleanly.
    pub failure: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl MigrationJob {
    pub fn new(id: JobId, paths: ValidatedPaths) -> Self {
        let command = MigrationCommand::build(&paths.engine, &paths.plugin, &paths.destination);
        Self {
            id,
            engine_path: paths.engine,
            plugin_descriptor_path: paths.plugin,
            destination_path: paths.destination,
            command,
            state: JobState::Idle,
            exit_code: None,
            output_log: Vec::new(),
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next == JobState::Running {
            self.started_at = Some(now_rfc3339());
        } else if next.is_terminal() {
            self.finished_at = Some(now_rfc3339());
        }
        Ok(())
    }

    pub fn push_output(&mut self, line: String) {
        if self.state == JobState::Running {
            self.output_log.push(line);
        }
    }

    /// One-line terminal summary shown after the build output.
    pub fn summary(&self) -> String {
        match self.state {
            JobState::Succeeded => "Plugin migrated successfully (exit code 0)".to_string(),
            JobState::Failed => match (&self.failure, self.exit_code) {
                (Some(reason), _) => format!("Migration failed: {reason}"),
                (None, Some(code)) => format!("Migration failed with exit code {code}"),
                (None, None) => "Migration failed: process terminated without an exit code".to_string(),
            },
            JobState::Cancelled => "Migration cancelled".to_string(),
            JobState::Running => "Migration running".to_string(),
            JobState::Idle => "Migration not started".to_string(),
        }
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Events streamed from the runner to presentation layers, in emission order.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        id: JobId,
        command: String,
    },
    Output {
        id: JobId,
        line: String,
    },
    Info(InfoEvent),
    Finished {
        // Box to keep JobEvent small; the job carries its whole output log.
        job: Box<MigrationJob>,
    },
}

/// Structured notices emitted by the runner and controller.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    ValidationFailed(ValidationError),
    AlreadyRunning { id: JobId },
    Cancelling { id: JobId },
    StillCancelling { id: JobId },
    /// The job task died without reporting a terminal state.
    TaskFailed(String),
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::ValidationFailed(e) => format!("Cannot start migration, {e}"),
            InfoEvent::AlreadyRunning { id } => {
                format!("Migration {id} is still running; stop it before starting another")
            }
            InfoEvent::Cancelling { id } => format!("Cancelling migration {id}…"),
            InfoEvent::StillCancelling { id } => format!("Still cancelling migration {id}…"),
            InfoEvent::TaskFailed(e) => format!("Migration task failed: {e}"),
        }
    }
}
