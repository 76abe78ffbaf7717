//! Application-level orchestration.
//!
//! This module owns job lifecycle control (start/stop, the one-job-at-a-time
//! guard, cancel watchdog). UI/CLI layers call into it and receive `JobEvent`s
//! back, so no presentation code touches the build process directly.

mod controller;
mod runner;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use runner::MigrationRunner;
