use crate::engine::SystemLauncher;
use crate::model::{JobEvent, JobState, MigrationJob, PathCategory, RunConfig, Selection};
use crate::orchestrator::MigrationRunner;
use crate::storage::{self, PathCache};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Exit code reported when the user interrupts a headless run.
const EXIT_CANCELLED: i32 = 130;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "unreal-plugin-migrator",
    version,
    about = "Package and migrate Unreal Engine plugins with RunUAT BuildPlugin"
)]
pub struct Cli {
    /// Plugin descriptor (*.uplugin) to preselect
    #[arg(long)]
    pub plugin: Option<String>,

    /// Unreal Engine root folder to preselect (e.g. "C:\Program Files\Epic Games\UE_5.3")
    #[arg(long)]
    pub engine: Option<String>,

    /// Destination folder to preselect; the package lands in <dest>/Migrated
    #[arg(long)]
    pub dest: Option<String>,

    /// Run the migration headless, streaming build output to stdout (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Print the remembered paths as JSON and exit
    #[arg(long)]
    pub print_cache: bool,

    /// Path cache file (defaults to the user config directory)
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// How long a cancelled build gets to exit before it is killed
    #[arg(long, default_value = "5s")]
    pub grace_period: humantime::Duration,

    /// Write logs to this file (the TUI always logs to a file)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log verbosity: error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

impl Cli {
    pub fn cache_path(&self) -> PathBuf {
        self.cache_file
            .clone()
            .unwrap_or_else(storage::default_cache_path)
    }

    /// Whether this invocation ends up in the interactive UI.
    pub fn uses_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.text && !self.print_cache
    }
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        grace_period: Duration::from(args.grace_period),
        ..Default::default()
    }
}

/// Normalize the paths given on the command line, remember them, and turn
/// them into the initial selection.
pub fn initial_selection(args: &Cli, cache: &mut PathCache) -> Selection {
    let mut selection = Selection::default();
    let given = [
        (PathCategory::Plugin, args.plugin.as_deref()),
        (PathCategory::Destination, args.dest.as_deref()),
        (PathCategory::Engine, args.engine.as_deref()),
    ];
    for (category, raw) in given {
        if let Some(path) = raw.and_then(storage::normalize_path) {
            cache.add(category, &path);
            selection.set(category, Some(path));
        }
    }
    selection
}

/// Run the selected front-end and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let mut cache = PathCache::load(args.cache_path());
    let selection = initial_selection(&args, &mut cache);

    if args.print_cache {
        println!("{}", cache.to_json().context("render path cache")?);
        return Ok(0);
    }

    if args.uses_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, cache, selection).await.map(|()| 0);
        }
    }

    run_text(args, selection).await
}

/// What a ctrl-c in text mode does.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// First press: stop the build gracefully.
    Cancel,
    /// Any later press: stop waiting and exit.
    ForceQuit,
}

fn on_interrupt(interrupted: &mut bool) -> Interrupt {
    if std::mem::replace(interrupted, true) {
        Interrupt::ForceQuit
    } else {
        Interrupt::Cancel
    }
}

/// Map a finished job to the exit code of this process.
fn exit_code_for(job: &MigrationJob) -> i32 {
    match job.state {
        JobState::Succeeded => 0,
        JobState::Cancelled => EXIT_CANCELLED,
        _ => job.exit_code.filter(|c| *c != 0).unwrap_or(1),
    }
}

async fn run_text(args: Cli, selection: Selection) -> Result<i32> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();

    let mut runner = MigrationRunner::new(Arc::new(SystemLauncher), cfg.grace_period);
    let started = runner.start(&selection, evt_tx);

    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    let mut interrupted = false;
    let mut exit_code = 1;

    loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    JobEvent::Started { command, .. } => {
                        let _ = out_tx.send(OutputLine::Stderr(format!("Running: {command}")));
                    }
                    JobEvent::Output { line, .. } => {
                        let _ = out_tx.send(OutputLine::Stdout(line));
                    }
                    JobEvent::Info(info) => {
                        let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                    }
                    JobEvent::Finished { job } => {
                        let _ = out_tx.send(OutputLine::Stderr(job.summary()));
                        exit_code = exit_code_for(&job);
                    }
                }
            }
            _ = &mut ctrl_c => {
                ctrl_c = Box::pin(tokio::signal::ctrl_c());
                match on_interrupt(&mut interrupted) {
                    Interrupt::Cancel => {
                        let _ = out_tx.send(OutputLine::Stderr(
                            "Stopping migration, press ctrl-c again to quit now".into(),
                        ));
                        if let Ok(handle) = &started {
                            runner.cancel(handle);
                        }
                    }
                    Interrupt::ForceQuit => {
                        tracing::warn!("second interrupt, exiting without waiting for the build tool");
                        drop(out_tx);
                        let _ = out_handle.await;
                        return Ok(EXIT_CANCELLED);
                    }
                }
            }
        }
    }

    if let Some(Err(e)) = runner.wait().await {
        let _ = out_tx.send(OutputLine::Stderr(format!("Migration task failed: {e}")));
    }
    drop(out_tx);
    let _ = out_handle.await;

    match started {
        Ok(_) => Ok(exit_code),
        Err(e) => Err(e).context("cannot start migration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobId, ValidatedPaths};
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("unreal-plugin-migrator").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_parse() {
        let cli = parse(&[]);
        assert!(!cli.text);
        assert_eq!(build_config(&cli).grace_period, Duration::from_secs(5));
        assert_eq!(cli.log_level, tracing::Level::INFO);
    }

    #[test]
    fn grace_period_accepts_humantime() {
        let cli = parse(&["--grace-period", "1500ms", "--log-level", "debug"]);
        assert_eq!(build_config(&cli).grace_period, Duration::from_millis(1500));
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn cli_paths_are_normalized_and_remembered() {
        let dir = tempdir().unwrap();
        let cache_file = dir.path().join("cache.json");
        let cli = parse(&[
            "--plugin",
            " \"/work/Foo/Foo.uplugin\" ",
            "--engine",
            "/opt/UE_5.3/",
            "--cache-file",
            cache_file.to_str().unwrap(),
        ]);
        let mut cache = PathCache::load(cli.cache_path());
        let sel = initial_selection(&cli, &mut cache);

        assert_eq!(sel.plugin.as_deref(), Some("/work/Foo/Foo.uplugin"));
        assert_eq!(sel.engine.as_deref(), Some("/opt/UE_5.3"));
        assert_eq!(sel.destination, None);
        let reloaded = PathCache::load(&cache_file);
        assert_eq!(reloaded.front(PathCategory::Engine), Some("/opt/UE_5.3"));
        assert!(reloaded.entries(PathCategory::Destination).is_empty());
    }

    #[test]
    fn second_interrupt_forces_quit() {
        let mut interrupted = false;
        assert_eq!(on_interrupt(&mut interrupted), Interrupt::Cancel);
        assert!(interrupted);
        assert_eq!(on_interrupt(&mut interrupted), Interrupt::ForceQuit);
        assert_eq!(on_interrupt(&mut interrupted), Interrupt::ForceQuit);
    }

    #[test]
    fn exit_codes_follow_job_outcome() {
        let paths = ValidatedPaths {
            engine: "/e".into(),
            plugin: "/p.uplugin".into(),
            destination: "/d".into(),
        };
        let finished = |state: JobState, code: Option<i32>| {
            let mut job = MigrationJob::new(JobId(1), paths.clone());
            job.advance(JobState::Running).unwrap();
            job.exit_code = code;
            job.advance(state).unwrap();
            job
        };
        assert_eq!(exit_code_for(&finished(JobState::Succeeded, Some(0))), 0);
        assert_eq!(exit_code_for(&finished(JobState::Failed, Some(25))), 25);
        assert_eq!(exit_code_for(&finished(JobState::Failed, None)), 1);
        assert_eq!(exit_code_for(&finished(JobState::Cancelled, None)), EXIT_CANCELLED);
    }
}
