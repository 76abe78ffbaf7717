//! Tracing setup.
//!
//! The TUI owns the terminal, so in that mode logs always go to a file.
//! Headless runs log to stderr unless `--log-file` is given.

use crate::cli::Cli;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

pub fn init(args: &Cli) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_target(false);

    let log_file = if args.uses_tui() {
        Some(
            args.log_file
                .clone()
                .unwrap_or_else(crate::storage::default_log_path),
        )
    } else {
        args.log_file.clone()
    };

    match log_file {
        Some(path) => {
            let file = open_log_file(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("init logging: {e}"))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("init logging: {e}")),
    }
}
