use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// File name for an exported build log, e.g. `migration-3-2026-10-19_12-00-00Z.log`.
fn export_file_name(state: &UiState) -> String {
    let (id, stamp) = match &state.last_job {
        Some(job) => (
            job.id.0.to_string(),
            job.finished_at.clone().unwrap_or_default(),
        ),
        None => ("live".to_string(), String::new()),
    };
    let stamp = if stamp.is_empty() {
        time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into())
    } else {
        stamp
    };
    format!(
        "migration-{}-{}.log",
        id,
        stamp.replace(':', "-").replace('T', "_")
    )
}

/// Write the on-screen build output to the current directory.
/// Returns the absolute path of the exported file.
pub fn export_log(state: &UiState) -> Result<PathBuf> {
    if state.log.is_empty() {
        anyhow::bail!("no build output to export yet");
    }
    let current_dir = std::env::current_dir().context("get current directory")?;
    let path = current_dir.join(export_file_name(state));
    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("create {}", path.display()))?;
    for line in &state.log {
        writeln!(file, "{line}").with_context(|| format!("write {}", path.display()))?;
    }
    tracing::info!(path = %path.display(), lines = state.log.len(), "exported build log");
    Ok(path)
}

/// Start the clipboard thread on first use.
/// Each clipboard instance is kept alive for a while so clipboard managers on
/// Linux get a chance to read it.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                match Clipboard::new() {
                    Ok(mut clipboard) => {
                        if clipboard.set_text(&text).is_ok() {
                            std::thread::sleep(Duration::from_secs(2));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "clipboard unavailable"),
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_name_is_filesystem_safe() {
        let state = UiState::default();
        let name = export_file_name(&state);
        assert!(name.starts_with("migration-live-"));
        assert!(name.ends_with(".log"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn empty_log_is_not_exported() {
        let state = UiState::default();
        assert!(export_log(&state).is_err());
    }
}
