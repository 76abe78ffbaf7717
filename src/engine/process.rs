use super::MigrationCommand;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Seam between the job engine and the operating system.
pub trait ProcessLauncher: Send + Sync {
    /// Start the build tool with stdout and stderr piped.
    fn spawn(&self, command: &MigrationCommand) -> io::Result<Child>;

    /// Ask a running process to exit on its own.
    fn terminate(&self, child: &Child) -> io::Result<()> {
        request_termination(child)
    }
}

/// Launches the real automation tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, command: &MigrationCommand) -> io::Result<Child> {
        let mut cmd = Command::new(&command.program);
        cmd.args(command.args());
        piped(&mut cmd).spawn()
    }
}

/// Configure a command the way the job engine expects to read it.
///
/// On Unix the child leads its own process group so termination reaches the
/// tools RunUAT starts, and a terminal ctrl-c goes to us alone.
pub fn piped(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
}

fn child_pid(child: &Child) -> io::Result<u32> {
    child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already reaped"))
}

/// Run a short helper command, failing on a nonzero exit.
fn run_helper(program: &str, args: &[&str]) -> io::Result<()> {
    let status = std::process::Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{program} {} exited with {status}", args.join(" ")),
        ))
    }
}

/// Send `signal` to the whole process group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: u32, signal: &str) -> io::Result<()> {
    run_helper("kill", &[signal, "--", &format!("-{pid}")])
}

#[cfg(unix)]
pub fn request_termination(child: &Child) -> io::Result<()> {
    signal_group(child_pid(child)?, "-TERM")
}

#[cfg(windows)]
pub fn request_termination(child: &Child) -> io::Result<()> {
    // /T takes the UAT child processes down with the batch file.
    run_helper("taskkill", &["/PID", &child_pid(child)?.to_string(), "/T"])
}

/// Kill a process tree that ignored the termination request.
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    if let Ok(pid) = child_pid(child) {
        #[cfg(unix)]
        let tree = signal_group(pid, "-KILL");
        #[cfg(windows)]
        let tree = run_helper("taskkill", &["/PID", &pid.to_string(), "/T", "/F"]);
        if let Err(e) = tree {
            tracing::warn!(pid, error = %e, "failed to kill build process tree");
        }
    }
    child.start_kill()
}

/// Forward each non-empty line of `reader` to `tx` until EOF.
///
/// Bytes are decoded lossily so a stray code-page character does not end the
/// relay early.
pub fn spawn_line_reader<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "output stream closed with error");
                    break;
                }
            }
        }
    })
}
