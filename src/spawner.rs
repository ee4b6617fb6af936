//! Process creation and handle ownership.
//!
//! `spawn` builds the OS command for a resolved argv and starts it in one of
//! two modes: `Detached` for GUI tools (own process group, output discarded)
//! and `Piped` for terminal sessions (stdout and stderr captured). Every
//! spawn starts one long-lived waiter task that owns the child, blocks on
//! its exit, and publishes the exit state on a watch channel. Kill requests
//! travel to the waiter over a second channel, so a force-kill is always
//! observed as a normal exit by whoever is waiting.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tracing::debug;

use crate::resolver::ArgVector;

/// The OS refused to create the process. Carries the resolved program for
/// diagnosability alongside the underlying error.
#[derive(Debug, thiserror::Error)]
#[error("failed to start {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// How the child's standard streams and lifetime are set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// GUI tool: detached into its own process group, all streams null,
    /// survives this process unless explicitly stopped.
    Detached,
    /// Session command: stdout/stderr piped for capture, killed as a
    /// backstop if its handle is dropped while still running.
    Piped,
}

/// Observed lifecycle of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Exited with the given code; `None` means terminated by a signal.
    Exited(Option<i32>),
}

/// Owner-facing view of a spawned process. Exclusively owned by the
/// registry entry or terminal session that created it; other components
/// observe exit through `exit_watch`.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: watch::Sender<bool>,
    exit_rx: watch::Receiver<ExitState>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has not yet been observed to exit. Recomputed
    /// from the waiter's published state on every call.
    pub fn is_alive(&self) -> bool {
        matches!(*self.exit_rx.borrow(), ExitState::Running)
    }

    /// A receiver monitor tasks can block on without taking ownership of
    /// the handle.
    pub fn exit_watch(&self) -> watch::Receiver<ExitState> {
        self.exit_rx.clone()
    }

    /// Blocks until the process exits and returns its code (`None` for
    /// signal termination). No timeout: a hung child hangs its caller until
    /// force-killed.
    pub async fn wait(&self) -> Option<i32> {
        wait_exit(self.exit_rx.clone()).await
    }

    /// Requests termination. Idempotent: safe to call repeatedly, on an
    /// already-dead process, and concurrently with an in-flight `wait`.
    pub fn kill_forcibly(&self) {
        let _ = self.kill_tx.send(true);
    }
}

/// A freshly spawned process. The capture streams are present in `Piped`
/// mode only and are taken by the session's reader tasks.
#[derive(Debug)]
pub struct Spawned {
    pub handle: ProcessHandle,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Spawns `argv` with `cwd` as working directory. A missing or non-directory
/// `cwd` falls back silently to the inherited working directory, since the
/// working directory is optional metadata on a tool.
pub fn spawn(argv: &ArgVector, cwd: Option<&Path>, mode: SpawnMode) -> Result<Spawned, SpawnError> {
    let mut command = Command::new(argv.program());
    command.args(argv.args());
    if let Some(dir) = cwd.filter(|dir| dir.is_dir()) {
        command.current_dir(dir);
    }

    match mode {
        SpawnMode::Detached => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());

            #[cfg(windows)]
            {
                const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
                command.creation_flags(CREATE_NEW_PROCESS_GROUP);
            }

            #[cfg(unix)]
            unsafe {
                command.pre_exec(|| {
                    let _ = libc::setpgid(0, 0);
                    Ok(())
                });
            }
        }
        SpawnMode::Piped => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            command.kill_on_drop(true);
        }
    }

    let mut child = command.spawn().map_err(|source| SpawnError {
        program: argv.program().to_string(),
        source,
    })?;
    let pid = child.id();
    debug!(program = argv.program(), ?pid, ?mode, "spawned process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (kill_tx, kill_rx) = watch::channel(false);
    let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
    tokio::spawn(waiter(child, kill_rx, exit_tx));

    Ok(Spawned {
        handle: ProcessHandle {
            pid,
            kill_tx,
            exit_rx,
        },
        stdout,
        stderr,
    })
}

/// Blocks until the watched process exits and yields its code.
pub async fn wait_exit(mut exit_rx: watch::Receiver<ExitState>) -> Option<i32> {
    loop {
        if let ExitState::Exited(code) = *exit_rx.borrow_and_update() {
            return code;
        }
        if exit_rx.changed().await.is_err() {
            // Sender gone without a published exit; nothing more to learn.
            return match *exit_rx.borrow() {
                ExitState::Exited(code) => code,
                ExitState::Running => None,
            };
        }
    }
}

// One per process. Owns the child for its whole lifetime, so waiting and
// killing can never race on the handle.
async fn waiter(mut child: Child, mut kill_rx: watch::Receiver<bool>, exit_tx: watch::Sender<ExitState>) {
    loop {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|status| status.code());
                debug!(?code, "process exited");
                let _ = exit_tx.send(ExitState::Exited(code));
                return;
            }
            changed = kill_rx.changed() => {
                match changed {
                    Ok(()) => {
                        if *kill_rx.borrow_and_update() {
                            debug!(pid = ?child.id(), "force-killing process");
                            let _ = child.start_kill();
                        }
                    }
                    Err(_) => {
                        // Handle dropped; keep waiting so the exit state is
                        // still published for any outstanding watch.
                        let code = child.wait().await.ok().and_then(|status| status.code());
                        let _ = exit_tx.send(ExitState::Exited(code));
                        return;
                    }
                }
            }
        }
    }
}
