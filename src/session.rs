//! The virtual terminal session.
//!
//! A session is an interactive shell emulation owned by the dispatcher: a
//! working directory, an append-only scrollback, a command history, and at
//! most one foreground child process. Built-in commands are interpreted
//! here; anything else is handed to the host shell. Output and exit
//! observations arrive as events and are applied by the dispatcher through
//! `push_output` and `on_child_exit`, so the foreground slot is only ever
//! touched by the spawn path and the exit path.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::events::Event;
use crate::output::Scrollback;
use crate::resolver::{self, ArgVector};
use crate::spawner::{self, ProcessHandle, SpawnMode};

/// Identity of one terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "term-{}", self.0)
    }
}

/// Session lifecycle. `Closed` is terminal: further input is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No foreground process; input is executed as it arrives.
    Idle,
    /// A foreground process is alive. New input is recorded in history but
    /// an external command is rejected rather than queued, so two
    /// foreground processes can never coexist.
    Executing,
    Closed,
}

// What a submitted line turned out to be. Resolved against the history as
// it stood before the line itself is recorded.
enum Dispatch {
    Help,
    Clear,
    History(Vec<String>),
    Cd(String),
    Exit,
    Replay(String),
    Reject(String),
    External(String),
}

/// One interactive terminal session.
pub struct TerminalSession {
    id: SessionId,
    state: SessionState,
    cwd: PathBuf,
    scrollback: Scrollback,
    history: Vec<String>,
    cursor: Option<usize>,
    foreground: Option<ProcessHandle>,
    events: mpsc::Sender<Event>,
    closed_tx: Option<oneshot::Sender<()>>,
}

impl TerminalSession {
    /// Creates an idle session. `cwd` is used when it names an existing
    /// directory; otherwise the user's home directory (or the current one)
    /// is the starting point. The returned receiver fires exactly once,
    /// when the session is torn down, so the owning window knows to close.
    pub fn new(
        id: SessionId,
        cwd: Option<PathBuf>,
        events: mpsc::Sender<Event>,
    ) -> (Self, oneshot::Receiver<()>) {
        let cwd = cwd
            .filter(|dir| dir.is_dir())
            .or_else(dirs::home_dir)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let (closed_tx, closed_rx) = oneshot::channel();
        let mut session = Self {
            id,
            state: SessionState::Idle,
            cwd,
            scrollback: Scrollback::new(),
            history: Vec::new(),
            cursor: None,
            foreground: None,
            events,
            closed_tx: Some(closed_tx),
        };
        session.push_banner();
        (session, closed_rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Whether a foreground child is currently owned by this session.
    pub fn has_foreground(&self) -> bool {
        self.foreground.is_some()
    }

    /// Handles one input line from the user. Empty lines are ignored; a
    /// closed session ignores everything.
    pub fn submit(&mut self, line: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        self.scrollback.push(format!("> {line}"));
        let dispatch = self.parse(line);
        self.history.push(line.to_string());
        self.cursor = None;

        match dispatch {
            Dispatch::Help => self.push_help(),
            Dispatch::Clear => {
                self.scrollback.clear();
                self.push_banner();
            }
            Dispatch::History(listing) => {
                for entry in listing {
                    self.scrollback.push(entry);
                }
            }
            Dispatch::Cd(target) => self.change_directory(&target),
            Dispatch::Exit => self.close(),
            Dispatch::Replay(command) => {
                self.scrollback.push(format!("replay: {command}"));
                self.execute_external(&command);
            }
            Dispatch::Reject(message) => self.scrollback.push(message),
            Dispatch::External(command) => self.execute_external(&command),
        }
    }

    // Built-ins are matched case-insensitively before anything reaches the
    // shell. The just-submitted line is not part of the history yet, so
    // `history` never lists itself and `!N` cannot resolve to itself.
    fn parse(&self, line: &str) -> Dispatch {
        let lower = line.to_ascii_lowercase();
        match lower.as_str() {
            "help" => return Dispatch::Help,
            "clear" => return Dispatch::Clear,
            "exit" => return Dispatch::Exit,
            "history" => {
                if self.history.is_empty() {
                    return Dispatch::History(vec!["no commands recorded yet".into()]);
                }
                let mut listing = vec!["command history:".to_string()];
                listing.extend(
                    self.history
                        .iter()
                        .enumerate()
                        .map(|(index, entry)| format!("{:3}: {}", index + 1, entry)),
                );
                return Dispatch::History(listing);
            }
            _ => {}
        }
        if let Some(target) = lower.strip_prefix("cd ") {
            // Take the target from the original line to keep its case.
            let target = line[line.len() - target.len()..].trim();
            return Dispatch::Cd(target.to_string());
        }
        if let Some(reference) = line.strip_prefix('!') {
            if !reference.is_empty() {
                return match reference.trim().parse::<usize>() {
                    Ok(n) if n >= 1 && n <= self.history.len() => {
                        Dispatch::Replay(self.history[n - 1].clone())
                    }
                    Ok(n) => Dispatch::Reject(format!("history entry {n} is out of range")),
                    Err(_) => Dispatch::Reject(format!("invalid history reference: !{reference}")),
                };
            }
        }
        Dispatch::External(line.to_string())
    }

    /// Runs `command` through the host shell in the session's working
    /// directory. Rejected with a notice while another command is in
    /// flight.
    pub fn execute_external(&mut self, command: &str) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Executing => {
                self.scrollback
                    .push("a command is already running; wait for it to finish");
                return;
            }
            SessionState::Idle => {}
        }
        let (shell, flag) = host_shell();
        let argv = ArgVector::new(shell).arg(flag).arg(command);
        self.run(argv);
    }

    /// Tool-launch variant: validates the environment executable the same
    /// way the resolver does and runs `[executable, parameters.., command]`
    /// without a shell. Failures are written to the scrollback, never
    /// thrown, because the terminal window is already open and must stay
    /// usable.
    pub fn execute_with_environment(&mut self, command: &str, executable: &str, parameters: &str) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Executing => {
                self.scrollback
                    .push("a command is already running; wait for it to finish");
                return;
            }
            SessionState::Idle => {}
        }
        self.scrollback.push(format!("launching: {command}"));
        if let Err(err) = resolver::check_executable(executable) {
            self.scrollback.push(err.to_string());
            self.scrollback
                .push("check the tool's environment configuration");
            return;
        }
        let argv = ArgVector::new(executable.trim())
            .args_from(parameters)
            .arg(command);
        self.run(argv);
    }

    fn run(&mut self, argv: ArgVector) {
        match spawner::spawn(&argv, Some(&self.cwd), SpawnMode::Piped) {
            Ok(spawned) => {
                debug!(session = %self.id, pid = ?spawned.handle.pid(), "foreground command started");
                if let Some(stdout) = spawned.stdout {
                    spawn_reader(self.id, stdout, self.events.clone());
                }
                if let Some(stderr) = spawned.stderr {
                    spawn_reader(self.id, stderr, self.events.clone());
                }
                let exit_rx = spawned.handle.exit_watch();
                let events = self.events.clone();
                let id = self.id;
                tokio::spawn(async move {
                    let code = spawner::wait_exit(exit_rx).await;
                    let _ = events.send(Event::SessionExited { session: id, code }).await;
                });
                self.foreground = Some(spawned.handle);
                self.state = SessionState::Executing;
            }
            Err(err) => {
                self.scrollback.push(format!("failed to run command: {err}"));
            }
        }
    }

    /// Applies a line of foreground output. Dropped silently once closed.
    pub fn push_output(&mut self, line: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        self.scrollback.push(line);
    }

    /// Applies an observed foreground exit: frees the slot and reports the
    /// code. Ignored once closed, where the kill-induced exit is routine.
    pub fn on_child_exit(&mut self, code: Option<i32>) {
        self.foreground = None;
        if self.state != SessionState::Executing {
            return;
        }
        self.state = SessionState::Idle;
        match code {
            Some(code) => self.scrollback.push(format!("process exited with code {code}")),
            None => self.scrollback.push("process terminated"),
        }
    }

    /// Tears the session down: force-kills any foreground child, fires the
    /// closed event, and refuses all further input. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(handle) = self.foreground.take() {
            handle.kill_forcibly();
        }
        self.state = SessionState::Closed;
        self.scrollback.push("terminal closed");
        debug!(session = %self.id, "session closed");
        if let Some(closed) = self.closed_tx.take() {
            let _ = closed.send(());
        }
        let _ = self.events.try_send(Event::SessionClosed { session: self.id });
    }

    /// Steps backwards through history for an up-arrow style frontend.
    /// Never mutates the list.
    pub fn history_prev(&mut self) -> Option<&str> {
        if self.history.is_empty() {
            return None;
        }
        let index = match self.cursor {
            None => self.history.len() - 1,
            Some(0) => 0,
            Some(index) => index - 1,
        };
        self.cursor = Some(index);
        Some(&self.history[index])
    }

    /// Steps forwards; stepping past the newest entry clears the cursor and
    /// returns `None` so the frontend empties its input line.
    pub fn history_next(&mut self) -> Option<&str> {
        let index = self.cursor?;
        if index + 1 < self.history.len() {
            self.cursor = Some(index + 1);
            Some(&self.history[index + 1])
        } else {
            self.cursor = None;
            None
        }
    }

    fn change_directory(&mut self, target: &str) {
        if target.is_empty() {
            match dirs::home_dir() {
                Some(home) => {
                    self.cwd = home;
                    self.scrollback
                        .push(format!("working directory: {}", self.cwd.display()));
                }
                None => self.scrollback.push("no home directory to change to"),
            }
            return;
        }
        let target = Path::new(target);
        let candidate = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.cwd.join(target)
        };
        if candidate.is_dir() {
            self.cwd = std::fs::canonicalize(&candidate).unwrap_or(candidate);
            self.scrollback
                .push(format!("working directory: {}", self.cwd.display()));
        } else {
            self.scrollback
                .push(format!("no such directory: {}", candidate.display()));
        }
    }

    fn push_banner(&mut self) {
        self.scrollback.push("=== virtual terminal ===");
        self.scrollback
            .push(format!("working directory: {}", self.cwd.display()));
        self.scrollback.push("type 'help' for a command summary");
    }

    fn push_help(&mut self) {
        for line in [
            "available commands:",
            "  help       show this summary",
            "  clear      clear the scrollback",
            "  history    list recorded commands",
            "  cd <dir>   change the working directory",
            "  exit       close the terminal",
            "  !<n>       re-run the nth command from history",
            "anything else is passed to the system shell",
        ] {
            self.scrollback.push(line);
        }
    }
}

#[cfg(windows)]
fn host_shell() -> (&'static str, &'static str) {
    ("cmd", "/c")
}

#[cfg(not(windows))]
fn host_shell() -> (&'static str, &'static str) {
    ("/bin/sh", "-c")
}

// One reader per captured stream; lines from both converge in the session's
// scrollback, which is where stdout and stderr merge. A closed stream is
// plain end-of-output, including the closure caused by a force-kill.
fn spawn_reader<R>(id: SessionId, reader: R, events: mpsc::Sender<Event>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events
                        .send(Event::SessionOutput { session: id, line })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    // Report the read failure in the scrollback and stop;
                    // the waiter still delivers the exit code.
                    let _ = events
                        .send(Event::SessionOutput {
                            session: id,
                            line: format!("error reading process output: {err}"),
                        })
                        .await;
                    return;
                }
            }
        }
    });
}
