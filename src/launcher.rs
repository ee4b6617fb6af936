//! Tool launch orchestration.
//!
//! `Launcher::launch` is the single entry point the frontend calls: it
//! validates the tool against its environment, then either spawns a
//! detached GUI process with a monitor task or opens a terminal session and
//! runs the tool inside it. Every successful launch registers exactly one
//! entry in the running-tool registry; a failed validation or spawn
//! registers nothing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::catalog::{Environment, Tool};
use crate::events::Event;
use crate::registry::{EntryId, EntryMode, RunningToolRegistry};
use crate::resolver::{self, ValidationError};
use crate::session::{SessionId, TerminalSession};
use crate::spawner::{self, SpawnError, SpawnMode};

/// Why a launch produced nothing.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// A successful launch. CLI launches hand the new session (and its one-shot
/// closed event) to the caller, who owns it from here on.
pub enum Launched {
    Gui {
        entry: EntryId,
    },
    Cli {
        entry: EntryId,
        session: TerminalSession,
        closed: oneshot::Receiver<()>,
    },
}

/// Builds launches against an injected registry and event channel.
pub struct Launcher {
    registry: Arc<RunningToolRegistry>,
    events: mpsc::Sender<Event>,
    next_session: u64,
}

impl Launcher {
    pub fn new(registry: Arc<RunningToolRegistry>, events: mpsc::Sender<Event>) -> Self {
        Self {
            registry,
            events,
            next_session: 0,
        }
    }

    /// Launches `tool`. `environment` is the catalog lookup result for the
    /// tool's environment id (`None` when nothing matched).
    pub fn launch(
        &mut self,
        tool: &Tool,
        environment: Option<&Environment>,
    ) -> Result<Launched, LaunchError> {
        let argv = resolver::resolve(tool, environment)?;
        if tool.has_gui {
            let entry = self.launch_gui(tool, &argv)?;
            Ok(Launched::Gui { entry })
        } else {
            // resolve() has already rejected a missing environment.
            let Some(environment) = environment else {
                return Err(ValidationError::MissingEnvironment(tool.name.clone()).into());
            };
            Ok(self.launch_cli(tool, environment))
        }
    }

    /// Opens a bare terminal session that is not tied to any tool and not
    /// tracked by the registry.
    pub fn open_terminal(&mut self) -> (TerminalSession, oneshot::Receiver<()>) {
        let id = self.next_session_id();
        TerminalSession::new(id, None, self.events.clone())
    }

    fn launch_gui(&mut self, tool: &Tool, argv: &resolver::ArgVector) -> Result<EntryId, SpawnError> {
        let cwd = tool.working_directory.as_deref().map(Path::new);
        let spawned = spawner::spawn(argv, cwd, SpawnMode::Detached)?;
        info!(tool = %tool.name, pid = ?spawned.handle.pid(), "launched gui tool");

        let exit_rx = spawned.handle.exit_watch();
        let entry = self.registry.register(
            &tool.name,
            EntryMode::Gui {
                handle: spawned.handle,
            },
        );
        self.registry.mark_running(entry);

        let events = self.events.clone();
        tokio::spawn(async move {
            let code = spawner::wait_exit(exit_rx).await;
            let _ = events.send(Event::ToolExited { entry, code }).await;
        });
        Ok(entry)
    }

    fn launch_cli(&mut self, tool: &Tool, environment: &Environment) -> Launched {
        let id = self.next_session_id();
        let cwd = tool
            .working_directory
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        let (mut session, closed) = TerminalSession::new(id, cwd, self.events.clone());
        info!(tool = %tool.name, session = %id, "launching cli tool in a terminal session");

        let entry = self
            .registry
            .register(&tool.name, EntryMode::Cli { session: id });
        self.registry.mark_running(entry);

        session.execute_with_environment(
            &full_command(tool),
            &environment.executable_path,
            environment.parameters.as_deref().unwrap_or(""),
        );
        Launched::Cli {
            entry,
            session,
            closed,
        }
    }

    fn next_session_id(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId::new(self.next_session)
    }
}

// The command string handed to the terminal is the tool's command with its
// arguments appended, exactly as the dashboard's terminal dialog builds it.
fn full_command(tool: &Tool) -> String {
    match tool.arguments.as_deref().map(str::trim) {
        Some(arguments) if !arguments.is_empty() => {
            format!("{} {}", tool.command.trim(), arguments)
        }
        _ => tool.command.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntryState, ModeKind};

    fn harness() -> (Launcher, Arc<RunningToolRegistry>, mpsc::Receiver<Event>) {
        let registry = Arc::new(RunningToolRegistry::new());
        let (events, event_rx) = mpsc::channel(64);
        (Launcher::new(registry.clone(), events), registry, event_rx)
    }

    fn tool(command: &str, has_gui: bool) -> Tool {
        Tool {
            id: "t1".into(),
            name: "probe".into(),
            description: None,
            category_id: None,
            environment_id: Some("e1".into()),
            command: command.into(),
            arguments: None,
            working_directory: None,
            icon_path: None,
            has_gui,
        }
    }

    #[cfg(unix)]
    fn shell_environment() -> Environment {
        Environment {
            id: "e1".into(),
            name: "sh".into(),
            kind: None,
            executable_path: "/bin/sh".into(),
            parameters: Some("-c".into()),
            description: None,
        }
    }

    #[tokio::test]
    async fn validation_failure_registers_nothing() {
        let (mut launcher, registry, _events) = harness();
        let tool = tool("scan", true);
        let result = launcher.launch(&tool, None);
        assert!(matches!(
            result,
            Err(LaunchError::Validation(ValidationError::UnknownEnvironment(_)))
        ));
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gui_launch_registers_exactly_one_running_entry() {
        let (mut launcher, registry, mut events) = harness();
        let environment = shell_environment();
        let tool = tool("sleep 30", true);

        let launched = launcher.launch(&tool, Some(&environment)).unwrap();
        let Launched::Gui { entry } = launched else {
            panic!("expected a gui launch");
        };

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind, ModeKind::Gui);
        assert!(matches!(
            snapshot[0].state,
            EntryState::Starting | EntryState::Running
        ));
        assert!(snapshot[0].alive);

        // Stop it and drive the monitor's observation through the registry.
        registry.stop(entry);
        let event = events.recv().await.unwrap();
        let Event::ToolExited { entry: exited, code } = event else {
            panic!("expected a tool exit");
        };
        assert_eq!(exited, entry);
        registry.mark_stopped(exited, code);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].state, EntryState::Stopped);
        assert!(!snapshot[0].alive);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gui_exit_is_observed_by_the_monitor() {
        let (mut launcher, registry, mut events) = harness();
        let environment = shell_environment();
        let tool = tool("exit 7", true);

        launcher.launch(&tool, Some(&environment)).unwrap();
        let Some(Event::ToolExited { entry, code }) = events.recv().await else {
            panic!("expected a tool exit");
        };
        assert_eq!(code, Some(7));
        registry.mark_stopped(entry, code);
        assert_eq!(registry.stopped_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cli_launch_opens_a_session_and_runs_the_tool() {
        let (mut launcher, registry, mut events) = harness();
        let environment = shell_environment();
        let mut tool = tool("echo from-tool", false);
        tool.arguments = Some("extra".into());

        let launched = launcher.launch(&tool, Some(&environment)).unwrap();
        let Launched::Cli {
            entry,
            mut session,
            closed: _closed,
        } = launched
        else {
            panic!("expected a cli launch");
        };

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind, ModeKind::Cli);
        assert_eq!(snapshot[0].state, EntryState::Running);

        // The session echoes the full command line and streams its output.
        assert!(session
            .scrollback()
            .lines()
            .iter()
            .any(|line| line == "launching: echo from-tool extra"));
        loop {
            match events.recv().await.unwrap() {
                Event::SessionOutput { line, .. } => session.push_output(&line),
                Event::SessionExited { code, .. } => {
                    session.on_child_exit(code);
                    break;
                }
                _ => {}
            }
        }
        assert!(session
            .scrollback()
            .lines()
            .iter()
            .any(|line| line == "from-tool extra"));
        let _ = entry;
    }

    #[tokio::test]
    async fn bare_terminals_are_not_registered() {
        let (mut launcher, registry, _events) = harness();
        let (session, _closed) = launcher.open_terminal();
        assert!(registry.is_empty());
        assert_eq!(session.state(), crate::session::SessionState::Idle);
    }
}
