//! toolrack: the process execution and monitoring core of a tool-launcher
//! dashboard.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads the catalog, and wires the composition root: one
//! registry, one launcher, and one dispatcher loop that owns the terminal
//! sessions and applies every event coming back from background tasks.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use toolrack::catalog::Catalog;
use toolrack::events::Event;
use toolrack::launcher::{Launched, Launcher};
use toolrack::registry::{EntryId, EntryState, ModeKind, RunningToolRegistry};
use toolrack::session::{SessionState, TerminalSession};
use toolrack::{clipboard, config};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "toolrack", version, about = "Launch and monitor catalog tools")]
struct Cli {
    /// Path to toolrack.toml (default: ./toolrack.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Tools catalog path (overrides the config file).
    #[arg(long)]
    tools: Option<PathBuf>,
    /// Environments catalog path (overrides the config file).
    #[arg(long)]
    environments: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tools and environments in the catalog.
    List,
    /// Launch a tool by name.
    Launch {
        /// Tool name as shown by `list`.
        name: String,
        /// For GUI tools, stay attached and report the exit.
        #[arg(long)]
        wait: bool,
    },
    /// Open an interactive terminal session without launching a tool.
    Term,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.config.clone().or_else(config::find_config) {
        Some(path) => config::load_config(&path)?,
        None => config::Config::default(),
    };
    init_logging(config.log_filter.as_deref().unwrap_or("warn"));

    let tools_path = cli
        .tools
        .clone()
        .or_else(|| config.tools_file.clone())
        .unwrap_or_else(|| PathBuf::from("tools.json"));
    let environments_path = cli
        .environments
        .clone()
        .or_else(|| config.environments_file.clone())
        .unwrap_or_else(|| PathBuf::from("environments.json"));
    let catalog = Catalog::load(&tools_path, &environments_path)?;

    match cli.command {
        Command::List => {
            print_catalog(&catalog);
            Ok(())
        }
        Command::Launch { name, wait } => launch_tool(&catalog, &name, wait).await,
        Command::Term => open_terminal().await,
    }
}

async fn launch_tool(catalog: &Catalog, name: &str, wait: bool) -> Result<()> {
    let tool = catalog
        .tool_by_name(name)
        .ok_or_else(|| anyhow!("no tool named \"{name}\" in the catalog"))?;
    let environment = tool
        .environment_id
        .as_deref()
        .and_then(|id| catalog.environment(id));

    let registry = Arc::new(RunningToolRegistry::new());
    let (event_tx, event_rx) = mpsc::channel(256);
    let mut launcher = Launcher::new(registry.clone(), event_tx);

    match launcher.launch(tool, environment) {
        Err(err) => bail!("cannot launch {name}: {err}"),
        Ok(Launched::Gui { entry }) => {
            print_status(&registry);
            if wait {
                watch_gui_exit(&registry, event_rx, entry).await;
            }
            Ok(())
        }
        Ok(Launched::Cli {
            entry,
            session,
            closed,
        }) => run_terminal(session, closed, event_rx, registry, Some(entry)).await,
    }
}

async fn open_terminal() -> Result<()> {
    let registry = Arc::new(RunningToolRegistry::new());
    let (event_tx, event_rx) = mpsc::channel(256);
    let mut launcher = Launcher::new(registry.clone(), event_tx);
    let (session, closed) = launcher.open_terminal();
    run_terminal(session, closed, event_rx, registry, None).await
}

// Blocks until the launched entry's monitor reports its exit.
async fn watch_gui_exit(
    registry: &Arc<RunningToolRegistry>,
    mut event_rx: mpsc::Receiver<Event>,
    entry: EntryId,
) {
    while let Some(event) = event_rx.recv().await {
        if let Event::ToolExited {
            entry: exited,
            code,
        } = event
        {
            registry.mark_stopped(exited, code);
            if exited == entry {
                match code {
                    Some(code) => println!("exited with code {code}"),
                    None => println!("terminated by signal"),
                }
                print_status(registry);
                return;
            }
        }
    }
}

/// The dispatcher: owns the session, reads user input, and applies every
/// event from the background tasks. Nothing else mutates session state.
async fn run_terminal(
    mut session: TerminalSession,
    mut closed: oneshot::Receiver<()>,
    mut event_rx: mpsc::Receiver<Event>,
    registry: Arc<RunningToolRegistry>,
    entry: Option<EntryId>,
) -> Result<()> {
    let mut printed = flush_scrollback(&session, 0)?;
    let mut input = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = input.next_line() => {
                match line.context("failed to read terminal input")? {
                    Some(line) => {
                        // ":copy" is a frontend action, not session input.
                        if line.trim() == ":copy" {
                            match clipboard::copy_scrollback(&session) {
                                Ok(count) => println!("copied {count} lines to the clipboard"),
                                Err(err) => println!("copy failed: {err}"),
                            }
                        } else {
                            session.submit(&line);
                        }
                        printed = flush_scrollback(&session, printed)?;
                    }
                    // stdin closed: treat it like a window close.
                    None => session.close(),
                }
            }
            Some(event) = event_rx.recv() => {
                match event {
                    Event::SessionOutput { session: id, line } if id == session.id() => {
                        session.push_output(&line);
                    }
                    Event::SessionExited { session: id, code } if id == session.id() => {
                        session.on_child_exit(code);
                    }
                    Event::SessionClosed { session: id } if id == session.id() => {
                        if let Some(entry) = entry {
                            registry.mark_stopped(entry, None);
                        }
                    }
                    Event::ToolExited { entry, code } => registry.mark_stopped(entry, code),
                    _ => {}
                }
                printed = flush_scrollback(&session, printed)?;
            }
            _ = &mut closed => {
                flush_scrollback(&session, printed)?;
                if let Some(entry) = entry {
                    registry.mark_stopped(entry, None);
                }
                return Ok(());
            }
        }
    }
}

// Prints scrollback lines the user has not seen yet. `clear` shrinks the
// buffer below the watermark, in which case everything is repainted.
fn flush_scrollback(session: &TerminalSession, printed: usize) -> Result<usize> {
    let lines = session.scrollback().lines();
    let start = if printed > lines.len() { 0 } else { printed };
    let mut stdout = std::io::stdout();
    for line in &lines[start..] {
        writeln!(stdout, "{line}")?;
    }
    if session.state() == SessionState::Idle {
        write!(stdout, "> ")?;
    }
    stdout.flush()?;
    Ok(lines.len())
}

fn print_catalog(catalog: &Catalog) {
    if catalog.tools.is_empty() {
        println!("no tools in the catalog");
    } else {
        println!("tools:");
        for tool in &catalog.tools {
            let mode = if tool.has_gui { "gui" } else { "cli" };
            let environment = tool
                .environment_id
                .as_deref()
                .and_then(|id| catalog.environment(id))
                .map(|env| env.name.as_str())
                .unwrap_or("missing environment");
            println!("  {:<20} [{mode}] {} ({environment})", tool.name, tool.command);
        }
    }
    if !catalog.environments.is_empty() {
        println!("environments:");
        for environment in &catalog.environments {
            println!(
                "  {:<20} {} {}",
                environment.name,
                environment.executable_path,
                environment.parameters.as_deref().unwrap_or("")
            );
        }
    }
}

fn print_status(registry: &RunningToolRegistry) {
    let snapshot = registry.snapshot();
    println!(
        "tools: {} total, {} running, {} stopped",
        snapshot.len(),
        registry.running_count(),
        registry.stopped_count()
    );
    for entry in snapshot {
        let kind = match entry.kind {
            ModeKind::Gui => "gui",
            ModeKind::Cli => "cli",
        };
        let state = match entry.state {
            EntryState::Starting => "starting",
            // The handle may already know about a death the monitor has not
            // applied yet.
            EntryState::Running if !entry.alive => "exiting",
            EntryState::Running => "running",
            EntryState::Stopped => "stopped",
        };
        let pid = entry
            .pid
            .map(|pid| format!(" pid {pid}"))
            .unwrap_or_default();
        println!(
            "  {} {} [{kind}] {state}{pid} ({}s)",
            entry.id,
            entry.name,
            entry.elapsed.as_secs()
        );
    }
}

fn init_logging(filter: &str) {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
