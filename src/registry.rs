//! The running-tool registry.
//!
//! One `RunningToolRegistry` is constructed by the composition root and
//! injected wherever launches are tracked; there is no global instance.
//! Entries are keyed by insertion order with a monotonic id, so duplicate
//! tool names across launches stay distinguishable. A `Stopped` entry is
//! removed either by an explicit clear or by its own removal timer five
//! seconds later; the timer re-checks the entry under the registry lock
//! before acting, and an explicit removal cancels the timer instead of
//! racing it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::session::SessionId;
use crate::spawner::ProcessHandle;

/// How long a `Stopped` entry lingers before automatic removal.
pub const REMOVAL_DELAY: Duration = Duration::from_secs(5);

/// Identity of one tracked launch, unique for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a tracked launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Registered, OS confirmation pending.
    Starting,
    /// Process (or session) confirmed alive.
    Running,
    /// Exit observed or the launch was explicitly stopped.
    Stopped,
}

/// What a launch actually is. The registry and frontend match on this
/// exhaustively instead of branching on a GUI flag.
#[derive(Debug)]
pub enum EntryMode {
    /// A detached GUI process; the entry exclusively owns its handle.
    Gui { handle: ProcessHandle },
    /// A terminal session; its foreground child is owned by the session.
    Cli { session: SessionId },
}

/// Mode discriminant for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Gui,
    Cli,
}

struct RunningEntry {
    id: EntryId,
    name: String,
    mode: EntryMode,
    state: EntryState,
    started_at: Instant,
    stopped_at: Option<Instant>,
    exit_code: Option<i32>,
    removal: Option<AbortHandle>,
}

/// A consistent, render-ready view of one entry.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub name: String,
    pub kind: ModeKind,
    pub state: EntryState,
    /// Recomputed from the process handle, not from the cached state, since
    /// the monitor may not have observed a death yet.
    pub alive: bool,
    pub pid: Option<u32>,
    pub elapsed: Duration,
    pub exit_code: Option<i32>,
}

/// Process-wide table of launched tools.
pub struct RunningToolRegistry {
    inner: Mutex<Inner>,
    changed: watch::Sender<u64>,
}

struct Inner {
    entries: Vec<RunningEntry>,
    next_id: u64,
}

impl Default for RunningToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                next_id: 0,
            }),
            changed: watch::channel(0).0,
        }
    }

    /// Adds an entry in state `Starting` and returns its id.
    pub fn register(&self, name: &str, mode: EntryMode) -> EntryId {
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = EntryId(inner.next_id);
            inner.entries.push(RunningEntry {
                id,
                name: name.to_string(),
                mode,
                state: EntryState::Starting,
                started_at: Instant::now(),
                stopped_at: None,
                exit_code: None,
                removal: None,
            });
            id
        };
        debug!(%id, name, "registered launch");
        self.bump();
        id
    }

    /// Confirms the launch is alive.
    pub fn mark_running(&self, id: EntryId) {
        {
            let mut inner = self.lock();
            let Some(entry) = inner.entry_mut(id) else {
                return;
            };
            if entry.state != EntryState::Starting {
                return;
            }
            entry.state = EntryState::Running;
        }
        self.bump();
    }

    /// Records an observed exit and arms the removal timer. No-op for
    /// unknown or already-stopped entries, so a monitor event and an
    /// explicit stop cannot double-arm.
    pub fn mark_stopped(self: &Arc<Self>, id: EntryId, code: Option<i32>) {
        {
            let mut inner = self.lock();
            let Some(entry) = inner.entry_mut(id) else {
                return;
            };
            if entry.state == EntryState::Stopped {
                return;
            }
            entry.state = EntryState::Stopped;
            entry.stopped_at = Some(Instant::now());
            entry.exit_code = code;

            let registry = Arc::clone(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(REMOVAL_DELAY).await;
                registry.remove_if_stopped(id);
            });
            entry.removal = Some(timer.abort_handle());
        }
        debug!(%id, ?code, "launch stopped");
        self.bump();
    }

    /// Removal-timer callback: removes the entry only if it is still
    /// present and still `Stopped`. An explicit clear may have won the race.
    fn remove_if_stopped(&self, id: EntryId) {
        let removed = {
            let mut inner = self.lock();
            let position = inner
                .entries
                .iter()
                .position(|entry| entry.id == id && entry.state == EntryState::Stopped);
            match position {
                Some(position) => {
                    inner.entries.remove(position);
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!(%id, "auto-removed stopped launch");
            self.bump();
        }
    }

    /// Removes an entry unconditionally, cancelling any pending removal
    /// timer.
    pub fn remove(&self, id: EntryId) {
        let removed = {
            let mut inner = self.lock();
            let position = inner.entries.iter().position(|entry| entry.id == id);
            match position {
                Some(position) => {
                    let entry = inner.entries.remove(position);
                    if let Some(timer) = entry.removal {
                        timer.abort();
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bump();
        }
    }

    /// Removes every `Stopped` entry immediately. Pending timers are
    /// cancelled and any handle that is somehow still alive is force-killed
    /// so no native handle can dangle.
    pub fn clear_completed(&self) {
        let mut cleared = 0usize;
        {
            let mut inner = self.lock();
            inner.entries.retain(|entry| {
                if entry.state != EntryState::Stopped {
                    return true;
                }
                if let Some(timer) = &entry.removal {
                    timer.abort();
                }
                if let EntryMode::Gui { handle } = &entry.mode {
                    if handle.is_alive() {
                        handle.kill_forcibly();
                    }
                }
                cleared += 1;
                false
            });
        }
        if cleared > 0 {
            debug!(cleared, "cleared stopped launches");
            self.bump();
        }
    }

    /// Administrative stop. GUI entries are force-killed here (the monitor
    /// observes the exit and drives the state change); for a CLI entry the
    /// owning session must be closed instead, so its id is returned.
    pub fn stop(&self, id: EntryId) -> Option<SessionId> {
        let inner = self.lock();
        let entry = inner.entries.iter().find(|entry| entry.id == id)?;
        match &entry.mode {
            EntryMode::Gui { handle } => {
                handle.kill_forcibly();
                None
            }
            EntryMode::Cli { session } => Some(*session),
        }
    }

    /// A consistent ordered read of all entries for rendering.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let now = Instant::now();
        let inner = self.lock();
        inner
            .entries
            .iter()
            .map(|entry| {
                let (kind, alive, pid) = match &entry.mode {
                    EntryMode::Gui { handle } => (ModeKind::Gui, handle.is_alive(), handle.pid()),
                    EntryMode::Cli { .. } => (ModeKind::Cli, entry.state != EntryState::Stopped, None),
                };
                EntrySnapshot {
                    id: entry.id,
                    name: entry.name.clone(),
                    kind,
                    state: entry.state,
                    alive,
                    pid,
                    elapsed: entry.stopped_at.unwrap_or(now) - entry.started_at,
                    exit_code: entry.exit_code,
                }
            })
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.state != EntryState::Stopped)
            .count()
    }

    pub fn stopped_count(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.state == EntryState::Stopped)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Change-notification hook for the UI: the value increments on every
    /// mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    fn bump(&self) {
        self.changed.send_modify(|revision| *revision += 1);
    }

    // A poisoned lock only means another thread panicked mid-mutation; the
    // entry list is still structurally sound, so keep serving it.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn entry_mut(&mut self, id: EntryId) -> Option<&mut RunningEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_mode() -> EntryMode {
        EntryMode::Cli {
            session: SessionId::new(1),
        }
    }

    #[test]
    fn register_starts_in_starting_state() {
        let registry = RunningToolRegistry::new();
        let id = registry.register("nmap", cli_mode());
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].state, EntryState::Starting);
        assert_eq!(registry.running_count(), 1);
        assert_eq!(registry.stopped_count(), 0);
    }

    #[test]
    fn duplicate_names_get_distinct_ids() {
        let registry = RunningToolRegistry::new();
        let first = registry.register("nmap", cli_mode());
        let second = registry.register("nmap", cli_mode());
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_entries_are_auto_removed_after_the_delay() {
        let registry = Arc::new(RunningToolRegistry::new());
        let id = registry.register("nmap", cli_mode());
        registry.mark_running(id);
        registry.mark_stopped(id, Some(0));
        assert_eq!(registry.stopped_count(), 1);

        // Just before the deadline the entry is still visible.
        tokio::time::sleep(REMOVAL_DELAY - Duration::from_millis(100)).await;
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_clear_cancels_the_removal_timer() {
        let registry = Arc::new(RunningToolRegistry::new());
        let id = registry.register("nmap", cli_mode());
        registry.mark_stopped(id, Some(0));
        registry.clear_completed();
        assert!(registry.is_empty());

        // A new launch must not be disturbed by the dead timer.
        let fresh = registry.register("nmap", cli_mode());
        tokio::time::sleep(REMOVAL_DELAY + Duration::from_secs(1)).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].id, fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_stopped_is_idempotent() {
        let registry = Arc::new(RunningToolRegistry::new());
        let id = registry.register("nmap", cli_mode());
        registry.mark_stopped(id, Some(1));
        registry.mark_stopped(id, Some(99));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].exit_code, Some(1));
        tokio::time::sleep(REMOVAL_DELAY + Duration::from_secs(1)).await;
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_completed_leaves_running_entries_alone() {
        let registry = RunningToolRegistry::new();
        let running = registry.register("zap", cli_mode());
        registry.mark_running(running);
        registry.clear_completed();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscribe_sees_every_mutation() {
        let registry = RunningToolRegistry::new();
        let watch = registry.subscribe();
        let before = *watch.borrow();
        let id = registry.register("nmap", cli_mode());
        registry.mark_running(id);
        assert!(*watch.borrow() > before);
    }

    #[test]
    fn stop_on_a_cli_entry_returns_its_session() {
        let registry = RunningToolRegistry::new();
        let id = registry.register("nmap", cli_mode());
        assert_eq!(registry.stop(id), Some(SessionId::new(1)));
    }
}
