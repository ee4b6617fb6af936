//! Event definitions for the dispatcher loop.
//!
//! Background tasks (process waiters, stream readers, exit monitors) never
//! mutate session or registry state directly. They send one of these events
//! and the dispatcher applies the change on its own loop.

use crate::registry::EntryId;
use crate::session::SessionId;

/// A result marshaled from a background task onto the dispatcher.
#[derive(Debug, Clone)]
pub enum Event {
    /// A launched GUI tool's process exited (`None` code means it was
    /// terminated by a signal, force-kill included).
    ToolExited { entry: EntryId, code: Option<i32> },
    /// A line of merged stdout/stderr output from a session's foreground
    /// process.
    SessionOutput { session: SessionId, line: String },
    /// A session's foreground process exited.
    SessionExited { session: SessionId, code: Option<i32> },
    /// A session was torn down (`exit` built-in or window close).
    SessionClosed { session: SessionId },
}
