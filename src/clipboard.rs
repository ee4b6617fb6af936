use anyhow::{Context, Result};

use crate::session::TerminalSession;

/// Copies the session's entire scrollback to the system clipboard and
/// returns how many lines were copied.
pub fn copy_scrollback(session: &TerminalSession) -> Result<usize> {
    let mut clipboard = arboard::Clipboard::new().context("failed to access clipboard")?;
    clipboard
        .set_text(session.scrollback().text())
        .context("failed to set clipboard text")?;
    Ok(session.scrollback().len())
}
