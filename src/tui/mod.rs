#![forbid(unsafe_code)]

pub mod picker;

use std::io;
use std::io::IsTerminal as _;

use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use crate::error::GwError;

pub type Term = Terminal<CrosstermBackend<io::Stderr>>;

/// The picker draws on stderr so stdout stays free for the path the shell
/// wrapper reads.
#[must_use]
pub fn is_tty() -> bool {
    io::stderr().is_terminal() && io::stdin().is_terminal()
}

pub fn init_terminal() -> Result<Term, GwError> {
    crossterm::terminal::enable_raw_mode()
        .map_err(|e| GwError::Other(format!("failed to enable raw mode: {e}")))?;
    let mut stderr = io::stderr();
    crossterm::execute!(stderr, crossterm::terminal::EnterAlternateScreen)
        .map_err(|e| GwError::Other(format!("failed to enter alt screen: {e}")))?;
    Terminal::new(CrosstermBackend::new(stderr))
        .map_err(|e| GwError::Other(format!("failed to create terminal: {e}")))
}

pub fn restore_terminal(mut terminal: Term) -> Result<(), GwError> {
    crossterm::terminal::disable_raw_mode()
        .map_err(|e| GwError::Other(format!("failed to disable raw mode: {e}")))?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )
    .map_err(|e| GwError::Other(format!("failed to leave alt screen: {e}")))?;
    terminal
        .show_cursor()
        .map_err(|e| GwError::Other(format!("failed to show cursor: {e}")))
}
