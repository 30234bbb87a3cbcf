#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};

use crate::core::refresh::WorktreeCollection;
use crate::error::GwError;
use crate::tui;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PAGE: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct PickerOptions {
    pub title: String,
    pub multi: bool,
    /// Indices into the collection that start out marked (multi only).
    pub preselected: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    Accept,
    Cancel,
}

/// Query, cursor and marks. Kept apart from the terminal so key handling can
/// be exercised without a TTY.
#[derive(Debug)]
struct PickerState {
    lower_names: Vec<String>,
    query: String,
    filtered: Vec<usize>,
    cursor: usize,
    marked: BTreeSet<usize>,
    multi: bool,
    show_help: bool,
    list_state: ListState,
}

impl PickerState {
    fn new(collection: &WorktreeCollection, opts: &PickerOptions) -> Self {
        let lower_names = collection
            .entries()
            .iter()
            .map(|e| e.display_branch.to_lowercase())
            .collect::<Vec<_>>();
        let marked = if opts.multi {
            opts.preselected
                .iter()
                .copied()
                .filter(|i| *i < lower_names.len())
                .collect()
        } else {
            BTreeSet::new()
        };
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        Self {
            filtered: (0..lower_names.len()).collect(),
            lower_names,
            query: String::new(),
            cursor: 0,
            marked,
            multi: opts.multi,
            show_help: false,
            list_state,
        }
    }

    fn current(&self) -> Option<usize> {
        self.filtered.get(self.cursor).copied()
    }

    fn selection(&self) -> Vec<usize> {
        if self.multi && !self.marked.is_empty() {
            return self.marked.iter().copied().collect();
        }
        self.current().into_iter().collect()
    }

    fn move_to(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.filtered.len().saturating_sub(1));
        self.list_state
            .select((!self.filtered.is_empty()).then_some(self.cursor));
    }

    fn refilter(&mut self) {
        let q = self.query.to_lowercase();
        self.filtered = self
            .lower_names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| name.contains(&q).then_some(i))
            .collect();
        self.move_to(0);
    }

    fn handle_key(&mut self, key: KeyEvent) -> Outcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => return Outcome::Cancel,
            KeyCode::Char('n') if ctrl => self.move_to(self.cursor + 1),
            KeyCode::Char('p') if ctrl => self.move_to(self.cursor.saturating_sub(1)),
            KeyCode::Esc => return Outcome::Cancel,
            KeyCode::Enter => {
                if !self.selection().is_empty() {
                    return Outcome::Accept;
                }
            }
            KeyCode::Tab if self.multi => {
                if let Some(idx) = self.current()
                    && !self.marked.insert(idx)
                {
                    self.marked.remove(&idx);
                }
                self.move_to(self.cursor + 1);
            }
            KeyCode::Up => self.move_to(self.cursor.saturating_sub(1)),
            KeyCode::Down => self.move_to(self.cursor + 1),
            KeyCode::PageUp => self.move_to(self.cursor.saturating_sub(PAGE)),
            KeyCode::PageDown => self.move_to(self.cursor + PAGE),
            KeyCode::Backspace => {
                if self.query.pop().is_some() {
                    self.refilter();
                }
            }
            // `?` can never appear in a branch name.
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Char(c) if !ctrl && !key.modifiers.contains(KeyModifiers::ALT) => {
                self.query.push(c);
                self.refilter();
            }
            _ => {}
        }
        Outcome::Continue
    }
}

/// Runs the picker until the user accepts or cancels, returning collection
/// indices. Rows are re-rendered whenever the collection's redraw generation
/// moves, so statuses arriving from the loader show up while browsing.
///
/// Blocks the calling thread; async callers should use `spawn_blocking`.
pub fn pick(collection: &WorktreeCollection, opts: &PickerOptions) -> Result<Vec<usize>, GwError> {
    if collection.is_empty() {
        return Err(GwError::Other(
            "no worktrees available for selection".to_owned(),
        ));
    }
    if !tui::is_tty() {
        return Err(GwError::Other(
            "interactive selection requires a TTY".to_owned(),
        ));
    }

    let mut guard = TerminalGuard(Some(tui::init_terminal()?));
    let mut state = PickerState::new(collection, opts);
    let mut drawn_generation = None;
    let mut dirty = true;

    loop {
        let generation = collection.generation();
        if dirty || drawn_generation != Some(generation) {
            let terminal = guard
                .0
                .as_mut()
                .ok_or_else(|| GwError::Other("terminal unavailable".to_owned()))?;
            terminal
                .draw(|f| draw(f, collection, &opts.title, &mut state))
                .map_err(|e| GwError::Other(format!("failed to draw picker: {e}")))?;
            drawn_generation = Some(generation);
            dirty = false;
        }

        if !event::poll(POLL_INTERVAL)
            .map_err(|e| GwError::Other(format!("event poll failed: {e}")))?
        {
            continue;
        }
        let Event::Key(key) =
            event::read().map_err(|e| GwError::Other(format!("event read failed: {e}")))?
        else {
            dirty = true;
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match state.handle_key(key) {
            Outcome::Continue => dirty = true,
            Outcome::Accept => return Ok(state.selection()),
            Outcome::Cancel => return Err(GwError::Cancelled),
        }
    }
}

fn draw(f: &mut Frame<'_>, collection: &WorktreeCollection, title: &str, state: &mut PickerState) {
    let area = f.area();
    let outer = Block::default().title(title.to_owned()).borders(Borders::ALL);
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(inner);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[0]);

    let items: Vec<ListItem> = state
        .filtered
        .iter()
        .map(|&idx| {
            let mut line = collection.item_string(idx);
            if state.multi {
                let marker = if state.marked.contains(&idx) { "[x] " } else { "[ ] " };
                line.insert_str(0, marker);
            }
            ListItem::new(Line::from(line))
        })
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Worktrees"))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">");
    f.render_stateful_widget(list, body[0], &mut state.list_state);

    let preview = Paragraph::new(preview_lines(collection, state.current()))
        .block(Block::default().borders(Borders::ALL).title("Details"))
        .wrap(Wrap { trim: false });
    f.render_widget(preview, body[1]);

    let hint = if state.multi {
        "Type to filter • Tab mark • Enter accept • ? help"
    } else {
        "Type to filter • Enter accept • ? help"
    };
    let bottom = Paragraph::new(Line::from(vec![
        Span::styled("Query: ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(state.query.clone()),
        Span::raw("  "),
        Span::styled(hint, Style::default().fg(Color::DarkGray)),
    ]));
    f.render_widget(bottom, chunks[1]);

    if state.show_help {
        let popup = centered_rect(60, 50, area);
        f.render_widget(Clear, popup);
        let mut lines = vec![
            Line::from("Keys:"),
            Line::from("  ↑/↓, C-p/C-n  Move"),
            Line::from("  PgUp/PgDn     Page"),
            Line::from("  Enter         Accept"),
            Line::from("  Esc, C-c      Cancel"),
            Line::from("  Backspace     Delete query char"),
            Line::from("  ?             Toggle help"),
        ];
        if state.multi {
            lines.push(Line::from("  Tab           Toggle mark"));
        }
        let help = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Help"))
            .wrap(Wrap { trim: false });
        f.render_widget(help, popup);
    }
}

fn preview_lines(collection: &WorktreeCollection, idx: Option<usize>) -> Vec<Line<'static>> {
    let Some(entry) = idx.and_then(|i| collection.get(i)) else {
        return vec![Line::from("no match")];
    };
    let status = if entry.is_primary {
        "primary".to_owned()
    } else {
        entry
            .status()
            .map_or_else(|| "loading".to_owned(), |s| s.as_str().to_owned())
    };
    let mut lines = vec![
        Line::from(format!("Branch: {}", entry.display_branch)),
        Line::from(format!("Path:   {}", entry.path.display())),
        Line::from(format!("Status: {status}")),
    ];
    let assignees = entry.assignees();
    if !assignees.is_empty() {
        lines.push(Line::from(format!("Assignees: {assignees}")));
    }
    if entry.is_current {
        lines.push(Line::from("(current worktree)"));
    }
    lines
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

struct TerminalGuard(Option<tui::Term>);

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(terminal) = self.0.take() {
            let _ = tui::restore_terminal(terminal);
        }
    }
}
