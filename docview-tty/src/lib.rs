use std::fmt;
use std::io::{self, Write};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use docview_core::bus::{FindKind, FindQuery, ViewerEvent};
use docview_core::types::{ScrollMode, SpreadMode};
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Viewer(ViewerEvent),
    BeginSearch,
    SearchQueryChanged { query: String },
    SearchCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
}

/// Turns terminal key presses into viewer events.
///
/// A numeric prefix followed by `g`, `G` or Enter jumps to that page; any
/// other key drops the prefix. A leading `0` closes the sidebar instead.
#[derive(Debug)]
pub struct EventMapper {
    pending_digits: String,
    mode: InputMode,
    search_buffer: String,
    last_query: Option<String>,
    scroll_mode: ScrollMode,
    spread_mode: SpreadMode,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self {
            pending_digits: String::new(),
            mode: InputMode::Normal,
            search_buffer: String::new(),
            last_query: None,
            scroll_mode: ScrollMode::Vertical,
            spread_mode: SpreadMode::None,
        }
    }
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.pending_digits.clear();
            self.search_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Records the modes the viewer actually switched to, so `s` and `d`
    /// cycle from there.
    pub fn sync_view_modes(&mut self, scroll_mode: ScrollMode, spread_mode: SpreadMode) {
        if scroll_mode.is_known() {
            self.scroll_mode = scroll_mode;
        }
        if spread_mode.is_known() {
            self.spread_mode = spread_mode;
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };
        let ui_event = match self.mode {
            InputMode::Normal => self.map_key_normal(code, modifiers),
            InputMode::Search => self.map_key_search(code, modifiers),
        };
        trace!(?code, ?ui_event, "key mapped");
        ui_event
    }

    fn map_key_normal(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
            return UiEvent::Quit;
        }
        let plain = modifiers.is_empty() || modifiers == KeyModifiers::SHIFT;
        if !plain {
            self.pending_digits.clear();
            return UiEvent::None;
        }

        match code {
            KeyCode::Char(c)
                if c.is_ascii_digit() && (c != '0' || !self.pending_digits.is_empty()) =>
            {
                self.pending_digits.push(c);
                UiEvent::None
            }
            KeyCode::Char('g') | KeyCode::Char('G') | KeyCode::Enter
                if !self.pending_digits.is_empty() =>
            {
                let value = std::mem::take(&mut self.pending_digits);
                viewer(ViewerEvent::PageNumberChanged { value })
            }
            code => {
                self.pending_digits.clear();
                self.map_command(code)
            }
        }
    }

    fn map_command(&mut self, code: KeyCode) -> UiEvent {
        match code {
            KeyCode::Char('j') | KeyCode::Down | KeyCode::PageDown => {
                viewer(ViewerEvent::NextPage)
            }
            KeyCode::Char('k') | KeyCode::Up | KeyCode::PageUp => {
                viewer(ViewerEvent::PreviousPage)
            }
            KeyCode::Char('g') | KeyCode::Home => viewer(ViewerEvent::FirstPage),
            KeyCode::Char('G') | KeyCode::End => viewer(ViewerEvent::LastPage),
            KeyCode::Char('/') => {
                self.set_mode(InputMode::Search);
                UiEvent::BeginSearch
            }
            KeyCode::Char('n') => self.find_again(false),
            KeyCode::Char('N') => self.find_again(true),
            KeyCode::Char('s') => {
                self.scroll_mode = self.scroll_mode.cycle();
                viewer(ViewerEvent::SwitchScrollMode {
                    mode: self.scroll_mode,
                })
            }
            KeyCode::Char('d') => {
                self.spread_mode = self.spread_mode.cycle();
                viewer(ViewerEvent::SwitchSpreadMode {
                    mode: self.spread_mode,
                })
            }
            KeyCode::Char('o') => page_mode("outline"),
            KeyCode::Char('t') => page_mode("thumbs"),
            KeyCode::Char('a') => page_mode("attachments"),
            KeyCode::Char('l') => page_mode("layers"),
            KeyCode::Char('0') => page_mode("none"),
            KeyCode::Char('i') => viewer(ViewerEvent::DocumentProperties),
            KeyCode::Char('q') => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_key_search(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match code {
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                UiEvent::SearchCancel
            }
            KeyCode::Enter => {
                let query = std::mem::take(&mut self.search_buffer);
                self.set_mode(InputMode::Normal);
                if query.is_empty() {
                    return UiEvent::SearchCancel;
                }
                self.last_query = Some(query.clone());
                viewer(ViewerEvent::Find {
                    kind: FindKind::Find,
                    query: find_query(query, false),
                })
            }
            KeyCode::Backspace => {
                self.search_buffer.pop();
                UiEvent::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            KeyCode::Char(c) if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT => {
                self.search_buffer.push(c);
                UiEvent::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn find_again(&self, previous: bool) -> UiEvent {
        match &self.last_query {
            Some(query) => viewer(ViewerEvent::Find {
                kind: FindKind::Again,
                query: find_query(query.clone(), previous),
            }),
            None => UiEvent::None,
        }
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Search => Some(format!("/{}", self.search_buffer)),
            InputMode::Normal if !self.pending_digits.is_empty() => {
                Some(self.pending_digits.clone())
            }
            InputMode::Normal => None,
        }
    }
}

fn viewer(event: ViewerEvent) -> UiEvent {
    UiEvent::Viewer(event)
}

fn page_mode(mode: &str) -> UiEvent {
    viewer(ViewerEvent::PageMode {
        mode: mode.to_owned(),
    })
}

fn find_query(query: String, find_previous: bool) -> FindQuery {
    FindQuery {
        query,
        phrase_search: true,
        case_sensitive: false,
        entire_word: false,
        highlight_all: true,
        find_previous,
    }
}

/// The bottom line of the terminal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusLine {
    pub title: String,
    pub page_number: usize,
    pub pages_count: usize,
    pub page_label: Option<String>,
    pub message: Option<String>,
    pub pending_input: Option<String>,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.title.is_empty() {
            write!(f, "{} ", self.title)?;
        }
        match &self.page_label {
            Some(label) => write!(
                f,
                "[{label} ({}/{})]",
                self.page_number, self.pages_count
            )?,
            None => write!(f, "[{}/{}]", self.page_number, self.pages_count)?,
        }
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            write!(f, " {message}")?;
        }
        if let Some(pending) = self.pending_input.as_deref().filter(|p| !p.is_empty()) {
            write!(f, " | {pending}")?;
        }
        Ok(())
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, status: &StatusLine) -> io::Result<()> {
    write!(writer, "\r{}", status)?;
    writer.flush()
}
