//! Synchronous in-process event bus.
//!
//! Listeners are registered per [`EventKind`] and invoked on the
//! dispatching thread, in registration order. The listener table is not
//! locked while listeners run, so a listener may dispatch further events or
//! register new listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::trace;

use crate::types::{Location, ScrollMode, SidebarView, SpreadMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindKind {
    Find,
    Again,
    HighlightAllChange,
    CaseSensitivityChange,
    EntireWordChange,
}

impl FindKind {
    /// Name of the find-controller command this request maps to.
    pub fn command(self) -> &'static str {
        match self {
            FindKind::Find => "find",
            FindKind::Again => "findagain",
            FindKind::HighlightAllChange => "findhighlightallchange",
            FindKind::CaseSensitivityChange => "findcasesensitivitychange",
            FindKind::EntireWordChange => "findentirewordchange",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindQuery {
    pub query: String,
    pub phrase_search: bool,
    pub case_sensitive: bool,
    pub entire_word: bool,
    pub highlight_all: bool,
    pub find_previous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindState {
    Found,
    NotFound,
    Wrapped,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FindMatchesCount {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    PageRendered {
        page_number: usize,
        timestamp: Instant,
        error: Option<String>,
    },
    UpdateViewArea {
        location: Location,
    },
    PageChanging {
        page_number: usize,
        page_label: Option<String>,
    },
    ScaleChanging {
        preset_value: Option<String>,
        scale: f32,
    },
    SidebarViewChanged {
        view: SidebarView,
    },
    PageMode {
        mode: String,
    },
    FirstPage,
    LastPage,
    NextPage,
    PreviousPage,
    PageNumberChanged {
        value: String,
    },
    SwitchScrollMode {
        mode: ScrollMode,
    },
    ScrollModeChanged {
        mode: ScrollMode,
    },
    SwitchSpreadMode {
        mode: SpreadMode,
    },
    SpreadModeChanged {
        mode: SpreadMode,
    },
    DocumentProperties,
    Find {
        kind: FindKind,
        query: FindQuery,
    },
    FindFromUrlHash {
        query: String,
    },
    UpdateFindMatchesCount {
        matches: FindMatchesCount,
    },
    UpdateFindControlState {
        state: FindState,
        previous: bool,
        matches: FindMatchesCount,
        raw_query: String,
    },
    DocumentInit,
    DocumentLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PageRendered,
    UpdateViewArea,
    PageChanging,
    ScaleChanging,
    SidebarViewChanged,
    PageMode,
    FirstPage,
    LastPage,
    NextPage,
    PreviousPage,
    PageNumberChanged,
    SwitchScrollMode,
    ScrollModeChanged,
    SwitchSpreadMode,
    SpreadModeChanged,
    DocumentProperties,
    Find,
    FindFromUrlHash,
    UpdateFindMatchesCount,
    UpdateFindControlState,
    DocumentInit,
    DocumentLoaded,
}

impl ViewerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ViewerEvent::PageRendered { .. } => EventKind::PageRendered,
            ViewerEvent::UpdateViewArea { .. } => EventKind::UpdateViewArea,
            ViewerEvent::PageChanging { .. } => EventKind::PageChanging,
            ViewerEvent::ScaleChanging { .. } => EventKind::ScaleChanging,
            ViewerEvent::SidebarViewChanged { .. } => EventKind::SidebarViewChanged,
            ViewerEvent::PageMode { .. } => EventKind::PageMode,
            ViewerEvent::FirstPage => EventKind::FirstPage,
            ViewerEvent::LastPage => EventKind::LastPage,
            ViewerEvent::NextPage => EventKind::NextPage,
            ViewerEvent::PreviousPage => EventKind::PreviousPage,
            ViewerEvent::PageNumberChanged { .. } => EventKind::PageNumberChanged,
            ViewerEvent::SwitchScrollMode { .. } => EventKind::SwitchScrollMode,
            ViewerEvent::ScrollModeChanged { .. } => EventKind::ScrollModeChanged,
            ViewerEvent::SwitchSpreadMode { .. } => EventKind::SwitchSpreadMode,
            ViewerEvent::SpreadModeChanged { .. } => EventKind::SpreadModeChanged,
            ViewerEvent::DocumentProperties => EventKind::DocumentProperties,
            ViewerEvent::Find { .. } => EventKind::Find,
            ViewerEvent::FindFromUrlHash { .. } => EventKind::FindFromUrlHash,
            ViewerEvent::UpdateFindMatchesCount { .. } => EventKind::UpdateFindMatchesCount,
            ViewerEvent::UpdateFindControlState { .. } => EventKind::UpdateFindControlState,
            ViewerEvent::DocumentInit => EventKind::DocumentInit,
            ViewerEvent::DocumentLoaded => EventKind::DocumentLoaded,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ViewerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerTable {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

/// Cheap to clone; clones share the same listener table.
#[derive(Clone, Default)]
pub struct EventBus {
    table: Arc<ListenerTable>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.table.next_id.fetch_add(1, Ordering::Relaxed));
        self.table
            .listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    /// Returns whether a listener was removed.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.table.listeners.write();
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        before != entries.len()
    }

    pub fn dispatch(&self, event: ViewerEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = match self.table.listeners.read().get(&kind) {
            Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => Vec::new(),
        };
        trace!(?kind, listeners = listeners.len(), "dispatching viewer event");
        for listener in listeners {
            listener(&event);
        }
    }
}
