use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docview_core::bus::{EventBus, FindMatchesCount, FindQuery, FindState, ViewerEvent};
use docview_core::engine::Document;
use docview_core::viewer::FindController;
use parking_lot::Mutex;
use tracing::{debug, warn};

fn normalize(text: &str, case_sensitive: bool) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if case_sensitive {
        collapsed
    } else {
        collapsed.to_lowercase()
    }
}

fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

/// Occurrences of `query` in `text`. Without phrase search every word of the
/// query is counted separately.
pub fn count_matches(text: &str, query: &FindQuery) -> usize {
    let text = normalize(text, query.case_sensitive);
    let needle = normalize(&query.query, query.case_sensitive);
    let terms: Vec<&str> = if query.phrase_search {
        vec![needle.as_str()]
    } else {
        needle.split(' ').collect()
    };
    terms
        .into_iter()
        .filter(|term| !term.is_empty())
        .map(|term| {
            text.match_indices(term)
                .filter(|(start, found)| {
                    !query.entire_word || is_word_boundary(&text, *start, start + found.len())
                })
                .count()
        })
        .sum()
}

#[derive(Default)]
struct FindSession {
    document: Option<Arc<dyn Document>>,
    query: Option<FindQuery>,
    /// One page number per match, in document order.
    matches: Vec<usize>,
    selected: Option<usize>,
}

/// Searches page text and moves the viewer to the selected match by
/// publishing page-number changes.
#[derive(Clone)]
pub struct TerminalFind {
    bus: EventBus,
    session: Arc<Mutex<FindSession>>,
    generation: Arc<AtomicU64>,
}

impl TerminalFind {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            session: Arc::new(Mutex::new(FindSession::default())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn start_search(&self, query: FindQuery) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let document = {
            let mut session = self.session.lock();
            session.query = Some(query.clone());
            session.matches.clear();
            session.selected = None;
            session.document.clone()
        };
        let Some(document) = document else {
            return;
        };
        self.publish_state(FindState::Pending, &query, FindMatchesCount::default());

        let this = self.clone();
        tokio::spawn(async move {
            let mut matches = Vec::new();
            for page_number in 1..=document.num_pages() {
                match document.page_text(page_number).await {
                    Ok(Some(text)) => {
                        let count = count_matches(&text, &query);
                        matches.extend(std::iter::repeat(page_number).take(count));
                    }
                    Ok(None) => {}
                    Err(err) => warn!(page_number, ?err, "failed to read page text"),
                }
                if this.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
            }
            debug!(query = %query.query, total = matches.len(), "search finished");
            let selected = (!matches.is_empty())
                .then(|| if query.find_previous { matches.len() - 1 } else { 0 });
            {
                let mut session = this.session.lock();
                session.matches = matches;
                session.selected = selected;
            }
            this.publish_selection(&query, false);
        });
    }

    fn step(&self, query: FindQuery) {
        let wrapped = {
            let mut session = self.session.lock();
            let total = session.matches.len();
            let Some(current) = session.selected.filter(|_| total > 0) else {
                drop(session);
                return self.publish_selection(&query, false);
            };
            let (next, wrapped) = if query.find_previous {
                match current.checked_sub(1) {
                    Some(next) => (next, false),
                    None => (total - 1, true),
                }
            } else if current + 1 < total {
                (current + 1, false)
            } else {
                (0, true)
            };
            session.selected = Some(next);
            session.query = Some(query.clone());
            wrapped
        };
        self.publish_selection(&query, wrapped);
    }

    fn publish_selection(&self, query: &FindQuery, wrapped: bool) {
        let (page, matches) = {
            let session = self.session.lock();
            let page = session
                .selected
                .and_then(|index| session.matches.get(index).copied());
            let matches = FindMatchesCount {
                current: session.selected.map_or(0, |index| index + 1),
                total: session.matches.len(),
            };
            (page, matches)
        };
        let state = match (page, wrapped) {
            (None, _) => FindState::NotFound,
            (Some(_), true) => FindState::Wrapped,
            (Some(_), false) => FindState::Found,
        };
        if let Some(page) = page {
            self.bus.dispatch(ViewerEvent::PageNumberChanged {
                value: page.to_string(),
            });
        }
        self.bus
            .dispatch(ViewerEvent::UpdateFindMatchesCount { matches });
        self.publish_state(state, query, matches);
    }

    fn publish_state(&self, state: FindState, query: &FindQuery, matches: FindMatchesCount) {
        self.bus.dispatch(ViewerEvent::UpdateFindControlState {
            state,
            previous: query.find_previous,
            matches,
            raw_query: query.query.clone(),
        });
    }
}

impl FindController for TerminalFind {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.session.lock() = FindSession {
            document,
            ..FindSession::default()
        };
    }

    fn execute_command(&self, command: &str, query: &FindQuery) {
        let same_search = {
            let session = self.session.lock();
            session.query.as_ref().is_some_and(|previous| {
                previous.query == query.query
                    && previous.case_sensitive == query.case_sensitive
                    && previous.entire_word == query.entire_word
                    && previous.phrase_search == query.phrase_search
            })
        };
        match command {
            "findagain" if same_search => self.step(query.clone()),
            "findhighlightallchange" if same_search => {
                self.session.lock().query = Some(query.clone());
            }
            _ => self.start_search(query.clone()),
        }
    }
}
