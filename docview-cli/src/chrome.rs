//! Text renditions of the viewer chrome: toolbar, sidebar panels, find bar
//! and dialogs all feed one shared state that the main loop draws.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{self, SetTitle};
use docview_core::bus::{EventBus, FindMatchesCount, FindState, ViewerEvent};
use docview_core::engine::{
    Attachment, Document, FieldObjects, OptionalContentConfig, OutlineNode, PasswordReason,
    UnsupportedFeature,
};
use docview_core::types::SidebarView;
use docview_core::viewer::{
    AttachmentView, DocumentProperties, ErrorReporter, FindBar, HostServices, LayerView,
    OutlineView, PasswordPrompt, Progress, ProgressReporter, ScriptingHost, Sidebar,
    TelemetryEvent, ThumbnailViewer, Toolbar,
};
use docview_tty::StatusLine;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
struct FindStatus {
    state: FindState,
    previous: bool,
    matches: FindMatchesCount,
}

impl FindStatus {
    fn describe(&self) -> String {
        let count = if self.matches.total > 0 {
            format!(" ({} of {} matches)", self.matches.current, self.matches.total)
        } else {
            String::new()
        };
        match self.state {
            FindState::Pending => "searching...".to_owned(),
            FindState::NotFound => "phrase not found".to_owned(),
            FindState::Found => format!("found{count}"),
            FindState::Wrapped if self.previous => {
                format!("reached top of document, continued from bottom{count}")
            }
            FindState::Wrapped => {
                format!("reached end of document, continued from top{count}")
            }
        }
    }
}

#[derive(Default)]
struct ChromeState {
    title: String,
    page_number: usize,
    page_label: Option<String>,
    pages_count: usize,
    scale: Option<String>,
    loading: bool,
    sidebar_view: SidebarView,
    outline: Vec<(usize, String, Option<String>)>,
    attachments: Vec<(String, usize)>,
    layers: Vec<(bool, String)>,
    thumbnail_labels: Option<Vec<String>>,
    thumbnail_pages: usize,
    thumbnails_rendered: BTreeSet<usize>,
    selected_thumbnail: usize,
    find: Option<FindStatus>,
    progress: Option<Progress>,
    error: Option<String>,
    notice: Option<String>,
    form_fields: Option<usize>,
    properties_source: Option<(Arc<dyn Document>, String)>,
    properties: Option<Vec<(&'static str, String)>>,
}

struct ChromeInner {
    bus: EventBus,
    state: Mutex<ChromeState>,
    dirty: AtomicBool,
}

impl ChromeInner {
    fn update<R>(&self, f: impl FnOnce(&mut ChromeState) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.dirty.store(true, Ordering::SeqCst);
        result
    }
}

/// Every non-viewer widget the session controller drives.
#[derive(Clone)]
pub struct TerminalChrome {
    inner: Arc<ChromeInner>,
}

impl TerminalChrome {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ChromeInner {
                bus,
                state: Mutex::new(ChromeState::default()),
                dirty: AtomicBool::new(true),
            }),
        }
    }

    /// Returns whether anything changed since the last call.
    pub fn take_dirty(&self) -> bool {
        self.inner.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn properties_visible(&self) -> bool {
        self.inner.state.lock().properties.is_some()
    }

    pub fn hide_properties(&self) {
        self.inner.update(|state| state.properties = None);
    }

    pub fn status_line(&self, pending_input: Option<String>) -> StatusLine {
        let state = self.inner.state.lock();
        let message = if let Some(error) = &state.error {
            Some(error.clone())
        } else if let Some(find) = &state.find {
            Some(find.describe())
        } else if let Some(progress) = state.progress {
            Some(match progress {
                Progress::Percent(percent) => format!("loading {percent}%"),
                Progress::Indeterminate => "loading...".to_owned(),
            })
        } else if let Some(notice) = &state.notice {
            Some(notice.clone())
        } else if state.loading {
            Some("rendering...".to_owned())
        } else {
            state.scale.clone()
        };
        StatusLine {
            title: state.title.clone(),
            page_number: state.page_number,
            pages_count: state.pages_count,
            page_label: state.page_label.clone(),
            message,
            pending_input,
        }
    }

    /// Lines for the main area: the properties dialog when open, otherwise
    /// the active sidebar panel, otherwise a document summary.
    pub fn panel_lines(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        if let Some(properties) = &state.properties {
            let mut lines = vec!["Document properties".to_owned(), String::new()];
            lines.extend(
                properties
                    .iter()
                    .map(|(name, value)| format!("{name:>14}: {value}")),
            );
            lines.push(String::new());
            lines.push("press any key to close".to_owned());
            return lines;
        }

        match state.sidebar_view {
            SidebarView::Outline => {
                let mut lines = vec!["Outline".to_owned()];
                if state.outline.is_empty() {
                    lines.push("  (no outline)".to_owned());
                }
                lines.extend(state.outline.iter().map(|(depth, title, target)| {
                    let indent = "  ".repeat(depth + 1);
                    match target {
                        Some(target) => format!("{indent}{title}  [{target}]"),
                        None => format!("{indent}{title}"),
                    }
                }));
                lines
            }
            SidebarView::Attachments => {
                let mut lines = vec!["Attachments".to_owned()];
                if state.attachments.is_empty() {
                    lines.push("  (no attachments)".to_owned());
                }
                lines.extend(
                    state
                        .attachments
                        .iter()
                        .map(|(name, size)| format!("  {name} ({size} bytes)")),
                );
                lines
            }
            SidebarView::Layers => {
                let mut lines = vec!["Layers".to_owned()];
                if state.layers.is_empty() {
                    lines.push("  (no layers)".to_owned());
                }
                lines.extend(state.layers.iter().map(|(visible, name)| {
                    format!("  [{}] {name}", if *visible { 'x' } else { ' ' })
                }));
                lines
            }
            SidebarView::Thumbs => {
                let mut lines = vec!["Pages".to_owned()];
                lines.extend((1..=state.thumbnail_pages).map(|page| {
                    let marker = if page == state.selected_thumbnail { '>' } else { ' ' };
                    let rendered = if state.thumbnails_rendered.contains(&page) {
                        '*'
                    } else {
                        ' '
                    };
                    let label = state
                        .thumbnail_labels
                        .as_ref()
                        .and_then(|labels| labels.get(page - 1))
                        .filter(|label| !label.is_empty())
                        .map(|label| format!(" ({label})"))
                        .unwrap_or_default();
                    format!("{marker}{rendered} page {page}{label}")
                }));
                lines
            }
            SidebarView::None | SidebarView::Unknown => {
                let mut lines = Vec::new();
                if !state.title.is_empty() {
                    lines.push(state.title.clone());
                    lines.push(String::new());
                }
                if state.pages_count > 0 {
                    let label = state
                        .page_label
                        .as_ref()
                        .map(|label| format!(" ({label})"))
                        .unwrap_or_default();
                    lines.push(format!(
                        "page {}{label} of {}",
                        state.page_number, state.pages_count
                    ));
                }
                if let Some(scale) = &state.scale {
                    lines.push(format!("zoom {scale}"));
                }
                if let Some(fields) = state.form_fields {
                    lines.push(format!("{fields} form fields"));
                }
                lines
            }
        }
    }

    fn switch_to(&self, view: SidebarView) {
        let changed = self.inner.update(|state| {
            let changed = state.sidebar_view != view;
            state.sidebar_view = view;
            changed
        });
        if changed {
            self.inner
                .bus
                .dispatch(ViewerEvent::SidebarViewChanged { view });
        }
    }
}

fn flatten_outline(
    nodes: &[OutlineNode],
    depth: usize,
    lines: &mut Vec<(usize, String, Option<String>)>,
) {
    for node in nodes {
        let target = node
            .dest
            .as_ref()
            .map(|dest| dest.to_hash())
            .or_else(|| node.url.clone());
        lines.push((depth, node.title.clone(), target));
        flatten_outline(&node.items, depth + 1, lines);
    }
}

fn file_name(url: &str) -> String {
    url.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(url)
        .to_owned()
}

async fn collect_properties(
    document: Arc<dyn Document>,
    url: String,
) -> Vec<(&'static str, String)> {
    let mut rows = vec![("File name", file_name(&url))];
    match document.download_info().await {
        Ok(info) => rows.push(("File size", format!("{} bytes", info.length))),
        Err(err) => debug!(?err, "no download info"),
    }
    match document.metadata().await {
        Ok(metadata) => {
            let info = metadata.info;
            let fields = [
                ("Title", info.title),
                ("Author", info.author),
                ("Subject", info.subject),
                ("Keywords", info.keywords),
                ("Creator", info.creator),
                ("Producer", info.producer),
                ("PDF version", info.pdf_format_version),
            ];
            rows.extend(
                fields
                    .into_iter()
                    .filter_map(|(name, value)| value.map(|value| (name, value))),
            );
        }
        Err(err) => warn!(?err, "failed to read document metadata"),
    }
    rows.push(("Page count", document.num_pages().to_string()));
    if let Ok(page) = document.page(1).await {
        rows.push((
            "Page size",
            format!("{:.0} x {:.0} pt", page.width, page.height),
        ));
    }
    rows
}

impl Toolbar for TerminalChrome {
    fn set_page_number(&self, page_number: usize, page_label: Option<&str>) {
        self.inner.update(|state| {
            state.page_number = page_number;
            state.page_label = page_label.map(str::to_owned);
        });
    }

    fn set_pages_count(&self, count: usize, has_page_labels: bool) {
        self.inner.update(|state| {
            state.pages_count = count;
            if !has_page_labels {
                state.page_label = None;
            }
        });
    }

    fn set_page_scale(&self, preset_value: Option<&str>, scale: f32) {
        let value = match preset_value {
            Some(preset) => preset.to_owned(),
            None => format!("{:.0}%", scale * 100.0),
        };
        self.inner.update(|state| state.scale = Some(value));
    }

    fn update_loading_indicator_state(&self, loading: bool) {
        self.inner.update(|state| state.loading = loading);
    }

    fn reset(&self) {
        self.inner.update(|state| {
            state.page_number = 0;
            state.page_label = None;
            state.pages_count = 0;
            state.scale = None;
            state.loading = false;
        });
    }
}

impl Sidebar for TerminalChrome {
    fn set_initial_view(&self, view: SidebarView) {
        if view.is_known() {
            self.switch_to(view);
        }
    }

    fn switch_view(&self, view: SidebarView, force_open: bool) {
        if force_open {
            self.hide_properties();
        }
        self.switch_to(view);
    }

    fn is_thumbnail_view_visible(&self) -> bool {
        let state = self.inner.state.lock();
        state.sidebar_view == SidebarView::Thumbs && state.properties.is_none()
    }

    fn reset(&self) {
        self.inner
            .update(|state| state.sidebar_view = SidebarView::None);
    }
}

impl OutlineView for TerminalChrome {
    fn render(&self, outline: &[OutlineNode]) {
        let mut lines = Vec::new();
        flatten_outline(outline, 0, &mut lines);
        self.inner.update(|state| state.outline = lines);
    }

    fn reset(&self) {
        self.inner.update(|state| state.outline.clear());
    }
}

impl AttachmentView for TerminalChrome {
    fn render(&self, attachments: &BTreeMap<String, Attachment>) {
        let entries = attachments
            .values()
            .map(|attachment| (attachment.filename.clone(), attachment.content.len()))
            .collect();
        self.inner.update(|state| state.attachments = entries);
    }

    fn reset(&self) {
        self.inner.update(|state| state.attachments.clear());
    }
}

impl LayerView for TerminalChrome {
    fn render(&self, config: &OptionalContentConfig) {
        let layers = config
            .groups
            .iter()
            .map(|group| {
                let name = group.name.clone().unwrap_or_else(|| group.id.clone());
                (group.visible, name)
            })
            .collect();
        self.inner.update(|state| state.layers = layers);
    }

    fn reset(&self) {
        self.inner.update(|state| state.layers.clear());
    }
}

impl ThumbnailViewer for TerminalChrome {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.inner.update(|state| {
            state.thumbnail_pages = document.map_or(0, |d| d.num_pages());
            state.thumbnail_labels = None;
            state.thumbnails_rendered.clear();
            state.selected_thumbnail = 1;
        });
    }

    fn set_page_labels(&self, labels: Option<Vec<String>>) {
        self.inner.update(|state| state.thumbnail_labels = labels);
    }

    fn scroll_thumbnail_into_view(&self, page_number: usize) {
        self.inner
            .update(|state| state.selected_thumbnail = page_number);
    }

    fn set_image_from_page(&self, page_number: usize) {
        self.inner.update(|state| {
            state.thumbnails_rendered.insert(page_number);
        });
    }

    fn cleanup(&self) {
        self.inner
            .update(|state| state.thumbnails_rendered.clear());
    }
}

impl FindBar for TerminalChrome {
    fn update_results_count(&self, matches: FindMatchesCount) {
        self.inner.update(|state| {
            if let Some(find) = state.find.as_mut() {
                find.matches = matches;
            }
        });
    }

    fn update_ui_state(&self, find_state: FindState, previous: bool, matches: FindMatchesCount) {
        self.inner.update(|state| {
            state.find = Some(FindStatus {
                state: find_state,
                previous,
                matches,
            })
        });
    }

    fn reset(&self) {
        self.inner.update(|state| state.find = None);
    }
}

impl DocumentProperties for TerminalChrome {
    fn set_document(&self, document: Option<Arc<dyn Document>>, url: Option<&str>) {
        let source = document.map(|document| (document, url.unwrap_or_default().to_owned()));
        self.inner.update(|state| {
            state.properties_source = source;
            state.properties = None;
        });
    }

    fn open(&self) {
        let Some((document, url)) = self.inner.state.lock().properties_source.clone() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let rows = collect_properties(Arc::clone(&document), url).await;
            inner.update(|state| {
                let current = state
                    .properties_source
                    .as_ref()
                    .is_some_and(|(shown, _)| Arc::ptr_eq(shown, &document));
                if current {
                    state.properties = Some(rows);
                }
            });
        });
    }
}

impl ScriptingHost for TerminalChrome {
    fn set_field_objects(&self, fields: Option<FieldObjects>) {
        self.inner
            .update(|state| state.form_fields = fields.map(|fields| fields.len()));
    }
}

impl ProgressReporter for TerminalChrome {
    fn set_progress(&self, progress: Progress) {
        self.inner.update(|state| state.progress = Some(progress));
    }

    fn hide(&self) {
        self.inner.update(|state| state.progress = None);
    }
}

impl ErrorReporter for TerminalChrome {
    fn report(&self, message: &str, details: &str) {
        warn!(%message, %details, "viewer error");
        self.inner
            .update(|state| state.error = Some(message.to_owned()));
    }
}

impl HostServices for TerminalChrome {
    fn fallback(&self, feature: UnsupportedFeature, url: &str) {
        info!(feature = feature.as_label(), %url, "document uses unsupported features");
        self.inner.update(|state| {
            state.notice = Some(format!(
                "this document might not be displayed correctly ({})",
                feature.as_label()
            ))
        });
    }

    fn report_telemetry(&self, event: TelemetryEvent) {
        debug!(?event, "telemetry");
    }

    fn set_title(&self, title: &str) {
        self.inner.update(|state| state.title = title.to_owned());
        if let Err(err) = crossterm::execute!(io::stdout(), SetTitle(title)) {
            debug!(?err, "failed to set terminal title");
        }
    }
}

/// Reads a password from the terminal without echo.
pub struct TerminalPasswordPrompt;

fn read_password(prompt: &str) -> io::Result<Option<String>> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    terminal::enable_raw_mode()?;
    let mut password = String::new();
    let result = loop {
        match event::read() {
            Ok(Event::Key(KeyEvent {
                code,
                kind: KeyEventKind::Press,
                ..
            })) => match code {
                KeyCode::Enter => break Ok(Some(password)),
                KeyCode::Esc => break Ok(None),
                KeyCode::Backspace => {
                    password.pop();
                }
                KeyCode::Char(c) => password.push(c),
                _ => {}
            },
            Ok(_) => {}
            Err(err) => break Err(err),
        }
    };
    let _ = terminal::disable_raw_mode();
    write!(stderr, "\r\n")?;
    result
}

#[async_trait]
impl PasswordPrompt for TerminalPasswordPrompt {
    async fn request(&self, reason: PasswordReason) -> Option<String> {
        let prompt = match reason {
            PasswordReason::NeedPassword => "Enter the password to open this PDF file: ",
            PasswordReason::IncorrectPassword => "Invalid password. Please try again: ",
        };
        match tokio::task::spawn_blocking(move || read_password(prompt)).await {
            Ok(Ok(password)) => password,
            Ok(Err(err)) => {
                warn!(?err, "failed to read password");
                None
            }
            Err(err) => {
                warn!(?err, "password prompt task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer::tests::PlainDocument;
    use docview_core::bus::EventKind;
    use docview_core::engine::Destination;

    fn chrome_with_sidebar_events() -> (TerminalChrome, Arc<Mutex<Vec<SidebarView>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(
            EventKind::SidebarViewChanged,
            Arc::new(move |event: &ViewerEvent| {
                if let ViewerEvent::SidebarViewChanged { view } = event {
                    sink.lock().push(*view);
                }
            }),
        );
        (TerminalChrome::new(bus), seen)
    }

    #[test]
    fn status_line_prefers_errors_over_find_and_scale() {
        let chrome = TerminalChrome::new(EventBus::new());
        chrome.set_page_number(2, Some("ii"));
        chrome.set_pages_count(9, true);
        chrome.set_page_scale(None, 1.5);

        let status = chrome.status_line(None);
        assert_eq!(status.message.as_deref(), Some("150%"));
        assert_eq!(status.page_label.as_deref(), Some("ii"));

        chrome.update_ui_state(
            FindState::Wrapped,
            false,
            FindMatchesCount {
                current: 1,
                total: 4,
            },
        );
        assert_eq!(
            chrome.status_line(None).message.as_deref(),
            Some("reached end of document, continued from top (1 of 4 matches)")
        );

        chrome.report("Missing PDF file.", "missing PDF: /tmp/x.pdf");
        assert_eq!(
            chrome.status_line(Some("3".into())).to_string(),
            "[ii (2/9)] Missing PDF file. | 3"
        );
    }

    #[test]
    fn switching_views_publishes_only_changes() {
        let (chrome, seen) = chrome_with_sidebar_events();
        chrome.set_initial_view(SidebarView::Unknown);
        chrome.switch_view(SidebarView::Outline, true);
        chrome.switch_view(SidebarView::Outline, true);
        chrome.switch_view(SidebarView::Thumbs, false);

        assert_eq!(*seen.lock(), vec![SidebarView::Outline, SidebarView::Thumbs]);
        assert!(chrome.is_thumbnail_view_visible());

        Sidebar::reset(&chrome);
        assert!(!chrome.is_thumbnail_view_visible());
    }

    #[test]
    fn outline_panel_indents_nested_entries() {
        let (chrome, _) = chrome_with_sidebar_events();
        chrome.switch_view(SidebarView::Outline, true);
        assert_eq!(chrome.panel_lines(), vec!["Outline", "  (no outline)"]);

        OutlineView::render(
            &chrome,
            &[OutlineNode {
                title: "Intro".into(),
                dest: Some(Destination::Page(1)),
                url: None,
                items: vec![OutlineNode {
                    title: "Scope".into(),
                    dest: None,
                    url: Some("https://example.org".into()),
                    items: Vec::new(),
                }],
            }],
        );
        assert_eq!(
            chrome.panel_lines(),
            vec![
                "Outline",
                "  Intro  [page=1]",
                "    Scope  [https://example.org]",
            ]
        );
    }

    #[test]
    fn thumbnails_track_selection_and_rendered_pages() {
        let chrome = TerminalChrome::new(EventBus::new());
        ThumbnailViewer::set_document(&chrome, Some(PlainDocument::uniform(2)));
        chrome.switch_view(SidebarView::Thumbs, true);
        chrome.scroll_thumbnail_into_view(2);
        chrome.set_image_from_page(2);

        assert_eq!(chrome.panel_lines(), vec!["Pages", "   page 1", ">* page 2"]);
    }

    #[test]
    fn dirty_flag_is_consumed() {
        let chrome = TerminalChrome::new(EventBus::new());
        assert!(chrome.take_dirty());
        assert!(!chrome.take_dirty());
        chrome.set_progress(Progress::Percent(40));
        assert!(chrome.take_dirty());
        assert_eq!(
            chrome.status_line(None).message.as_deref(),
            Some("loading 40%")
        );
    }

    #[tokio::test]
    async fn properties_open_with_the_current_document() {
        let chrome = TerminalChrome::new(EventBus::new());
        DocumentProperties::set_document(
            &chrome,
            Some(PlainDocument::uniform(3)),
            Some("file:///tmp/report.pdf"),
        );
        chrome.open();
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }

        assert!(chrome.properties_visible());
        let lines = chrome.panel_lines();
        assert!(lines.contains(&format!("{:>14}: report.pdf", "File name")));
        assert!(lines.contains(&format!("{:>14}: 3", "Page count")));
        assert!(lines.contains(&format!("{:>14}: 612 x 792 pt", "Page size")));

        chrome.hide_properties();
        assert!(!chrome.properties_visible());
    }
}
