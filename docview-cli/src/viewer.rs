//! Headless page viewer: tracks position and readiness without drawing pages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use docview_core::bus::{EventBus, ViewerEvent};
use docview_core::engine::Document;
use docview_core::types::{
    Location, RendererType, RenderingState, Rotation, ScrollMode, SpreadMode,
    DEFAULT_SCALE_VALUE,
};
use docview_core::viewer::{IdleHook, LinkService, PageViewer, RenderingQueue};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Quiet period after the last render before the idle hook runs.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct ViewState {
    document: Option<Arc<dyn Document>>,
    page: usize,
    pages_count: usize,
    scale_value: Option<String>,
    rotation: Rotation,
    scroll_mode: ScrollMode,
    spread_mode: SpreadMode,
    labels: Option<Vec<String>>,
    rendered: HashSet<usize>,
}

impl ViewState {
    fn location(&self) -> Location {
        Location {
            page_number: self.page,
            scale: self
                .scale_value
                .clone()
                .unwrap_or_else(|| DEFAULT_SCALE_VALUE.to_owned()),
            left: 0.0,
            top: 0.0,
            rotation: self.rotation,
        }
    }

    fn label(&self) -> Option<String> {
        let index = self.page.checked_sub(1)?;
        self.labels.as_ref()?.get(index).cloned()
    }
}

struct Shared {
    bus: EventBus,
    renderer: RendererType,
    state: Mutex<ViewState>,
    generation: AtomicU64,
    renders: AtomicU64,
    first_page: watch::Sender<bool>,
    one_page: watch::Sender<Option<Instant>>,
    pages: watch::Sender<bool>,
    equal_page_sizes: AtomicBool,
    on_idle: Mutex<Option<IdleHook>>,
}

#[derive(Clone)]
pub struct TerminalViewer {
    shared: Arc<Shared>,
}

impl TerminalViewer {
    pub fn new(bus: EventBus, renderer: RendererType) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus,
                renderer,
                state: Mutex::new(ViewState {
                    page: 1,
                    scroll_mode: ScrollMode::Vertical,
                    spread_mode: SpreadMode::None,
                    ..ViewState::default()
                }),
                generation: AtomicU64::new(0),
                renders: AtomicU64::new(0),
                first_page: watch::channel(false).0,
                one_page: watch::channel(None).0,
                pages: watch::channel(false).0,
                equal_page_sizes: AtomicBool::new(true),
                on_idle: Mutex::new(None),
            }),
        }
    }

    pub fn view_modes(&self) -> (ScrollMode, SpreadMode) {
        let state = self.shared.state.lock();
        (state.scroll_mode, state.spread_mode)
    }

    fn go_to(&self, page_number: usize) -> bool {
        let changed = {
            let mut state = self.shared.state.lock();
            if page_number == 0 || page_number > state.pages_count {
                return false;
            }
            let changed = state.page != page_number;
            state.page = page_number;
            changed
        };
        if changed {
            self.publish_page_change();
            self.render_page(page_number);
        }
        true
    }

    fn publish_page_change(&self) {
        let (page_number, page_label, location) = {
            let state = self.shared.state.lock();
            (state.page, state.label(), state.location())
        };
        self.shared.bus.dispatch(ViewerEvent::PageChanging {
            page_number,
            page_label,
        });
        self.shared
            .bus
            .dispatch(ViewerEvent::UpdateViewArea { location });
    }

    fn publish_view_area(&self) {
        let location = self.shared.state.lock().location();
        self.shared
            .bus
            .dispatch(ViewerEvent::UpdateViewArea { location });
    }

    /// Measures the page and reports it rendered, then arms the idle timer.
    fn render_page(&self, page_number: usize) {
        let Some(document) = self.shared.state.lock().document.clone() else {
            return;
        };
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let error = document
                .page(page_number)
                .await
                .err()
                .map(|err| format!("{err:#}"));
            if shared.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            shared.finish_render(page_number, error);
        });
    }

    async fn load_pages(shared: Arc<Shared>, document: Arc<dyn Document>, generation: u64) {
        let first = document.page(1).await;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        shared.first_page.send_replace(true);
        let error = first.as_ref().err().map(|err| format!("{err:#}"));
        let timestamp = shared.finish_render(1, error);
        shared.one_page.send_replace(Some(timestamp));

        let mut equal = true;
        if let Ok(first) = first {
            for page_number in 2..=document.num_pages() {
                match document.page(page_number).await {
                    Ok(page) if page.width != first.width || page.height != first.height => {
                        equal = false;
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(page_number, ?err, "failed to measure page");
                        break;
                    }
                }
                if shared.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
            }
        }
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        debug!(equal, pages = document.num_pages(), "pages measured");
        shared.equal_page_sizes.store(equal, Ordering::SeqCst);
        shared.pages.send_replace(true);
    }
}

impl Shared {
    fn finish_render(self: &Arc<Self>, page_number: usize, error: Option<String>) -> Instant {
        let timestamp = Instant::now();
        if let Some(index) = page_number.checked_sub(1) {
            self.state.lock().rendered.insert(index);
        }
        self.bus.dispatch(ViewerEvent::PageRendered {
            page_number,
            timestamp,
            error,
        });
        self.arm_idle();
        timestamp
    }

    fn arm_idle(self: &Arc<Self>) {
        let render = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(IDLE_TIMEOUT).await;
            if shared.renders.load(Ordering::SeqCst) != render {
                return;
            }
            let hook = shared.on_idle.lock().clone();
            if let Some(hook) = hook {
                trace!("rendering queue idle");
                hook();
            }
        });
    }
}

#[async_trait]
impl PageViewer for TerminalViewer {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.first_page.send_replace(false);
        self.shared.one_page.send_replace(None);
        self.shared.pages.send_replace(false);
        self.shared.equal_page_sizes.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.state.lock();
            state.page = 1;
            state.pages_count = document.as_ref().map_or(0, |d| d.num_pages());
            state.scale_value = None;
            state.rotation = Rotation::default();
            state.labels = None;
            state.rendered.clear();
            state.document = document.clone();
        }
        if let Some(document) = document {
            tokio::spawn(Self::load_pages(
                Arc::clone(&self.shared),
                document,
                generation,
            ));
        }
    }

    async fn first_page_ready(&self) -> Result<()> {
        let mut ready = self.shared.first_page.subscribe();
        ready.wait_for(|ready| *ready).await?;
        Ok(())
    }

    async fn one_page_rendered(&self) -> Result<Instant> {
        let mut rendered = self.shared.one_page.subscribe();
        let timestamp = rendered.wait_for(Option::is_some).await.map(|t| *t)?;
        timestamp.ok_or_else(|| anyhow!("no page rendered"))
    }

    async fn pages_ready(&self) -> Result<()> {
        let mut ready = self.shared.pages.subscribe();
        ready.wait_for(|ready| *ready).await?;
        Ok(())
    }

    fn has_equal_page_sizes(&self) -> bool {
        self.shared.equal_page_sizes.load(Ordering::SeqCst)
    }

    fn current_page_number(&self) -> usize {
        self.shared.state.lock().page
    }

    fn set_current_page_number(&self, page_number: usize) -> bool {
        self.go_to(page_number)
    }

    fn current_page_label(&self) -> Option<String> {
        self.shared.state.lock().label()
    }

    fn current_scale_value(&self) -> Option<String> {
        self.shared.state.lock().scale_value.clone()
    }

    fn set_current_scale_value(&self, value: &str) {
        self.shared.state.lock().scale_value = Some(value.to_owned());
        let (preset_value, scale) = match value.parse::<f32>() {
            Ok(scale) => (None, scale),
            Err(_) => (Some(value.to_owned()), 1.0),
        };
        self.shared.bus.dispatch(ViewerEvent::ScaleChanging {
            preset_value,
            scale,
        });
        self.publish_view_area();
    }

    fn set_pages_rotation(&self, rotation: Rotation) {
        self.shared.state.lock().rotation = rotation;
        self.publish_view_area();
    }

    fn set_scroll_mode(&self, mode: ScrollMode) {
        if !mode.is_known() {
            return;
        }
        self.shared.state.lock().scroll_mode = mode;
        self.shared
            .bus
            .dispatch(ViewerEvent::ScrollModeChanged { mode });
    }

    fn set_spread_mode(&self, mode: SpreadMode) {
        if !mode.is_known() {
            return;
        }
        self.shared.state.lock().spread_mode = mode;
        self.shared
            .bus
            .dispatch(ViewerEvent::SpreadModeChanged { mode });
    }

    fn set_page_labels(&self, labels: Option<Vec<String>>) {
        let mut state = self.shared.state.lock();
        let pages_count = state.pages_count;
        state.labels = labels.filter(|labels| labels.len() == pages_count);
    }

    fn set_text_copy_enabled(&self, enabled: bool) {
        trace!(enabled, "text copy has no terminal counterpart");
    }

    fn page_rendering_state(&self, page_index: usize) -> Option<RenderingState> {
        self.shared
            .state
            .lock()
            .rendered
            .contains(&page_index)
            .then_some(RenderingState::Finished)
    }

    fn next_page(&self) -> bool {
        let page = self.current_page_number();
        self.go_to(page + 1)
    }

    fn previous_page(&self) -> bool {
        let page = self.current_page_number();
        page > 1 && self.go_to(page - 1)
    }

    fn renderer(&self) -> RendererType {
        self.shared.renderer
    }

    fn update(&self) {
        let page = self.current_page_number();
        let rendered = page
            .checked_sub(1)
            .is_some_and(|index| self.shared.state.lock().rendered.contains(&index));
        if !rendered {
            self.render_page(page);
        }
    }

    fn cleanup(&self) {
        let mut state = self.shared.state.lock();
        let current = state.page.saturating_sub(1);
        state.rendered.retain(|index| *index == current);
    }
}

impl RenderingQueue for TerminalViewer {
    fn set_on_idle(&self, hook: Option<IdleHook>) {
        *self.shared.on_idle.lock() = hook;
    }

    fn set_thumbnail_view_enabled(&self, enabled: bool) {
        trace!(enabled, "thumbnail rendering toggled");
    }

    fn render_highest_priority(&self) {
        self.update();
    }
}

/// A position decoded from a link hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashTarget {
    pub page: Option<usize>,
    pub zoom: Option<String>,
    pub named_dest: Option<String>,
}

/// Decodes `page=3&zoom=1.5,0,0`, `zoom=page-fit` or `nameddest=intro`.
/// A bare number is a page.
pub fn parse_hash(hash: &str) -> HashTarget {
    let hash = hash.trim_start_matches('#');
    let mut target = HashTarget::default();
    if !hash.contains('=') {
        target.page = hash.trim().parse().ok();
        if target.page.is_none() && !hash.trim().is_empty() {
            target.named_dest = Some(hash.trim().to_owned());
        }
        return target;
    }
    for pair in hash.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "page" => target.page = value.trim().parse().ok(),
            "zoom" => {
                target.zoom = value
                    .split(',')
                    .next()
                    .map(str::trim)
                    .filter(|zoom| !zoom.is_empty())
                    .map(str::to_owned)
            }
            "nameddest" => target.named_dest = Some(value.to_owned()),
            _ => {}
        }
    }
    target
}

/// Link service over the terminal viewer. Named destinations are not
/// resolvable without a destination table, so they are logged and ignored.
pub struct TerminalLinks {
    viewer: TerminalViewer,
    external_links: AtomicBool,
    has_document: AtomicBool,
}

impl TerminalLinks {
    pub fn new(viewer: TerminalViewer) -> Self {
        Self {
            viewer,
            external_links: AtomicBool::new(true),
            has_document: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn external_links_enabled(&self) -> bool {
        self.external_links.load(Ordering::SeqCst)
    }
}

impl LinkService for TerminalLinks {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.has_document
            .store(document.is_some(), Ordering::SeqCst);
    }

    fn set_hash(&self, hash: &str) {
        if !self.has_document.load(Ordering::SeqCst) {
            return;
        }
        let target = parse_hash(hash);
        if let Some(zoom) = &target.zoom {
            self.viewer.set_current_scale_value(zoom);
        }
        if let Some(page) = target.page {
            if !self.viewer.set_current_page_number(page) {
                debug!(page, "hash points outside the document");
            }
        }
        if let Some(dest) = target.named_dest {
            debug!(%dest, "named destinations are not resolved");
        }
    }

    fn go_to_page(&self, page_number: usize) {
        self.viewer.set_current_page_number(page_number);
    }

    fn set_external_links_enabled(&self, enabled: bool) {
        self.external_links.store(enabled, Ordering::SeqCst);
    }
}
