//! Recording fakes for the collaborator traits.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::bus::{EventBus, FindMatchesCount, FindQuery, FindState, ViewerEvent};
use crate::controller::{Collaborators, SessionController};
use crate::engine::{
    Attachment, Document, DocumentEngine, DocumentMetadata, DocumentParams, DocumentSource,
    DownloadInfo, FieldObjects, LoadingTask, MarkInfo, OpenAction, OptionalContentConfig,
    OutlineNode, PageInfo, PasswordCallback, PasswordReason, PasswordRequest, Permission,
    ProgressCallback, ProgressData, UnsupportedFeature, UnsupportedFeatureCallback,
};
use crate::error::LoadError;
use crate::history::{
    MemoryHistoryBackend, ViewHistoryFactory, ViewStateStore, ViewStateStoreFactory,
};
use crate::idle::{IdleCallback, IdleHandle, IdleScheduler};
use crate::options::AppOptions;
use crate::types::{
    PageLayout, PageMode, RendererType, RenderingState, Rotation, ScrollMode, SidebarView,
    SpreadMode, ViewStateRecord, ViewStateUpdate,
};
use crate::viewer::{
    AttachmentView, DocumentProperties, ErrorReporter, FindBar, FindController, HostServices,
    IdleHook, LayerView, LinkService, OutlineView, PageViewer, PasswordPrompt, Progress,
    ProgressReporter, RenderingQueue, ScriptingHost, Sidebar, TelemetryEvent, ThumbnailViewer,
    Toolbar,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    EngineOpen(String),
    TaskDestroyed,
    ViewerDocument(Option<String>),
    ThumbnailsDocument(Option<String>),
    LinkDocument(Option<String>),
    FindDocument(Option<String>),
    PropertiesDocument(Option<String>),
    SetHash(String),
    ExternalLinks(bool),
    Rotation(u16),
    ScrollMode(ScrollMode),
    SpreadMode(SpreadMode),
    ScaleValue(String),
    SetPage(usize),
    NextPage,
    PreviousPage,
    ViewerLabels(Option<Vec<String>>),
    TextCopy(bool),
    ViewerUpdate,
    ViewerCleanup,
    ThumbnailLabels(Option<Vec<String>>),
    ThumbnailScrolled(usize),
    ThumbnailImage(usize),
    ThumbnailsCleanup,
    ThumbnailViewEnabled(bool),
    RenderHighestPriority,
    SidebarInitialView(SidebarView),
    SidebarSwitch(SidebarView, bool),
    SidebarReset,
    ToolbarPageNumber(usize, Option<String>),
    ToolbarPagesCount(usize, bool),
    ToolbarScale(Option<String>),
    ToolbarLoading(bool),
    ToolbarReset,
    OutlineRender(usize),
    OutlineReset,
    AttachmentsRender(Vec<String>),
    AttachmentsReset,
    LayersRender(usize),
    LayersReset,
    FindCommand(String, String),
    FindResults(FindMatchesCount),
    FindState(FindState),
    FindBarReset,
    PropertiesOpen,
    FieldObjects(Option<usize>),
    PasswordPrompt(PasswordReason),
    Progress(Progress),
    ProgressHidden,
    Error(String),
    Fallback(UnsupportedFeature),
    Telemetry(TelemetryEvent),
    Title(String),
    StoreGet(String),
    StoreSet(String, ViewStateUpdate),
    StoreSetMultiple(String, ViewStateRecord),
}

fn fingerprint_of(document: &Option<Arc<dyn Document>>) -> Option<String> {
    document.as_ref().map(|d| d.fingerprint().to_owned())
}

/// Shared log of every collaborator call, plus the knobs the fakes read.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    thumbnail_view_visible: AtomicBool,
    password: Mutex<Option<String>>,
    idle_hook: Mutex<Option<IdleHook>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.calls.lock().contains(call)
    }

    pub fn hashes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::SetHash(hash) => Some(hash.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn set_thumbnail_view_visible(&self, visible: bool) {
        self.thumbnail_view_visible.store(visible, Ordering::SeqCst);
    }

    pub fn set_password(&self, password: Option<&str>) {
        *self.password.lock() = password.map(str::to_owned);
    }

    /// Invokes the hook the controller installed on the rendering queue.
    pub fn run_idle_hook(&self) {
        let hook = self.idle_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn has_idle_hook(&self) -> bool {
        self.idle_hook.lock().is_some()
    }
}

impl ThumbnailViewer for Recorder {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.push(Call::ThumbnailsDocument(fingerprint_of(&document)));
    }
    fn set_page_labels(&self, labels: Option<Vec<String>>) {
        self.push(Call::ThumbnailLabels(labels));
    }
    fn scroll_thumbnail_into_view(&self, page_number: usize) {
        self.push(Call::ThumbnailScrolled(page_number));
    }
    fn set_image_from_page(&self, page_number: usize) {
        self.push(Call::ThumbnailImage(page_number));
    }
    fn cleanup(&self) {
        self.push(Call::ThumbnailsCleanup);
    }
}

impl RenderingQueue for Recorder {
    fn set_on_idle(&self, hook: Option<IdleHook>) {
        *self.idle_hook.lock() = hook;
    }
    fn set_thumbnail_view_enabled(&self, enabled: bool) {
        self.push(Call::ThumbnailViewEnabled(enabled));
    }
    fn render_highest_priority(&self) {
        self.push(Call::RenderHighestPriority);
    }
}

impl LinkService for Recorder {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.push(Call::LinkDocument(fingerprint_of(&document)));
    }
    fn set_hash(&self, hash: &str) {
        self.push(Call::SetHash(hash.to_owned()));
    }
    fn go_to_page(&self, page_number: usize) {
        self.push(Call::SetPage(page_number));
    }
    fn set_external_links_enabled(&self, enabled: bool) {
        self.push(Call::ExternalLinks(enabled));
    }
}

impl Sidebar for Recorder {
    fn set_initial_view(&self, view: SidebarView) {
        self.push(Call::SidebarInitialView(view));
    }
    fn switch_view(&self, view: SidebarView, force_open: bool) {
        self.push(Call::SidebarSwitch(view, force_open));
    }
    fn is_thumbnail_view_visible(&self) -> bool {
        self.thumbnail_view_visible.load(Ordering::SeqCst)
    }
    fn reset(&self) {
        self.push(Call::SidebarReset);
    }
}

impl Toolbar for Recorder {
    fn set_page_number(&self, page_number: usize, page_label: Option<&str>) {
        self.push(Call::ToolbarPageNumber(
            page_number,
            page_label.map(str::to_owned),
        ));
    }
    fn set_pages_count(&self, count: usize, has_page_labels: bool) {
        self.push(Call::ToolbarPagesCount(count, has_page_labels));
    }
    fn set_page_scale(&self, preset_value: Option<&str>, _scale: f32) {
        self.push(Call::ToolbarScale(preset_value.map(str::to_owned)));
    }
    fn update_loading_indicator_state(&self, loading: bool) {
        self.push(Call::ToolbarLoading(loading));
    }
    fn reset(&self) {
        self.push(Call::ToolbarReset);
    }
}

impl OutlineView for Recorder {
    fn render(&self, outline: &[OutlineNode]) {
        self.push(Call::OutlineRender(outline.len()));
    }
    fn reset(&self) {
        self.push(Call::OutlineReset);
    }
}

impl AttachmentView for Recorder {
    fn render(&self, attachments: &BTreeMap<String, Attachment>) {
        self.push(Call::AttachmentsRender(attachments.keys().cloned().collect()));
    }
    fn reset(&self) {
        self.push(Call::AttachmentsReset);
    }
}

impl LayerView for Recorder {
    fn render(&self, config: &OptionalContentConfig) {
        self.push(Call::LayersRender(config.groups.len()));
    }
    fn reset(&self) {
        self.push(Call::LayersReset);
    }
}

impl FindController for Recorder {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.push(Call::FindDocument(fingerprint_of(&document)));
    }
    fn execute_command(&self, command: &str, query: &FindQuery) {
        self.push(Call::FindCommand(command.to_owned(), query.query.clone()));
    }
}

impl FindBar for Recorder {
    fn update_results_count(&self, matches: FindMatchesCount) {
        self.push(Call::FindResults(matches));
    }
    fn update_ui_state(&self, state: FindState, _previous: bool, _matches: FindMatchesCount) {
        self.push(Call::FindState(state));
    }
    fn reset(&self) {
        self.push(Call::FindBarReset);
    }
}

impl DocumentProperties for Recorder {
    fn set_document(&self, document: Option<Arc<dyn Document>>, _url: Option<&str>) {
        self.push(Call::PropertiesDocument(fingerprint_of(&document)));
    }
    fn open(&self) {
        self.push(Call::PropertiesOpen);
    }
}

impl ScriptingHost for Recorder {
    fn set_field_objects(&self, fields: Option<FieldObjects>) {
        self.push(Call::FieldObjects(fields.map(|f| f.len())));
    }
}

#[async_trait]
impl PasswordPrompt for Recorder {
    async fn request(&self, reason: PasswordReason) -> Option<String> {
        self.push(Call::PasswordPrompt(reason));
        self.password.lock().clone()
    }
}

impl ProgressReporter for Recorder {
    fn set_progress(&self, progress: Progress) {
        self.push(Call::Progress(progress));
    }
    fn hide(&self) {
        self.push(Call::ProgressHidden);
    }
}

impl ErrorReporter for Recorder {
    fn report(&self, message: &str, _details: &str) {
        self.push(Call::Error(message.to_owned()));
    }
}

impl HostServices for Recorder {
    fn fallback(&self, feature: UnsupportedFeature, _url: &str) {
        self.push(Call::Fallback(feature));
    }
    fn report_telemetry(&self, event: TelemetryEvent) {
        self.push(Call::Telemetry(event));
    }
    fn set_title(&self, title: &str) {
        self.push(Call::Title(title.to_owned()));
    }
}

/// View history over a memory backend that records every store call.
pub struct RecordingHistory {
    recorder: Arc<Recorder>,
    inner: ViewHistoryFactory,
}

struct RecordingStore {
    recorder: Arc<Recorder>,
    fingerprint: String,
    inner: Arc<dyn ViewStateStore>,
}

impl ViewStateStoreFactory for RecordingHistory {
    fn open(&self, fingerprint: &str) -> Arc<dyn ViewStateStore> {
        Arc::new(RecordingStore {
            recorder: Arc::clone(&self.recorder),
            fingerprint: fingerprint.to_owned(),
            inner: self.inner.open(fingerprint),
        })
    }
}

#[async_trait]
impl ViewStateStore for RecordingStore {
    async fn get_multiple(&self, defaults: &ViewStateRecord) -> Result<ViewStateRecord> {
        self.recorder.push(Call::StoreGet(self.fingerprint.clone()));
        self.inner.get_multiple(defaults).await
    }

    async fn set(&self, update: ViewStateUpdate) -> Result<()> {
        self.recorder
            .push(Call::StoreSet(self.fingerprint.clone(), update));
        self.inner.set(update).await
    }

    async fn set_multiple(&self, record: ViewStateRecord) -> Result<()> {
        self.recorder
            .push(Call::StoreSetMultiple(self.fingerprint.clone(), record.clone()));
        self.inner.set_multiple(record).await
    }
}

struct ViewerState {
    page: usize,
    pages_count: usize,
    scale: Option<String>,
    labels: Option<Vec<String>>,
}

/// Primary viewer whose readiness milestones are fired by the test.
pub struct FakeViewer {
    recorder: Arc<Recorder>,
    bus: EventBus,
    state: Mutex<ViewerState>,
    first_page: watch::Sender<bool>,
    one_page: watch::Sender<Option<Instant>>,
    pages: watch::Sender<bool>,
    equal_page_sizes: AtomicBool,
    renderer: Mutex<RendererType>,
    rendering_state: Mutex<Option<RenderingState>>,
}

impl FakeViewer {
    pub fn new(recorder: Arc<Recorder>, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            recorder,
            bus,
            state: Mutex::new(ViewerState {
                page: 1,
                pages_count: 0,
                scale: None,
                labels: None,
            }),
            first_page: watch::channel(false).0,
            one_page: watch::channel(None).0,
            pages: watch::channel(false).0,
            equal_page_sizes: AtomicBool::new(true),
            renderer: Mutex::new(RendererType::Canvas),
            rendering_state: Mutex::new(None),
        })
    }

    pub fn fire_first_page(&self) {
        self.first_page.send_replace(true);
    }

    pub fn fire_page_rendered(&self) {
        self.one_page.send_replace(Some(Instant::now()));
    }

    pub fn fire_pages_ready(&self) {
        self.pages.send_replace(true);
    }

    pub fn set_equal_page_sizes(&self, equal: bool) {
        self.equal_page_sizes.store(equal, Ordering::SeqCst);
    }

    pub fn set_renderer(&self, renderer: RendererType) {
        *self.renderer.lock() = renderer;
    }

    pub fn set_current_rendering_state(&self, state: Option<RenderingState>) {
        *self.rendering_state.lock() = state;
    }
}

#[async_trait]
impl PageViewer for FakeViewer {
    fn set_document(&self, document: Option<Arc<dyn Document>>) {
        self.recorder
            .push(Call::ViewerDocument(fingerprint_of(&document)));
        self.first_page.send_replace(false);
        self.one_page.send_replace(None);
        self.pages.send_replace(false);
        let mut state = self.state.lock();
        state.page = 1;
        state.scale = None;
        state.labels = None;
        state.pages_count = document.map_or(0, |d| d.num_pages());
    }

    async fn first_page_ready(&self) -> Result<()> {
        let mut ready = self.first_page.subscribe();
        ready.wait_for(|ready| *ready).await?;
        Ok(())
    }

    async fn one_page_rendered(&self) -> Result<Instant> {
        let mut rendered = self.one_page.subscribe();
        let timestamp = rendered.wait_for(Option::is_some).await.map(|t| *t)?;
        timestamp.ok_or_else(|| anyhow!("no page rendered"))
    }

    async fn pages_ready(&self) -> Result<()> {
        let mut ready = self.pages.subscribe();
        ready.wait_for(|ready| *ready).await?;
        Ok(())
    }

    fn has_equal_page_sizes(&self) -> bool {
        self.equal_page_sizes.load(Ordering::SeqCst)
    }

    fn current_page_number(&self) -> usize {
        self.state.lock().page
    }

    fn set_current_page_number(&self, page_number: usize) -> bool {
        self.recorder.push(Call::SetPage(page_number));
        let mut state = self.state.lock();
        if page_number == 0 || page_number > state.pages_count {
            return false;
        }
        state.page = page_number;
        true
    }

    fn current_page_label(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .labels
            .as_ref()
            .and_then(|labels| labels.get(state.page - 1).cloned())
    }

    fn current_scale_value(&self) -> Option<String> {
        self.state.lock().scale.clone()
    }

    fn set_current_scale_value(&self, value: &str) {
        self.recorder.push(Call::ScaleValue(value.to_owned()));
        self.state.lock().scale = Some(value.to_owned());
    }

    fn set_pages_rotation(&self, rotation: Rotation) {
        self.recorder.push(Call::Rotation(rotation.degrees()));
    }

    fn set_scroll_mode(&self, mode: ScrollMode) {
        self.recorder.push(Call::ScrollMode(mode));
        self.bus.dispatch(ViewerEvent::ScrollModeChanged { mode });
    }

    fn set_spread_mode(&self, mode: SpreadMode) {
        self.recorder.push(Call::SpreadMode(mode));
        self.bus.dispatch(ViewerEvent::SpreadModeChanged { mode });
    }

    fn set_page_labels(&self, labels: Option<Vec<String>>) {
        self.recorder.push(Call::ViewerLabels(labels.clone()));
        self.state.lock().labels = labels;
    }

    fn set_text_copy_enabled(&self, enabled: bool) {
        self.recorder.push(Call::TextCopy(enabled));
    }

    fn page_rendering_state(&self, _page_index: usize) -> Option<RenderingState> {
        *self.rendering_state.lock()
    }

    fn next_page(&self) -> bool {
        self.recorder.push(Call::NextPage);
        true
    }

    fn previous_page(&self) -> bool {
        self.recorder.push(Call::PreviousPage);
        true
    }

    fn renderer(&self) -> RendererType {
        *self.renderer.lock()
    }

    fn update(&self) {
        self.recorder.push(Call::ViewerUpdate);
    }

    fn cleanup(&self) {
        self.recorder.push(Call::ViewerCleanup);
    }
}

/// Holds document fetches until released.
#[derive(Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: Arc::new(watch::channel(false).0),
        }
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

pub struct FakeDocument {
    pub fingerprint: String,
    pub num_pages: usize,
    pub outline: Option<Vec<OutlineNode>>,
    pub attachments: Option<BTreeMap<String, Attachment>>,
    pub optional_content: Option<OptionalContentConfig>,
    pub metadata: DocumentMetadata,
    pub permissions: Option<Vec<Permission>>,
    pub page_labels: Option<Vec<String>>,
    pub page_layout: Option<PageLayout>,
    pub page_mode: Option<PageMode>,
    pub open_action: Option<OpenAction>,
    pub mark_info: Option<MarkInfo>,
    pub field_objects: Option<FieldObjects>,
    pub fail_outline: bool,
    pub gate: Option<Gate>,
    pub cleanups: AtomicUsize,
}

impl FakeDocument {
    pub fn new(fingerprint: &str, num_pages: usize) -> Self {
        Self {
            fingerprint: fingerprint.to_owned(),
            num_pages,
            outline: None,
            attachments: None,
            optional_content: None,
            metadata: DocumentMetadata::default(),
            permissions: None,
            page_labels: None,
            page_layout: None,
            page_mode: None,
            open_action: None,
            mark_info: None,
            field_objects: None,
            fail_outline: false,
            gate: None,
            cleanups: AtomicUsize::new(0),
        }
    }

    async fn wait(&self) {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
    }
}

#[async_trait]
impl Document for FakeDocument {
    fn num_pages(&self) -> usize {
        self.num_pages
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn page(&self, page_number: usize) -> Result<PageInfo> {
        Ok(PageInfo {
            page_number,
            width: 612.0,
            height: 792.0,
            rotate: 0,
        })
    }

    async fn outline(&self) -> Result<Option<Vec<OutlineNode>>> {
        self.wait().await;
        if self.fail_outline {
            return Err(anyhow!("broken outline"));
        }
        Ok(self.outline.clone())
    }

    async fn attachments(&self) -> Result<Option<BTreeMap<String, Attachment>>> {
        self.wait().await;
        Ok(self.attachments.clone())
    }

    async fn optional_content_config(&self) -> Result<Option<OptionalContentConfig>> {
        self.wait().await;
        Ok(self.optional_content.clone())
    }

    async fn metadata(&self) -> Result<DocumentMetadata> {
        self.wait().await;
        Ok(self.metadata.clone())
    }

    async fn permissions(&self) -> Result<Option<Vec<Permission>>> {
        self.wait().await;
        Ok(self.permissions.clone())
    }

    async fn page_labels(&self) -> Result<Option<Vec<String>>> {
        self.wait().await;
        Ok(self.page_labels.clone())
    }

    async fn page_layout(&self) -> Result<Option<PageLayout>> {
        Ok(self.page_layout)
    }

    async fn page_mode(&self) -> Result<Option<PageMode>> {
        Ok(self.page_mode)
    }

    async fn open_action(&self) -> Result<Option<OpenAction>> {
        Ok(self.open_action.clone())
    }

    async fn mark_info(&self) -> Result<Option<MarkInfo>> {
        Ok(self.mark_info)
    }

    async fn field_objects(&self) -> Result<Option<FieldObjects>> {
        self.wait().await;
        Ok(self.field_objects.clone())
    }

    async fn download_info(&self) -> Result<DownloadInfo> {
        Ok(DownloadInfo { length: 1024 })
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

type Completion = Result<Arc<dyn Document>, LoadError>;

pub struct FakeLoadingTask {
    recorder: Arc<Recorder>,
    pub params: DocumentParams,
    resolver: Mutex<Option<oneshot::Sender<Completion>>>,
    completion: Mutex<Option<oneshot::Receiver<Completion>>>,
    password: Mutex<Option<PasswordCallback>>,
    progress: Mutex<Option<ProgressCallback>>,
    unsupported: Mutex<Option<UnsupportedFeatureCallback>>,
}

impl FakeLoadingTask {
    fn new(recorder: Arc<Recorder>, params: DocumentParams) -> Self {
        let (resolver, completion) = oneshot::channel();
        Self {
            recorder,
            params,
            resolver: Mutex::new(Some(resolver)),
            completion: Mutex::new(Some(completion)),
            password: Mutex::new(None),
            progress: Mutex::new(None),
            unsupported: Mutex::new(None),
        }
    }

    pub fn resolve(&self, document: Arc<dyn Document>) {
        self.finish(Ok(document));
    }

    pub fn reject(&self, error: LoadError) {
        self.finish(Err(error));
    }

    fn finish(&self, result: Completion) {
        if let Some(resolver) = self.resolver.lock().take() {
            let _ = resolver.send(result);
        }
    }

    pub fn emit_progress(&self, loaded: u64, total: Option<u64>) {
        let callback = self.progress.lock().clone();
        if let Some(callback) = callback {
            callback(ProgressData { loaded, total });
        }
    }

    pub fn emit_unsupported(&self, feature: UnsupportedFeature) {
        let callback = self.unsupported.lock().clone();
        if let Some(callback) = callback {
            callback(feature);
        }
    }

    pub fn request_password(&self, reason: PasswordReason) -> oneshot::Receiver<Option<String>> {
        let (request, response) = PasswordRequest::new(reason);
        let callback = self.password.lock().clone();
        if let Some(callback) = callback {
            callback(request);
        }
        response
    }
}

#[async_trait]
impl LoadingTask for FakeLoadingTask {
    fn on_password(&self, callback: PasswordCallback) {
        *self.password.lock() = Some(callback);
    }

    fn on_progress(&self, callback: ProgressCallback) {
        *self.progress.lock() = Some(callback);
    }

    fn on_unsupported_feature(&self, callback: UnsupportedFeatureCallback) {
        *self.unsupported.lock() = Some(callback);
    }

    async fn completion(&self) -> Result<Arc<dyn Document>, LoadError> {
        let receiver = self.completion.lock().take();
        match receiver {
            Some(receiver) => receiver.await.unwrap_or(Err(LoadError::Destroyed)),
            None => Err(LoadError::Other(anyhow!("completion awaited twice"))),
        }
    }

    async fn destroy(&self) {
        self.recorder.push(Call::TaskDestroyed);
        self.resolver.lock().take();
        tokio::task::yield_now().await;
    }
}

pub struct FakeEngine {
    recorder: Arc<Recorder>,
    prepared: Mutex<VecDeque<Completion>>,
    tasks: Mutex<Vec<Arc<FakeLoadingTask>>>,
    fail_open: Mutex<Option<LoadError>>,
}

impl FakeEngine {
    pub fn new(recorder: Arc<Recorder>) -> Arc<Self> {
        Arc::new(Self {
            recorder,
            prepared: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(Vec::new()),
            fail_open: Mutex::new(None),
        })
    }

    /// The next opened task completes immediately with `result`.
    pub fn prepare(&self, result: Completion) {
        self.prepared.lock().push_back(result);
    }

    pub fn fail_next_open(&self, error: LoadError) {
        *self.fail_open.lock() = Some(error);
    }

    pub fn task(&self, index: usize) -> Arc<FakeLoadingTask> {
        Arc::clone(&self.tasks.lock()[index])
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn last_task(&self) -> Arc<FakeLoadingTask> {
        let tasks = self.tasks.lock();
        Arc::clone(&tasks[tasks.len() - 1])
    }
}

impl DocumentEngine for FakeEngine {
    fn open_document(&self, params: DocumentParams) -> Result<Arc<dyn LoadingTask>, LoadError> {
        self.recorder.push(Call::EngineOpen(params.source.to_string()));
        if let Some(error) = self.fail_open.lock().take() {
            return Err(error);
        }
        let task = Arc::new(FakeLoadingTask::new(Arc::clone(&self.recorder), params));
        if let Some(result) = self.prepared.lock().pop_front() {
            task.finish(result);
        }
        self.tasks.lock().push(Arc::clone(&task));
        Ok(task)
    }
}

/// Runs idle callbacks only when the test asks.
#[derive(Default)]
pub struct ManualIdleScheduler {
    next_id: AtomicU64,
    pending: Arc<Mutex<Vec<(u64, IdleCallback)>>>,
}

impl ManualIdleScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn run_all(&self) {
        let callbacks: Vec<_> = self.pending.lock().drain(..).collect();
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl IdleScheduler for ManualIdleScheduler {
    fn request_idle(&self, callback: IdleCallback) -> IdleHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push((id, callback));
        let pending = Arc::clone(&self.pending);
        IdleHandle::new(move || pending.lock().retain(|(existing, _)| *existing != id))
    }
}

/// A controller wired to fakes.
pub struct Harness {
    pub controller: Arc<SessionController>,
    pub recorder: Arc<Recorder>,
    pub viewer: Arc<FakeViewer>,
    pub engine: Arc<FakeEngine>,
    pub idle: Arc<ManualIdleScheduler>,
    pub history: Arc<MemoryHistoryBackend>,
    pub bus: EventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(AppOptions::new())
    }

    pub fn with_options(options: AppOptions) -> Self {
        let recorder = Recorder::new();
        let bus = EventBus::new();
        let viewer = FakeViewer::new(Arc::clone(&recorder), bus.clone());
        let engine = FakeEngine::new(Arc::clone(&recorder));
        let idle = ManualIdleScheduler::new();
        let history = Arc::new(MemoryHistoryBackend::new());
        let parts = Collaborators {
            engine: engine.clone(),
            history: Arc::new(RecordingHistory {
                recorder: Arc::clone(&recorder),
                inner: ViewHistoryFactory::new(history.clone(), 20),
            }),
            viewer: viewer.clone(),
            thumbnails: recorder.clone(),
            rendering_queue: recorder.clone(),
            link_service: recorder.clone(),
            sidebar: recorder.clone(),
            toolbar: recorder.clone(),
            outline: recorder.clone(),
            attachments: recorder.clone(),
            layers: recorder.clone(),
            find_controller: recorder.clone(),
            find_bar: recorder.clone(),
            properties: recorder.clone(),
            scripting: recorder.clone(),
            password_prompt: recorder.clone(),
            progress: recorder.clone(),
            errors: recorder.clone(),
            services: recorder.clone(),
            idle: idle.clone(),
            bus: bus.clone(),
        };
        let controller = SessionController::new(parts, options);
        Self {
            controller,
            recorder,
            viewer,
            engine,
            idle,
            history,
            bus,
        }
    }

    /// Stores a view state for `fingerprint` before the document opens.
    pub async fn store_view_state(&self, fingerprint: &str, record: ViewStateRecord) {
        ViewHistoryFactory::new(self.history.clone(), 20)
            .open(fingerprint)
            .set_multiple(record)
            .await
            .expect("memory backend never fails");
    }

    /// Opens `document` through a task that has already resolved.
    pub async fn open(&self, url: &str, document: Arc<dyn Document>, bookmark: Option<&str>) {
        self.engine.prepare(Ok(document));
        self.controller
            .open(
                DocumentSource::Url(url.to_owned()),
                crate::engine::OpenArgs {
                    bookmark: bookmark.map(str::to_owned),
                    ..Default::default()
                },
            )
            .await
            .expect("prepared document opens");
    }

    /// Lets spawned tasks run until they block.
    pub async fn settle(&self) {
        settle().await;
    }
}

pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
