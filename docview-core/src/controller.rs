//! The document-session lifecycle controller.
//!
//! A [`SessionController`] owns at most one open document at a time. Opening
//! a document tears down the previous session, hands the source to the
//! engine and, once the document resolves, fans out the auxiliary fetches and
//! reconciles the initial view. Every asynchronous completion is checked
//! against the [`SessionClock`] before it touches shared state, so results
//! computed for a superseded document are dropped.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::bus::{EventBus, EventKind, FindKind, FindQuery, ViewerEvent};
use crate::engine::{
    merge_open_parameters, Document, DocumentEngine, DocumentInfo, DocumentMetadata,
    DocumentSource, LoadingTask, OpenAction, OpenArgs, Permission, UnsupportedFeature,
    XmpMetadata,
};
use crate::error::{LoadError, LoadFailure};
use crate::fanout::{
    base_url, file_name_from_url, form_type, generator_id, page_labels_are_meaningful,
    resolve_title, version_id,
};
use crate::guard::{guarded, SessionClock, SessionToken};
use crate::history::{ViewStateStore, ViewStateStoreFactory};
use crate::idle::{IdleRegistry, IdleScheduler};
use crate::options::{AppOptions, OptionKind};
use crate::progress::ProgressTracker;
use crate::reconcile::{InitialViewInputs, InitialViewOptions, InitialViewPlan};
use crate::types::{
    PageLayout, PageMode, RendererType, RenderingState, Rotation, SidebarView, ViewOnLoad,
    ViewStateRecord, ViewStateUpdate, DEFAULT_SCALE_VALUE,
};
use crate::viewer::{
    AttachmentView, DocumentProperties, ErrorReporter, FindBar, FindController, HostServices,
    LayerView, LinkService, OutlineView, PageViewer, PasswordPrompt, ProgressReporter,
    RenderingQueue, ScriptingHost, Sidebar, TelemetryEvent, ThumbnailViewer, Toolbar,
};

/// Everything the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn DocumentEngine>,
    pub history: Arc<dyn ViewStateStoreFactory>,
    pub viewer: Arc<dyn PageViewer>,
    pub thumbnails: Arc<dyn ThumbnailViewer>,
    pub rendering_queue: Arc<dyn RenderingQueue>,
    pub link_service: Arc<dyn LinkService>,
    pub sidebar: Arc<dyn Sidebar>,
    pub toolbar: Arc<dyn Toolbar>,
    pub outline: Arc<dyn OutlineView>,
    pub attachments: Arc<dyn AttachmentView>,
    pub layers: Arc<dyn LayerView>,
    pub find_controller: Arc<dyn FindController>,
    pub find_bar: Arc<dyn FindBar>,
    pub properties: Arc<dyn DocumentProperties>,
    pub scripting: Arc<dyn ScriptingHost>,
    pub password_prompt: Arc<dyn PasswordPrompt>,
    pub progress: Arc<dyn ProgressReporter>,
    pub errors: Arc<dyn ErrorReporter>,
    pub services: Arc<dyn HostServices>,
    pub idle: Arc<dyn IdleScheduler>,
    pub bus: EventBus,
}

#[derive(Default)]
struct SessionState {
    document: Option<Arc<dyn Document>>,
    loading_task: Option<Arc<dyn LoadingTask>>,
    fingerprint: Option<String>,
    store: Option<Arc<dyn ViewStateStore>>,
    is_initial_view_set: bool,
    initial_bookmark: Option<String>,
    url: String,
    base_url: String,
    title: String,
    document_info: Option<DocumentInfo>,
    metadata: Option<XmpMetadata>,
    content_disposition_filename: Option<String>,
    content_length: Option<u64>,
    download_complete: bool,
    page_labels: Option<Vec<String>>,
    permissions: Option<Vec<Permission>>,
    fellback: bool,
    progress: ProgressTracker,
}

pub struct SessionController {
    parts: Collaborators,
    options: AppOptions,
    clock: SessionClock,
    state: Mutex<SessionState>,
    idle: IdleRegistry,
    weak_self: Weak<SessionController>,
}

impl SessionController {
    pub fn new(parts: Collaborators, options: AppOptions) -> Arc<Self> {
        let controller = Arc::new_cyclic(|weak_self| Self {
            parts,
            options,
            clock: SessionClock::new(),
            state: Mutex::new(SessionState::default()),
            idle: IdleRegistry::new(),
            weak_self: weak_self.clone(),
        });

        let weak = Arc::downgrade(&controller);
        controller
            .parts
            .rendering_queue
            .set_on_idle(Some(Arc::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.cleanup();
                }
            })));
        controller.bind_events();
        controller
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    pub fn bus(&self) -> &EventBus {
        &self.parts.bus
    }

    /// Opens `source`, closing the current session first.
    ///
    /// Resolves once the document is loaded (its auxiliary fetches keep
    /// running in the background) or the load failed. A load superseded by a
    /// later `open` or `close` resolves to `Ok(())` without side effects.
    #[instrument(skip(self, args))]
    pub async fn open(&self, source: DocumentSource, args: OpenArgs) -> Result<(), LoadError> {
        let token = self.clock.advance();
        self.teardown().await;
        if !token.is_current() {
            debug!("open superseded while closing the previous session");
            return Ok(());
        }

        let params = merge_open_parameters(self.options.get_all(OptionKind::Api), source, &args);
        let url = match &params.source {
            DocumentSource::Url(url) => url.clone(),
            DocumentSource::Data(_) => String::new(),
        };
        self.set_title_using_url(&url);

        let task = match self.parts.engine.open_document(params) {
            Ok(task) => task,
            Err(err) => return Err(self.report_load_error(err)),
        };
        let displaced = {
            let mut state = self.state.lock();
            let current = token.is_current();
            if current {
                state.initial_bookmark = args.bookmark;
            }
            current.then(|| state.loading_task.replace(Arc::clone(&task)))
        };
        let Some(displaced) = displaced else {
            task.destroy().await;
            return Ok(());
        };
        if let Some(previous) = displaced {
            previous.destroy().await;
        }
        self.register_task_callbacks(task.as_ref(), &token);

        match task.completion().await {
            Ok(document) if token.is_current() => {
                self.load(document);
                Ok(())
            }
            Ok(_) => {
                debug!("discarding document of a superseded load");
                Ok(())
            }
            Err(err) if token.is_current() => Err(self.report_load_error(err)),
            Err(err) => {
                debug!(?err, "discarding failure of a superseded load");
                Ok(())
            }
        }
    }

    fn register_task_callbacks(&self, task: &dyn LoadingTask, token: &SessionToken) {
        let link_service = Arc::clone(&self.parts.link_service);
        let prompt = Arc::clone(&self.parts.password_prompt);
        let current = token.clone();
        task.on_password(Arc::new(move |request| {
            if !current.is_current() {
                request.respond(None);
                return;
            }
            let link_service = Arc::clone(&link_service);
            let prompt = Arc::clone(&prompt);
            tokio::spawn(async move {
                link_service.set_external_links_enabled(false);
                let password = prompt.request(request.reason()).await;
                request.respond(password);
                link_service.set_external_links_enabled(true);
            });
        }));

        let weak = self.weak_self.clone();
        let current = token.clone();
        task.on_progress(Arc::new(move |data| {
            if !current.is_current() {
                return;
            }
            if let Some(controller) = weak.upgrade() {
                controller.progress(data.level());
            }
        }));

        let weak = self.weak_self.clone();
        let current = token.clone();
        task.on_unsupported_feature(Arc::new(move |feature| {
            if !current.is_current() {
                return;
            }
            if let Some(controller) = weak.upgrade() {
                controller.fallback(feature);
            }
        }));
    }

    fn report_load_error(&self, error: LoadError) -> LoadError {
        let failure = LoadFailure::classify(&error);
        warn!(?error, kind = failure.as_label(), "failed to open document");
        self.parts.errors.report(failure.message(), &error.to_string());
        error
    }

    fn set_title_using_url(&self, url: &str) {
        let title = file_name_from_url(url).unwrap_or_default();
        {
            let mut state = self.state.lock();
            state.url = url.to_owned();
            state.base_url = base_url(url).to_owned();
        }
        self.set_title(&title);
    }

    fn set_title(&self, title: &str) {
        self.state.lock().title = title.to_owned();
        self.parts.services.set_title(title);
    }

    /// Tears down the current session. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.clock.invalidate();
        self.teardown().await;
    }

    /// Releases the current session without touching the clock; callers
    /// decide which generation survives.
    async fn teardown(&self) {
        let Some(task) = self.state.lock().loading_task.take() else {
            return;
        };

        self.parts.thumbnails.set_document(None);
        self.parts.viewer.set_document(None);
        self.parts.link_service.set_document(None);
        self.parts.find_controller.set_document(None);
        self.parts.properties.set_document(None, None);
        self.parts.scripting.set_field_objects(None);
        self.idle.cancel_all();

        *self.state.lock() = SessionState::default();

        self.parts.sidebar.reset();
        self.parts.outline.reset();
        self.parts.attachments.reset();
        self.parts.layers.reset();
        self.parts.find_bar.reset();
        self.parts.toolbar.reset();

        task.destroy().await;
        debug!("session closed");
    }

    /// Binds a resolved document to every collaborator and starts the
    /// asynchronous parts of the load.
    pub fn load(&self, document: Arc<dyn Document>) {
        let token = self.clock.current();
        let fingerprint = document.fingerprint().to_owned();
        let store = self.parts.history.open(&fingerprint);
        let url = {
            let mut state = self.state.lock();
            state.document = Some(Arc::clone(&document));
            state.fingerprint = Some(fingerprint.clone());
            state.store = Some(Arc::clone(&store));
            state.url.clone()
        };
        let pages_count = document.num_pages();
        info!(%fingerprint, pages_count, "document loaded");

        self.parts.toolbar.set_pages_count(pages_count, false);
        self.parts.link_service.set_document(Some(Arc::clone(&document)));
        self.parts
            .properties
            .set_document(Some(Arc::clone(&document)), Some(&url));
        self.parts
            .find_controller
            .set_document(Some(Arc::clone(&document)));
        self.parts.viewer.set_document(Some(Arc::clone(&document)));
        self.parts
            .thumbnails
            .set_document(Some(Arc::clone(&document)));

        self.watch_download(&token, &document);

        if let Some(controller) = self.weak_self.upgrade() {
            let lookups = spawn_view_lookups(Arc::clone(&document), store);
            let token = token.clone();
            tokio::spawn(async move {
                controller.initialize_view(token, lookups).await;
            });
        }

        let viewer = Arc::clone(&self.parts.viewer);
        let rendered = async move { viewer.one_page_rendered().await };
        let (fan_out_token, fetched) = (token.clone(), Arc::clone(&document));
        self.spawn_guarded(&token, rendered, move |controller, result| match result {
            Ok(timestamp) => {
                controller
                    .parts
                    .services
                    .report_telemetry(TelemetryEvent::PageInfo { timestamp });
                controller.fan_out(&fan_out_token, &fetched);
            }
            Err(err) => warn!(?err, "no page rendered, skipping document data"),
        });

        self.schedule_idle_telemetry(&document);
    }

    fn watch_download(&self, token: &SessionToken, document: &Arc<dyn Document>) {
        let Some(controller) = self.weak_self.upgrade() else {
            return;
        };
        let token = token.clone();
        let document = Arc::clone(document);
        tokio::spawn(async move {
            let info = match guarded(&token, document.download_info()).await {
                Some(Ok(info)) => info,
                Some(Err(err)) => {
                    warn!(?err, "failed to fetch download info");
                    return;
                }
                None => return,
            };
            {
                let mut state = controller.state.lock();
                state.content_length = Some(info.length);
                state.download_complete = true;
            }
            controller.parts.progress.hide();

            if let Some(Ok(())) = guarded(&token, controller.parts.viewer.first_page_ready()).await
            {
                controller.parts.bus.dispatch(ViewerEvent::DocumentLoaded);
            }
        });
    }

    async fn initialize_view(
        self: Arc<Self>,
        token: SessionToken,
        lookups: JoinHandle<ViewLookups>,
    ) {
        match guarded(&token, self.parts.viewer.first_page_ready()).await {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                warn!(?err, "first page failed, initial view not set");
                lookups.abort();
                return;
            }
            None => {
                lookups.abort();
                return;
            }
        }

        if let Err(err) = self.reconcile(&token, lookups).await {
            warn!(?err, "failed to restore the initial view");
            if token.is_current() {
                self.set_initial_view(None, InitialViewOptions::default());
            }
        }
        if token.is_current() {
            self.parts.viewer.update();
        }
    }

    async fn reconcile(
        &self,
        token: &SessionToken,
        lookups: JoinHandle<ViewLookups>,
    ) -> anyhow::Result<()> {
        let (stored, page_layout, page_mode, open_action) = lookups
            .await
            .map_err(|err| anyhow::anyhow!("view lookups did not finish: {err}"))?;
        if !token.is_current() {
            return Ok(());
        }

        let stored = stored.unwrap_or_else(|err| {
            warn!(?err, "unable to read stored view state");
            ViewStateRecord::default()
        });
        let page_layout = page_layout.unwrap_or_else(|err| {
            debug!(?err, "page layout unavailable");
            None
        });
        let page_mode = page_mode.unwrap_or_else(|err| {
            debug!(?err, "page mode unavailable");
            None
        });
        let open_action = open_action.unwrap_or_else(|err| {
            debug!(?err, "open action unavailable");
            None
        });

        let bookmark = self.state.lock().initial_bookmark.take();
        let plan = InitialViewPlan::resolve(InitialViewInputs {
            bookmark,
            stored,
            view_on_load: ViewOnLoad::from(self.options.get_i64("view_on_load")),
            default_zoom_value: self.options.get_str("default_zoom_value").to_owned(),
            sidebar_view_on_load: option_enum(&self.options, "sidebar_view_on_load"),
            scroll_mode_on_load: option_enum(&self.options, "scroll_mode_on_load"),
            spread_mode_on_load: option_enum(&self.options, "spread_mode_on_load"),
            page_mode,
            page_layout,
            open_action: open_action.and_then(|action| action.dest),
        });
        debug!(?plan, "initial view resolved");

        self.state.lock().initial_bookmark = plan.bookmark.clone();
        self.set_initial_view(plan.hash.as_deref(), plan.options);
        self.parts.bus.dispatch(ViewerEvent::DocumentInit);

        self.correct_initial_view(token, &plan).await
    }

    /// Re-applies the initial position once every page is known, for
    /// documents whose pages differ in size.
    async fn correct_initial_view(
        &self,
        token: &SessionToken,
        plan: &InitialViewPlan,
    ) -> anyhow::Result<()> {
        if plan.target().is_none() {
            return Ok(());
        }
        let timeout = Duration::from_millis(
            u64::try_from(self.options.get_i64("force_pages_loaded_timeout_ms")).unwrap_or(0),
        );
        match tokio::time::timeout(timeout, self.parts.viewer.pages_ready()).await {
            Ok(ready) => ready?,
            Err(_) => {
                debug!(?timeout, "pages not ready in time, keeping the initial view");
                return Ok(());
            }
        }
        if !token.is_current() || self.parts.viewer.has_equal_page_sizes() {
            return Ok(());
        }

        self.state.lock().initial_bookmark = plan.bookmark.clone();
        if let Some(scale) = self.parts.viewer.current_scale_value() {
            self.parts.viewer.set_current_scale_value(&scale);
        }
        self.set_initial_view(plan.hash.as_deref(), InitialViewOptions::default());
        Ok(())
    }

    /// Applies an initial position and view modes.
    ///
    /// A pending bookmark takes precedence over `stored_hash` and consumes
    /// itself; rotation is applied only together with `stored_hash`.
    pub fn set_initial_view(&self, stored_hash: Option<&str>, options: InitialViewOptions) {
        let (first_pass, bookmark) = {
            let mut state = self.state.lock();
            let first_pass = !state.is_initial_view_set;
            state.is_initial_view_set = true;
            (first_pass, state.initial_bookmark.take())
        };

        if options.sidebar_view.is_known() {
            self.parts.sidebar.set_initial_view(options.sidebar_view);
        } else if first_pass {
            self.parts.sidebar.set_initial_view(SidebarView::None);
        }
        if options.scroll_mode.is_known() {
            self.parts.viewer.set_scroll_mode(options.scroll_mode);
        }
        if options.spread_mode.is_known() {
            self.parts.viewer.set_spread_mode(options.spread_mode);
        }

        if let Some(bookmark) = bookmark {
            self.parts.link_service.set_hash(&bookmark);
        } else if let Some(hash) = stored_hash {
            if let Some(rotation) = options.rotation.and_then(Rotation::new) {
                self.parts.viewer.set_pages_rotation(rotation);
            }
            self.parts.link_service.set_hash(hash);
        }

        self.parts.toolbar.set_page_number(
            self.parts.viewer.current_page_number(),
            self.parts.viewer.current_page_label().as_deref(),
        );
        if self
            .parts
            .viewer
            .current_scale_value()
            .map_or(true, |value| value.is_empty())
        {
            self.parts.viewer.set_current_scale_value(DEFAULT_SCALE_VALUE);
        }
    }

    fn fan_out(&self, token: &SessionToken, document: &Arc<dyn Document>) {
        let doc = Arc::clone(document);
        self.spawn_fetch(token, "outline", async move { doc.outline().await }, |c, outline| {
            c.parts.outline.render(&outline)
        });
        let doc = Arc::clone(document);
        self.spawn_fetch(
            token,
            "attachments",
            async move { doc.attachments().await },
            |c, attachments| c.parts.attachments.render(&attachments),
        );
        let doc = Arc::clone(document);
        self.spawn_fetch(
            token,
            "optional content",
            async move { doc.optional_content_config().await },
            |c, config| c.parts.layers.render(&config),
        );

        if !self.options.get_bool("disable_page_labels") {
            let doc = Arc::clone(document);
            self.spawn_fetch(
                token,
                "page labels",
                async move { doc.page_labels().await },
                |c, labels| c.apply_page_labels(labels),
            );
        }

        let doc = Arc::clone(document);
        self.spawn_guarded(token, async move { doc.metadata().await }, |c, result| {
            match result {
                Ok(metadata) => c.apply_metadata(metadata),
                Err(err) => warn!(?err, "failed to fetch document metadata"),
            }
        });

        if self.options.get_bool("enable_permissions") {
            let doc = Arc::clone(document);
            self.spawn_fetch(
                token,
                "permissions",
                async move { doc.permissions().await },
                |c, permissions| c.apply_permissions(permissions),
            );
        }

        if self.options.get_bool("enable_scripting") {
            let doc = Arc::clone(document);
            self.spawn_fetch(
                token,
                "field objects",
                async move { doc.field_objects().await },
                |c, fields| {
                    if !fields.is_empty() {
                        c.parts.scripting.set_field_objects(Some(fields));
                    }
                },
            );
        }
    }

    fn apply_page_labels(&self, labels: Vec<String>) {
        let pages_count = self.pages_count();
        if !page_labels_are_meaningful(&labels, pages_count) {
            debug!(pages_count, "ignoring page labels that add nothing");
            return;
        }
        self.state.lock().page_labels = Some(labels.clone());
        self.parts.viewer.set_page_labels(Some(labels.clone()));
        self.parts.thumbnails.set_page_labels(Some(labels));
        self.parts.toolbar.set_pages_count(pages_count, true);
        self.parts.toolbar.set_page_number(
            self.parts.viewer.current_page_number(),
            self.parts.viewer.current_page_label().as_deref(),
        );
    }

    fn apply_metadata(&self, metadata: DocumentMetadata) {
        let DocumentMetadata {
            info,
            metadata,
            content_disposition_filename,
            content_length,
        } = metadata;
        info!(
            version = info.pdf_format_version.as_deref().unwrap_or("-"),
            producer = info.producer.as_deref().unwrap_or("-"),
            creator = info.creator.as_deref().unwrap_or("-"),
            "document metadata"
        );

        let current_title = {
            let mut state = self.state.lock();
            state.document_info = Some(info.clone());
            state.metadata = metadata.clone();
            state.content_disposition_filename = content_disposition_filename.clone();
            if state.content_length.is_none() {
                state.content_length = content_length;
            }
            state.title.clone()
        };

        let metadata_title = metadata.as_ref().and_then(|m| m.get("dc:title"));
        if let Some(title) = resolve_title(
            info.title.as_deref(),
            metadata_title,
            content_disposition_filename.as_deref(),
            &current_title,
        ) {
            self.set_title(&title);
        }

        let has_forms = info.is_acro_form_present || info.is_xfa_present;
        if info.is_xfa_present && !info.is_acro_form_present {
            warn!("XFA forms are not supported");
            self.fallback(UnsupportedFeature::Forms);
        } else if has_forms && !self.options.get_bool("render_interactive_forms") {
            warn!("interactive form rendering is disabled");
            self.fallback(UnsupportedFeature::Forms);
        }
        if info.is_signatures_present {
            warn!("digital signature validation is not supported");
            self.fallback(UnsupportedFeature::Signatures);
        }

        self.parts
            .services
            .report_telemetry(TelemetryEvent::DocumentInfo {
                version: version_id(info.pdf_format_version.as_deref()),
                generator: generator_id(info.producer.as_deref()),
                form_type: form_type(&info),
            });
    }

    fn apply_permissions(&self, permissions: Vec<Permission>) {
        if !permissions.contains(&Permission::Copy) {
            self.parts.viewer.set_text_copy_enabled(false);
        }
        self.state.lock().permissions = Some(permissions);
    }

    fn schedule_idle_telemetry(&self, document: &Arc<dyn Document>) {
        let weak = self.weak_self.clone();
        let token = self.clock.current();
        let document = Arc::clone(document);
        self.idle.register(self.parts.idle.as_ref(), move || {
            let Some(controller) = weak.upgrade() else {
                return;
            };
            let mark_info = async move { document.mark_info().await };
            controller.spawn_guarded(&token, mark_info, |controller, result| {
                let tagged = match result {
                    Ok(info) => info.is_some_and(|info| info.marked),
                    Err(err) => {
                        debug!(?err, "mark info unavailable");
                        return;
                    }
                };
                controller
                    .parts
                    .services
                    .report_telemetry(TelemetryEvent::Tagged { tagged });
            });
        });
    }

    /// Runs `future` in the background and hands its output to `handler`
    /// only if `token` is still current when it completes.
    fn spawn_guarded<F, H>(&self, token: &SessionToken, future: F, handler: H)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        H: FnOnce(&SessionController, F::Output) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let Some(output) = guarded(&token, future).await else {
                trace!("discarding result of a superseded session");
                return;
            };
            if let Some(controller) = weak.upgrade() {
                handler(&controller, output);
            }
        });
    }

    /// [`spawn_guarded`](Self::spawn_guarded) for optional document data:
    /// absence is skipped and failures are logged.
    fn spawn_fetch<T, F, H>(&self, token: &SessionToken, what: &'static str, future: F, apply: H)
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
        H: FnOnce(&SessionController, T) + Send + 'static,
    {
        self.spawn_guarded(token, future, move |controller, result| match result {
            Ok(Some(value)) => apply(controller, value),
            Ok(None) => trace!(what, "document has no data"),
            Err(err) => warn!(?err, what, "failed to fetch document data"),
        });
    }

    /// Applies a load progress level in `0.0..=1.0`, or NaN when unknown.
    pub fn progress(&self, level: f64) {
        let update = {
            let mut state = self.state.lock();
            if state.download_complete {
                return;
            }
            state.progress.update(level)
        };
        if let Some(progress) = update {
            self.parts.progress.set_progress(progress);
        }
    }

    /// Reports an unsupported feature; the user-visible fallback is shown at
    /// most once per document.
    pub fn fallback(&self, feature: UnsupportedFeature) {
        self.parts
            .services
            .report_telemetry(TelemetryEvent::UnsupportedFeature { feature });
        let url = {
            let mut state = self.state.lock();
            if state.fellback {
                return;
            }
            state.fellback = true;
            state.base_url.clone()
        };
        self.parts.services.fallback(feature, &url);
    }

    /// Releases off-screen resources. Installed as the rendering queue's
    /// idle hook.
    pub fn cleanup(&self) {
        let Some(document) = self.state.lock().document.clone() else {
            return;
        };
        self.parts.viewer.cleanup();
        self.parts.thumbnails.cleanup();
        if self.parts.viewer.renderer() != RendererType::Svg {
            document.cleanup();
        }
    }

    pub fn force_rendering(&self) {
        self.parts
            .rendering_queue
            .set_thumbnail_view_enabled(self.parts.sidebar.is_thumbnail_view_visible());
        self.parts.rendering_queue.render_highest_priority();
    }

    pub fn page(&self) -> usize {
        self.parts.viewer.current_page_number()
    }

    pub fn set_page(&self, page_number: usize) {
        self.parts.viewer.set_current_page_number(page_number);
    }

    pub fn pages_count(&self) -> usize {
        self.state
            .lock()
            .document
            .as_ref()
            .map_or(0, |document| document.num_pages())
    }

    pub fn document(&self) -> Option<Arc<dyn Document>> {
        self.state.lock().document.clone()
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.state.lock().fingerprint.clone()
    }

    pub fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn is_initial_view_set(&self) -> bool {
        self.state.lock().is_initial_view_set
    }

    pub fn is_download_complete(&self) -> bool {
        self.state.lock().download_complete
    }

    pub fn pending_idle_callbacks(&self) -> usize {
        self.idle.len()
    }

    fn persist(&self, update: ViewStateUpdate) {
        let store = {
            let state = self.state.lock();
            if !state.is_initial_view_set {
                return;
            }
            state.store.clone()
        };
        let Some(store) = store else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = store.set(update).await {
                warn!(?err, %update, "failed to persist view state");
            }
        });
    }

    fn bind_events(&self) {
        let bus = self.parts.bus.clone();
        let on = |kind: EventKind, handler: fn(&SessionController, &ViewerEvent)| {
            let weak = self.weak_self.clone();
            bus.on(
                kind,
                Arc::new(move |event: &ViewerEvent| {
                    if let Some(controller) = weak.upgrade() {
                        handler(&controller, event);
                    }
                }),
            );
        };

        on(EventKind::PageRendered, Self::on_page_rendered);
        on(EventKind::UpdateViewArea, Self::on_update_view_area);
        on(EventKind::PageChanging, Self::on_page_changing);
        on(EventKind::ScaleChanging, Self::on_scale_changing);
        on(EventKind::SidebarViewChanged, Self::on_sidebar_view_changed);
        on(EventKind::PageMode, Self::on_page_mode);
        on(EventKind::FirstPage, Self::on_navigation);
        on(EventKind::LastPage, Self::on_navigation);
        on(EventKind::NextPage, Self::on_navigation);
        on(EventKind::PreviousPage, Self::on_navigation);
        on(EventKind::PageNumberChanged, Self::on_page_number_changed);
        on(EventKind::SwitchScrollMode, Self::on_view_mode);
        on(EventKind::SwitchSpreadMode, Self::on_view_mode);
        on(EventKind::ScrollModeChanged, Self::on_view_mode);
        on(EventKind::SpreadModeChanged, Self::on_view_mode);
        on(EventKind::DocumentProperties, Self::on_document_properties);
        on(EventKind::Find, Self::on_find);
        on(EventKind::FindFromUrlHash, Self::on_find);
        on(EventKind::UpdateFindMatchesCount, Self::on_find_results);
        on(EventKind::UpdateFindControlState, Self::on_find_results);
    }

    fn on_page_rendered(&self, event: &ViewerEvent) {
        let ViewerEvent::PageRendered {
            page_number, error, ..
        } = event
        else {
            return;
        };
        if *page_number == self.parts.viewer.current_page_number() {
            self.parts.toolbar.update_loading_indicator_state(false);
        }
        if let Some(error) = error {
            warn!(page_number, %error, "page failed to render");
        }
        if self.parts.sidebar.is_thumbnail_view_visible() {
            self.parts.thumbnails.set_image_from_page(*page_number);
        }
    }

    fn on_update_view_area(&self, event: &ViewerEvent) {
        let ViewerEvent::UpdateViewArea { location } = event else {
            return;
        };
        let store = {
            let state = self.state.lock();
            state.store.clone().filter(|_| state.is_initial_view_set)
        };
        if let Some(store) = store {
            let record = ViewStateRecord::from_location(location);
            tokio::spawn(async move {
                if let Err(err) = store.set_multiple(record).await {
                    warn!(?err, "failed to persist view position");
                }
            });
        }

        let current = self.parts.viewer.current_page_number();
        let loading = current
            .checked_sub(1)
            .and_then(|index| self.parts.viewer.page_rendering_state(index))
            != Some(RenderingState::Finished);
        self.parts.toolbar.update_loading_indicator_state(loading);
    }

    fn on_page_changing(&self, event: &ViewerEvent) {
        let ViewerEvent::PageChanging {
            page_number,
            page_label,
        } = event
        else {
            return;
        };
        self.parts
            .toolbar
            .set_page_number(*page_number, page_label.as_deref());
        if self.parts.sidebar.is_thumbnail_view_visible() {
            self.parts.thumbnails.scroll_thumbnail_into_view(*page_number);
        }
    }

    fn on_scale_changing(&self, event: &ViewerEvent) {
        let ViewerEvent::ScaleChanging {
            preset_value,
            scale,
        } = event
        else {
            return;
        };
        self.parts
            .toolbar
            .set_page_scale(preset_value.as_deref(), *scale);
        self.parts.viewer.update();
    }

    fn on_sidebar_view_changed(&self, event: &ViewerEvent) {
        let ViewerEvent::SidebarViewChanged { view } = event else {
            return;
        };
        self.parts
            .rendering_queue
            .set_thumbnail_view_enabled(*view == SidebarView::Thumbs);
        self.persist(ViewStateUpdate::SidebarView(*view));
    }

    fn on_page_mode(&self, event: &ViewerEvent) {
        let ViewerEvent::PageMode { mode } = event else {
            return;
        };
        let view = match mode.as_str() {
            "thumbs" => SidebarView::Thumbs,
            "bookmarks" | "outline" => SidebarView::Outline,
            "attachments" => SidebarView::Attachments,
            "layers" => SidebarView::Layers,
            "none" => SidebarView::None,
            other => {
                warn!(mode = other, "invalid page mode");
                return;
            }
        };
        self.parts.sidebar.switch_view(view, true);
    }

    fn on_navigation(&self, event: &ViewerEvent) {
        match event {
            ViewerEvent::FirstPage if self.document().is_some() => self.set_page(1),
            ViewerEvent::LastPage if self.document().is_some() => {
                self.set_page(self.pages_count())
            }
            ViewerEvent::NextPage => {
                self.parts.viewer.next_page();
            }
            ViewerEvent::PreviousPage => {
                self.parts.viewer.previous_page();
            }
            _ => {}
        }
    }

    fn on_page_number_changed(&self, event: &ViewerEvent) {
        let ViewerEvent::PageNumberChanged { value } = event else {
            return;
        };
        if !value.is_empty() {
            let labelled = self
                .state
                .lock()
                .page_labels
                .as_ref()
                .and_then(|labels| labels.iter().position(|label| label == value));
            let target = labelled
                .map(|index| index + 1)
                .or_else(|| value.trim().parse::<usize>().ok());
            match target {
                Some(page_number) => {
                    self.parts.viewer.set_current_page_number(page_number);
                }
                None => debug!(%value, "no page matches the entered value"),
            }
        }

        let current = self.parts.viewer.current_page_number();
        let label = self.parts.viewer.current_page_label();
        if *value != current.to_string() && Some(value) != label.as_ref() {
            self.parts.toolbar.set_page_number(current, label.as_deref());
        }
    }

    fn on_view_mode(&self, event: &ViewerEvent) {
        match event {
            ViewerEvent::SwitchScrollMode { mode } => self.parts.viewer.set_scroll_mode(*mode),
            ViewerEvent::SwitchSpreadMode { mode } => self.parts.viewer.set_spread_mode(*mode),
            ViewerEvent::ScrollModeChanged { mode } => {
                self.persist(ViewStateUpdate::ScrollMode(*mode))
            }
            ViewerEvent::SpreadModeChanged { mode } => {
                self.persist(ViewStateUpdate::SpreadMode(*mode))
            }
            _ => {}
        }
    }

    fn on_document_properties(&self, _event: &ViewerEvent) {
        self.parts.properties.open();
    }

    fn on_find(&self, event: &ViewerEvent) {
        match event {
            ViewerEvent::Find { kind, query } => {
                self.parts.find_controller.execute_command(kind.command(), query)
            }
            ViewerEvent::FindFromUrlHash { query } => self.parts.find_controller.execute_command(
                FindKind::Find.command(),
                &FindQuery {
                    query: query.clone(),
                    phrase_search: true,
                    case_sensitive: false,
                    entire_word: false,
                    highlight_all: true,
                    find_previous: false,
                },
            ),
            _ => {}
        }
    }

    fn on_find_results(&self, event: &ViewerEvent) {
        match event {
            ViewerEvent::UpdateFindMatchesCount { matches } => {
                self.parts.find_bar.update_results_count(*matches)
            }
            ViewerEvent::UpdateFindControlState {
                state,
                previous,
                matches,
                ..
            } => self.parts.find_bar.update_ui_state(*state, *previous, *matches),
            _ => {}
        }
    }
}

/// Stored view state and the document's own view preferences.
type ViewLookups = (
    anyhow::Result<ViewStateRecord>,
    anyhow::Result<Option<PageLayout>>,
    anyhow::Result<Option<PageMode>>,
    anyhow::Result<Option<OpenAction>>,
);

fn spawn_view_lookups(
    document: Arc<dyn Document>,
    store: Arc<dyn ViewStateStore>,
) -> JoinHandle<ViewLookups> {
    tokio::spawn(async move {
        let defaults = ViewStateRecord::restore_defaults();
        tokio::join!(
            store.get_multiple(&defaults),
            document.page_layout(),
            document.page_mode(),
            document.open_action(),
        )
    })
}

fn option_enum<T: From<i32>>(options: &AppOptions, name: &str) -> T {
    T::from(i32::try_from(options.get_i64(name)).unwrap_or(-1))
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.clock.invalidate();
        self.idle.cancel_all();
    }
}
