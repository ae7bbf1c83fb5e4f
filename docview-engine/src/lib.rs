use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use docview_core::engine::{
    Attachment, Destination, Document, DocumentEngine, DocumentInfo, DocumentMetadata,
    DocumentParams, DocumentSource, DownloadInfo, FieldObjects, LoadingTask, MarkInfo,
    OpenAction, OptionalContentConfig, OutlineNode, PageInfo, PasswordCallback, PasswordReason,
    PasswordRequest, Permission, ProgressCallback, ProgressData, UnsupportedFeatureCallback,
};
use docview_core::error::LoadError;
use docview_core::types::{PageLayout, PageMode};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x7b2c58f1_99c6_5a5c_a6ea_50f9e7f1cc20);

/// Runtime override for the pdfium shared library location.
pub const PDFIUM_LIBRARY_ENV: &str = "DOCVIEW_PDFIUM_LIBRARY";

pub struct PdfiumEngine {
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngine {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

impl DocumentEngine for PdfiumEngine {
    fn open_document(&self, params: DocumentParams) -> Result<Arc<dyn LoadingTask>, LoadError> {
        let source = LocalSource::resolve(&params.source)?;
        let password = params
            .option("password")
            .and_then(|value| value.as_str())
            .map(str::to_owned);
        debug!(?source, "opening document");
        Ok(Arc::new(PdfiumLoadingTask::new(
            Arc::clone(&self.pdfium),
            source,
            password,
        )))
    }
}

/// Where a document's bytes can be read from without a network client.
#[derive(Debug, Clone, PartialEq)]
enum LocalSource {
    Path(PathBuf),
    Data(Arc<[u8]>),
}

impl LocalSource {
    fn resolve(source: &DocumentSource) -> Result<Self, LoadError> {
        let url = match source {
            DocumentSource::Data(data) => return Ok(LocalSource::Data(Arc::clone(data))),
            DocumentSource::Url(url) => url,
        };
        let Ok(parsed) = Url::parse(url) else {
            return Ok(LocalSource::Path(PathBuf::from(url)));
        };
        match parsed.scheme() {
            "file" => parsed
                .to_file_path()
                .map(LocalSource::Path)
                .map_err(|_| LoadError::MissingPdf(url.clone())),
            "http" | "https" => Err(LoadError::UnexpectedResponse {
                status: 0,
                url: url.clone(),
            }),
            // A one-letter scheme is a Windows drive prefix.
            scheme if scheme.len() == 1 => Ok(LocalSource::Path(PathBuf::from(url))),
            _ => Err(LoadError::Other(anyhow!("unsupported document url {url}"))),
        }
    }

    async fn read(&self) -> Result<Arc<[u8]>, LoadError> {
        match self {
            LocalSource::Data(data) => Ok(Arc::clone(data)),
            LocalSource::Path(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Ok(bytes.into()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(LoadError::MissingPdf(path.display().to_string()))
                }
                Err(err) => Err(LoadError::Other(
                    anyhow::Error::new(err).context(format!("failed to read {:?}", path)),
                )),
            },
        }
    }
}

pub fn fingerprint_for_bytes(bytes: &[u8]) -> String {
    Uuid::new_v5(&FINGERPRINT_NAMESPACE, bytes).to_string()
}

#[derive(Default)]
struct Callbacks {
    password: Option<PasswordCallback>,
    progress: Option<ProgressCallback>,
    unsupported: Option<UnsupportedFeatureCallback>,
}

pub struct PdfiumLoadingTask {
    pdfium: Arc<Pdfium>,
    source: LocalSource,
    password: Option<String>,
    callbacks: Mutex<Callbacks>,
    destroyed: watch::Sender<bool>,
    document: Mutex<Option<Arc<PdfiumDocument>>>,
}

impl PdfiumLoadingTask {
    fn new(pdfium: Arc<Pdfium>, source: LocalSource, password: Option<String>) -> Self {
        Self {
            pdfium,
            source,
            password,
            callbacks: Mutex::new(Callbacks::default()),
            destroyed: watch::channel(false).0,
            document: Mutex::new(None),
        }
    }

    /// Asks the registered password callback for a credential. `None` means
    /// the user gave up or the task was destroyed while waiting.
    async fn ask_password(&self, reason: PasswordReason) -> Option<String> {
        let callback = self.callbacks.lock().password.clone()?;
        let (request, response) = PasswordRequest::new(reason);
        callback(request);

        let mut destroyed = self.destroyed.subscribe();
        tokio::select! {
            password = response => password.ok().flatten(),
            _ = destroyed.wait_for(|destroyed| *destroyed) => None,
        }
    }

    fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }
}

#[async_trait]
impl LoadingTask for PdfiumLoadingTask {
    fn on_password(&self, callback: PasswordCallback) {
        self.callbacks.lock().password = Some(callback);
    }

    fn on_progress(&self, callback: ProgressCallback) {
        self.callbacks.lock().progress = Some(callback);
    }

    fn on_unsupported_feature(&self, callback: UnsupportedFeatureCallback) {
        self.callbacks.lock().unsupported = Some(callback);
    }

    #[instrument(skip(self))]
    async fn completion(&self) -> Result<Arc<dyn Document>, LoadError> {
        let bytes = self.source.read().await?;
        if self.is_destroyed() {
            return Err(LoadError::Destroyed);
        }
        let length = bytes.len() as u64;
        let progress = self.callbacks.lock().progress.clone();
        if let Some(progress) = progress {
            progress(ProgressData {
                loaded: length,
                total: Some(length),
            });
        }

        let mut password = self.password.clone();
        let document = loop {
            match load_document(&self.pdfium, &bytes, password.as_deref()) {
                Ok(document) => break document,
                Err(PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError)) => {
                }
                Err(err) => return Err(map_pdfium_error(err)),
            }

            let reason = if password.is_some() {
                PasswordReason::IncorrectPassword
            } else {
                PasswordReason::NeedPassword
            };
            debug!(?reason, "document is encrypted");
            match self.ask_password(reason).await {
                Some(entered) => password = Some(entered),
                None if self.is_destroyed() => return Err(LoadError::Destroyed),
                None => return Err(LoadError::PasswordCancelled),
            }
        };
        if self.is_destroyed() {
            return Err(LoadError::Destroyed);
        }

        let document = Arc::new(PdfiumDocument::new(
            Arc::clone(&self.pdfium),
            bytes,
            password,
            document,
        ));
        info!(
            fingerprint = document.fingerprint(),
            pages = document.num_pages(),
            "document parsed"
        );
        *self.document.lock() = Some(Arc::clone(&document));
        Ok(document)
    }

    async fn destroy(&self) {
        self.destroyed.send_replace(true);
        if let Some(document) = self.document.lock().take() {
            document.cleanup();
        }
        *self.callbacks.lock() = Callbacks::default();
    }
}

fn load_document(
    pdfium: &Pdfium,
    bytes: &[u8],
    password: Option<&str>,
) -> Result<PdfDocument<'static>, PdfiumError> {
    let document = pdfium.load_pdf_from_byte_vec(bytes.to_vec(), password)?;
    // SAFETY: the document borrows the bindings owned by the `Arc<Pdfium>` that
    // every holder of the returned value also keeps. `PdfiumDocument` declares
    // its cached document before the `Arc<Pdfium>`, so the document is dropped
    // first and the borrow never outlives the bindings.
    Ok(unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) })
}

fn map_pdfium_error(err: PdfiumError) -> LoadError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::FormatError | PdfiumInternalError::FileError,
        ) => LoadError::InvalidPdf(err.to_string()),
        err => LoadError::Other(anyhow!("pdfium failed to load the document: {err}")),
    }
}

fn page_index(page_number: usize) -> Result<PdfPageIndex> {
    page_number
        .checked_sub(1)
        .and_then(|index| index.try_into().ok())
        .ok_or_else(|| anyhow!("page {} is out of supported range", page_number))
}

/// A parsed document. The pdfium handle is reopened on demand after
/// [`Document::cleanup`] drops it.
pub struct PdfiumDocument {
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
    bytes: Arc<[u8]>,
    password: Option<String>,
    fingerprint: String,
    num_pages: usize,
}

impl PdfiumDocument {
    fn new(
        pdfium: Arc<Pdfium>,
        bytes: Arc<[u8]>,
        password: Option<String>,
        document: PdfDocument<'static>,
    ) -> Self {
        let num_pages = usize::try_from(document.pages().len()).unwrap_or_default();
        Self {
            fingerprint: fingerprint_for_bytes(&bytes),
            document: Mutex::new(Some(document)),
            pdfium,
            bytes,
            password,
            num_pages,
        }
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut cached = self.document.lock();
        let document = match cached.take() {
            Some(document) => document,
            None => load_document(&self.pdfium, &self.bytes, self.password.as_deref())
                .context("failed to reopen document")?,
        };
        let result = f(&document);
        *cached = Some(document);
        result
    }
}

#[async_trait]
impl Document for PdfiumDocument {
    fn num_pages(&self) -> usize {
        self.num_pages
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn page(&self, page_number: usize) -> Result<PageInfo> {
        self.with_document(|document| {
            let page = document
                .pages()
                .get(page_index(page_number)?)
                .with_context(|| format!("page {} out of range", page_number))?;
            let rotate = match page.rotation() {
                Ok(PdfPageRenderRotation::Degrees90) => 90,
                Ok(PdfPageRenderRotation::Degrees180) => 180,
                Ok(PdfPageRenderRotation::Degrees270) => 270,
                _ => 0,
            };
            Ok(PageInfo {
                page_number,
                width: page.width().value,
                height: page.height().value,
                rotate,
            })
        })
    }

    async fn page_text(&self, page_number: usize) -> Result<Option<String>> {
        self.with_document(|document| {
            let page = document
                .pages()
                .get(page_index(page_number)?)
                .with_context(|| format!("page {} out of range", page_number))?;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text of page {}", page_number))?
                .all();
            Ok((!text.trim().is_empty()).then_some(text))
        })
    }

    async fn outline(&self) -> Result<Option<Vec<OutlineNode>>> {
        self.with_document(|document| {
            let outline = document
                .bookmarks()
                .root()
                .map(collect_outline)
                .unwrap_or_default();
            Ok((!outline.is_empty()).then_some(outline))
        })
    }

    async fn attachments(&self) -> Result<Option<BTreeMap<String, Attachment>>> {
        self.with_document(|document| {
            let mut attachments = BTreeMap::new();
            for attachment in document.attachments().iter() {
                let filename = attachment.name();
                let content = match attachment.save_to_bytes() {
                    Ok(content) => content,
                    Err(err) => {
                        warn!(?err, %filename, "failed to extract attachment");
                        continue;
                    }
                };
                attachments.insert(filename.clone(), Attachment { filename, content });
            }
            Ok((!attachments.is_empty()).then_some(attachments))
        })
    }

    async fn optional_content_config(&self) -> Result<Option<OptionalContentConfig>> {
        Ok(None)
    }

    async fn metadata(&self) -> Result<DocumentMetadata> {
        let content_length = Some(self.bytes.len() as u64);
        self.with_document(|document| {
            let tags = document.metadata();
            let tag = |kind| {
                tags.get(kind)
                    .map(|tag| tag.value().to_owned())
                    .filter(|value| !value.is_empty())
            };
            let form_type = document.form().map(|form| form.form_type());
            let info = DocumentInfo {
                pdf_format_version: format_version(document.version()),
                title: tag(PdfDocumentMetadataTagType::Title),
                author: tag(PdfDocumentMetadataTagType::Author),
                subject: tag(PdfDocumentMetadataTagType::Subject),
                keywords: tag(PdfDocumentMetadataTagType::Keywords),
                creator: tag(PdfDocumentMetadataTagType::Creator),
                producer: tag(PdfDocumentMetadataTagType::Producer),
                is_acro_form_present: matches!(form_type, Some(PdfFormType::Acrobat)),
                is_xfa_present: matches!(
                    form_type,
                    Some(PdfFormType::XfaFull | PdfFormType::XfaForeground)
                ),
                is_signatures_present: document.signatures().len() > 0,
            };
            Ok(DocumentMetadata {
                info,
                metadata: None,
                content_disposition_filename: None,
                content_length,
            })
        })
    }

    async fn permissions(&self) -> Result<Option<Vec<Permission>>> {
        Ok(None)
    }

    async fn page_labels(&self) -> Result<Option<Vec<String>>> {
        self.with_document(|document| {
            let labels: Vec<Option<String>> = document
                .pages()
                .iter()
                .map(|page| page.label().map(str::to_owned))
                .collect();
            if labels.iter().all(Option::is_none) {
                return Ok(None);
            }
            Ok(Some(
                labels
                    .into_iter()
                    .map(Option::unwrap_or_default)
                    .collect(),
            ))
        })
    }

    async fn page_layout(&self) -> Result<Option<PageLayout>> {
        Ok(None)
    }

    async fn page_mode(&self) -> Result<Option<PageMode>> {
        Ok(None)
    }

    async fn open_action(&self) -> Result<Option<OpenAction>> {
        Ok(None)
    }

    async fn mark_info(&self) -> Result<Option<MarkInfo>> {
        Ok(None)
    }

    async fn field_objects(&self) -> Result<Option<FieldObjects>> {
        Ok(None)
    }

    async fn download_info(&self) -> Result<DownloadInfo> {
        Ok(DownloadInfo {
            length: self.bytes.len() as u64,
        })
    }

    fn cleanup(&self) {
        self.document.lock().take();
    }
}

fn collect_outline(mut bookmark: PdfBookmark<'_>) -> Vec<OutlineNode> {
    let mut nodes = Vec::new();
    loop {
        let dest = bookmark
            .destination()
            .and_then(|destination| destination.page_index().ok())
            .map(|index| Destination::Page(index as usize + 1));
        nodes.push(OutlineNode {
            title: bookmark.title().unwrap_or_default(),
            dest,
            url: None,
            items: bookmark.first_child().map(collect_outline).unwrap_or_default(),
        });

        match bookmark.next_sibling() {
            Some(next) => bookmark = next,
            None => break,
        }
    }
    nodes
}

fn format_version(version: PdfDocumentVersion) -> Option<String> {
    let label = match version {
        PdfDocumentVersion::Pdf1_0 => "1.0",
        PdfDocumentVersion::Pdf1_1 => "1.1",
        PdfDocumentVersion::Pdf1_2 => "1.2",
        PdfDocumentVersion::Pdf1_3 => "1.3",
        PdfDocumentVersion::Pdf1_4 => "1.4",
        PdfDocumentVersion::Pdf1_5 => "1.5",
        PdfDocumentVersion::Pdf1_6 => "1.6",
        PdfDocumentVersion::Pdf1_7 => "1.7",
        PdfDocumentVersion::Pdf2_0 => "2.0",
        PdfDocumentVersion::Other(raw) => return Some(format!("{}.{}", raw / 10, raw % 10)),
        _ => return None,
    };
    Some(label.to_owned())
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var_os(PDFIUM_LIBRARY_ENV)?;
    let path = Path::new(&path);
    match Pdfium::bind_to_library(path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(?err, path = %path.display(), "failed to load Pdfium from {PDFIUM_LIBRARY_ENV}");
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
