//! Contract with the document engine that parses and renders documents.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::LoadError;
use crate::types::{PageLayout, PageMode};

/// Where the document bytes come from.
#[derive(Clone)]
pub enum DocumentSource {
    Url(String),
    Data(Arc<[u8]>),
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            DocumentSource::Data(data) => write!(f, "Data({} bytes)", data.len()),
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Url(url) => f.write_str(url),
            DocumentSource::Data(data) => write!(f, "<{} bytes>", data.len()),
        }
    }
}

/// Fully merged parameters handed to [`DocumentEngine::open_document`].
#[derive(Debug, Clone)]
pub struct DocumentParams {
    pub source: DocumentSource,
    pub options: Map<String, Value>,
}

impl DocumentParams {
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn length(&self) -> Option<u64> {
        self.options.get("length").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordReason {
    NeedPassword,
    IncorrectPassword,
}

/// Suspends a load until a credential (or a cancellation) is supplied.
#[derive(Debug)]
pub struct PasswordRequest {
    reason: PasswordReason,
    responder: oneshot::Sender<Option<String>>,
}

impl PasswordRequest {
    pub fn new(reason: PasswordReason) -> (Self, oneshot::Receiver<Option<String>>) {
        let (responder, receiver) = oneshot::channel();
        (Self { reason, responder }, receiver)
    }

    pub fn reason(&self) -> PasswordReason {
        self.reason
    }

    /// `None` cancels the password entry.
    pub fn respond(self, password: Option<String>) {
        let _ = self.responder.send(password);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressData {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl ProgressData {
    /// Fraction loaded in `0.0..=1.0`; NaN when the total is unknown.
    pub fn level(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => self.loaded as f64 / total as f64,
            _ => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsupportedFeature {
    Unknown,
    Forms,
    Signatures,
    JavaScript,
    Smask,
    Shading,
    Font,
}

impl UnsupportedFeature {
    pub fn as_label(self) -> &'static str {
        match self {
            UnsupportedFeature::Unknown => "unknown",
            UnsupportedFeature::Forms => "forms",
            UnsupportedFeature::Signatures => "signatures",
            UnsupportedFeature::JavaScript => "javaScript",
            UnsupportedFeature::Smask => "smask",
            UnsupportedFeature::Shading => "shadingPattern",
            UnsupportedFeature::Font => "font",
        }
    }
}

pub type PasswordCallback = Arc<dyn Fn(PasswordRequest) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(ProgressData) + Send + Sync>;
pub type UnsupportedFeatureCallback = Arc<dyn Fn(UnsupportedFeature) + Send + Sync>;

/// In-memory destination inside a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Page(usize),
    Named(String),
}

impl Destination {
    /// Encodes the destination as a link-service hash.
    pub fn to_hash(&self) -> String {
        match self {
            Destination::Page(page) => format!("page={page}"),
            Destination::Named(name) => format!("nameddest={name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineNode {
    pub title: String,
    pub dest: Option<Destination>,
    pub url: Option<String>,
    pub items: Vec<OutlineNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionalContentGroup {
    pub id: String,
    pub name: Option<String>,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionalContentConfig {
    pub name: Option<String>,
    pub groups: Vec<OptionalContentGroup>,
}

/// The document information dictionary plus the flags the viewer cares about.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentInfo {
    pub pdf_format_version: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub is_acro_form_present: bool,
    pub is_xfa_present: bool,
    pub is_signatures_present: bool,
}

/// Parsed XMP metadata, keyed by qualified property name (`dc:title`, ...).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmpMetadata {
    entries: BTreeMap<String, String>,
}

impl XmpMetadata {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentMetadata {
    pub info: DocumentInfo,
    pub metadata: Option<XmpMetadata>,
    pub content_disposition_filename: Option<String>,
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Print,
    ModifyContents,
    Copy,
    ModifyAnnotations,
    FillInteractiveForms,
    CopyForAccessibility,
    Assemble,
    PrintHighQuality,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenAction {
    pub dest: Option<Destination>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkInfo {
    pub marked: bool,
    pub user_properties: bool,
    pub suspects: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldObject {
    pub id: String,
    pub kind: String,
    pub value: Value,
}

pub type FieldObjects = BTreeMap<String, Vec<FieldObject>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadInfo {
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    pub page_number: usize,
    pub width: f32,
    pub height: f32,
    pub rotate: u16,
}

/// A resolved document. Accessors may be slow; every one is independently
/// fallible and returns `Ok(None)` when the document lacks the feature.
#[async_trait]
pub trait Document: Send + Sync {
    fn num_pages(&self) -> usize;
    fn fingerprint(&self) -> &str;
    async fn page(&self, page_number: usize) -> Result<PageInfo>;
    /// Plain text of a page; `Ok(None)` when the engine has no text layer.
    async fn page_text(&self, _page_number: usize) -> Result<Option<String>> {
        Ok(None)
    }
    async fn outline(&self) -> Result<Option<Vec<OutlineNode>>>;
    async fn attachments(&self) -> Result<Option<BTreeMap<String, Attachment>>>;
    async fn optional_content_config(&self) -> Result<Option<OptionalContentConfig>>;
    async fn metadata(&self) -> Result<DocumentMetadata>;
    async fn permissions(&self) -> Result<Option<Vec<Permission>>>;
    async fn page_labels(&self) -> Result<Option<Vec<String>>>;
    async fn page_layout(&self) -> Result<Option<PageLayout>>;
    async fn page_mode(&self) -> Result<Option<PageMode>>;
    async fn open_action(&self) -> Result<Option<OpenAction>>;
    async fn mark_info(&self) -> Result<Option<MarkInfo>>;
    async fn field_objects(&self) -> Result<Option<FieldObjects>>;
    async fn download_info(&self) -> Result<DownloadInfo>;
    /// Releases caches (fonts, decoded resources) held for this document.
    fn cleanup(&self);
}

/// An in-flight document load.
///
/// Callbacks are registered before [`completion`](LoadingTask::completion) is
/// awaited; `completion` is awaited at most once.
#[async_trait]
pub trait LoadingTask: Send + Sync {
    fn on_password(&self, callback: PasswordCallback);
    fn on_progress(&self, callback: ProgressCallback);
    fn on_unsupported_feature(&self, callback: UnsupportedFeatureCallback);
    async fn completion(&self) -> Result<Arc<dyn Document>, LoadError>;
    /// Releases every engine resource tied to this load.
    async fn destroy(&self);
}

pub trait DocumentEngine: Send + Sync {
    fn open_document(&self, params: DocumentParams) -> Result<Arc<dyn LoadingTask>, LoadError>;
}

/// Caller-supplied parameters for a single `open`.
#[derive(Debug, Clone, Default)]
pub struct OpenArgs {
    pub length: Option<u64>,
    /// Position to show first, in link-service hash syntax.
    pub bookmark: Option<String>,
    /// Engine options that override both defaults and source-derived keys.
    pub overrides: Map<String, Value>,
}

/// Merges engine defaults < source-derived keys < explicit overrides.
pub fn merge_open_parameters(
    defaults: Map<String, Value>,
    source: DocumentSource,
    args: &OpenArgs,
) -> DocumentParams {
    let mut options = defaults;
    if let DocumentSource::Url(url) = &source {
        options.insert("url".to_owned(), Value::String(url.clone()));
    }
    if let Some(length) = args.length {
        options.insert("length".to_owned(), Value::from(length));
    }
    for (key, value) in &args.overrides {
        options.insert(key.clone(), value.clone());
    }

    let source = match (source, options.get("url").and_then(Value::as_str)) {
        (DocumentSource::Url(_), Some(url)) => DocumentSource::Url(url.to_owned()),
        (source, _) => source,
    };
    DocumentParams { source, options }
}
