//! Narrow contracts for the widgets and services the controller drives.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;

use crate::bus::{FindMatchesCount, FindQuery, FindState};
use crate::engine::{
    Attachment, Document, FieldObjects, OptionalContentConfig, OutlineNode,
    PasswordReason, UnsupportedFeature,
};
use crate::types::{RendererType, RenderingState, Rotation, ScrollMode, SidebarView, SpreadMode};

/// The primary page viewer.
///
/// The readiness futures refer to the document most recently passed to
/// [`set_document`](PageViewer::set_document).
#[async_trait]
pub trait PageViewer: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn Document>>);
    async fn first_page_ready(&self) -> Result<()>;
    /// Resolves with the time the first page finished rendering.
    async fn one_page_rendered(&self) -> Result<Instant>;
    async fn pages_ready(&self) -> Result<()>;
    fn has_equal_page_sizes(&self) -> bool;
    fn current_page_number(&self) -> usize;
    fn set_current_page_number(&self, page_number: usize) -> bool;
    fn current_page_label(&self) -> Option<String>;
    fn current_scale_value(&self) -> Option<String>;
    fn set_current_scale_value(&self, value: &str);
    fn set_pages_rotation(&self, rotation: Rotation);
    fn set_scroll_mode(&self, mode: ScrollMode);
    fn set_spread_mode(&self, mode: SpreadMode);
    fn set_page_labels(&self, labels: Option<Vec<String>>);
    fn set_text_copy_enabled(&self, enabled: bool);
    fn page_rendering_state(&self, page_index: usize) -> Option<RenderingState>;
    fn next_page(&self) -> bool;
    fn previous_page(&self) -> bool;
    fn renderer(&self) -> RendererType;
    /// Re-evaluates visible pages and renders what is missing.
    fn update(&self);
    /// Releases resources held by pages that are not visible.
    fn cleanup(&self);
}

pub trait ThumbnailViewer: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn Document>>);
    fn set_page_labels(&self, labels: Option<Vec<String>>);
    fn scroll_thumbnail_into_view(&self, page_number: usize);
    /// Copies the rendered image of a page view into its thumbnail.
    fn set_image_from_page(&self, page_number: usize);
    fn cleanup(&self);
}

pub type IdleHook = Arc<dyn Fn() + Send + Sync>;

pub trait RenderingQueue: Send + Sync {
    fn set_on_idle(&self, hook: Option<IdleHook>);
    fn set_thumbnail_view_enabled(&self, enabled: bool);
    fn render_highest_priority(&self);
}

pub trait LinkService: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn Document>>);
    /// Navigates to an encoded position (`page=..&zoom=..`, `nameddest=..`).
    fn set_hash(&self, hash: &str);
    fn go_to_page(&self, page_number: usize);
    fn set_external_links_enabled(&self, enabled: bool);
}

pub trait Sidebar: Send + Sync {
    fn set_initial_view(&self, view: SidebarView);
    fn switch_view(&self, view: SidebarView, force_open: bool);
    fn is_thumbnail_view_visible(&self) -> bool;
    fn reset(&self);
}

pub trait Toolbar: Send + Sync {
    fn set_page_number(&self, page_number: usize, page_label: Option<&str>);
    fn set_pages_count(&self, count: usize, has_page_labels: bool);
    fn set_page_scale(&self, preset_value: Option<&str>, scale: f32);
    fn update_loading_indicator_state(&self, loading: bool);
    fn reset(&self);
}

pub trait OutlineView: Send + Sync {
    fn render(&self, outline: &[OutlineNode]);
    fn reset(&self);
}

pub trait AttachmentView: Send + Sync {
    fn render(&self, attachments: &BTreeMap<String, Attachment>);
    fn reset(&self);
}

pub trait LayerView: Send + Sync {
    fn render(&self, config: &OptionalContentConfig);
    fn reset(&self);
}

pub trait FindController: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn Document>>);
    fn execute_command(&self, command: &str, query: &FindQuery);
}

pub trait FindBar: Send + Sync {
    fn update_results_count(&self, matches: FindMatchesCount);
    fn update_ui_state(&self, state: FindState, previous: bool, matches: FindMatchesCount);
    fn reset(&self);
}

/// The document properties dialog.
pub trait DocumentProperties: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn Document>>, url: Option<&str>);
    fn open(&self);
}

pub trait ScriptingHost: Send + Sync {
    fn set_field_objects(&self, fields: Option<FieldObjects>);
}

#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    /// Returns `None` when the user dismisses the prompt.
    async fn request(&self, reason: PasswordReason) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Percent(u8),
    Indeterminate,
}

pub trait ProgressReporter: Send + Sync {
    fn set_progress(&self, progress: Progress);
    fn hide(&self);
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str, details: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    UnsupportedFeature {
        feature: UnsupportedFeature,
    },
    PageInfo {
        timestamp: Instant,
    },
    DocumentInfo {
        version: String,
        generator: String,
        form_type: &'static str,
    },
    Tagged {
        tagged: bool,
    },
}

/// Services provided by the embedding host.
pub trait HostServices: Send + Sync {
    fn fallback(&self, feature: UnsupportedFeature, url: &str);
    fn report_telemetry(&self, event: TelemetryEvent);
    fn set_title(&self, title: &str);
}
