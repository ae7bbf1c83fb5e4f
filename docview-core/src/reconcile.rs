//! Decides where a freshly loaded document opens.
//!
//! Precedence, highest first: the caller's bookmark, the stored view state
//! of the same document (unless the document should always open at its
//! initial view), user preferences for the modes, the document's own page
//! mode and page layout, and finally the built-in defaults.

use crate::engine::Destination;
use crate::types::{
    PageLayout, PageMode, ScrollMode, SidebarView, SpreadMode, ViewOnLoad, ViewStateRecord,
    DEFAULT_SCALE_VALUE,
};

/// Values applied by `set_initial_view` besides the target position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitialViewOptions {
    pub rotation: Option<i32>,
    pub sidebar_view: SidebarView,
    pub scroll_mode: ScrollMode,
    pub spread_mode: SpreadMode,
}

#[derive(Debug, Clone, Default)]
pub struct InitialViewInputs {
    pub bookmark: Option<String>,
    pub stored: ViewStateRecord,
    pub view_on_load: ViewOnLoad,
    pub default_zoom_value: String,
    pub sidebar_view_on_load: SidebarView,
    pub scroll_mode_on_load: ScrollMode,
    pub spread_mode_on_load: SpreadMode,
    pub page_mode: Option<PageMode>,
    pub page_layout: Option<PageLayout>,
    pub open_action: Option<Destination>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitialViewPlan {
    pub bookmark: Option<String>,
    pub hash: Option<String>,
    pub options: InitialViewOptions,
}

impl InitialViewPlan {
    pub fn resolve(inputs: InitialViewInputs) -> Self {
        let InitialViewInputs {
            bookmark,
            stored,
            view_on_load,
            default_zoom_value,
            sidebar_view_on_load,
            scroll_mode_on_load,
            spread_mode_on_load,
            page_mode,
            page_layout,
            open_action,
        } = inputs;

        let mut hash = (!default_zoom_value.is_empty()).then(|| format!("zoom={default_zoom_value}"));
        let mut options = InitialViewOptions {
            rotation: None,
            sidebar_view: sidebar_view_on_load,
            scroll_mode: scroll_mode_on_load,
            spread_mode: spread_mode_on_load,
        };

        let stored_page = stored.page.filter(|_| view_on_load != ViewOnLoad::Initial);
        if let Some(page) = stored_page {
            hash = Some(format!(
                "page={page}&zoom={},{},{}",
                stored.zoom.as_deref().unwrap_or(DEFAULT_SCALE_VALUE),
                stored.scroll_left.unwrap_or(0.0),
                stored.scroll_top.unwrap_or(0.0),
            ));
            options.rotation = stored.rotation;
            if !options.sidebar_view.is_known() {
                options.sidebar_view = stored.sidebar_view.unwrap_or_default();
            }
            if !options.scroll_mode.is_known() {
                options.scroll_mode = stored.scroll_mode.unwrap_or_default();
            }
            if !options.spread_mode.is_known() {
                options.spread_mode = stored.spread_mode.unwrap_or_default();
            }
        }

        if let Some(mode) = page_mode {
            if !options.sidebar_view.is_known() {
                options.sidebar_view = mode.sidebar_view();
            }
        }
        if let Some(layout) = page_layout {
            if !options.spread_mode.is_known() {
                options.spread_mode = layout.spread_mode();
            }
        }

        let bookmark = bookmark.or_else(|| {
            let applies = stored_page.is_none() && view_on_load != ViewOnLoad::Initial;
            open_action.filter(|_| applies).map(|dest| dest.to_hash())
        });

        Self {
            bookmark,
            hash,
            options,
        }
    }

    /// The position `set_initial_view` navigates to.
    pub fn target(&self) -> Option<&str> {
        self.bookmark.as_deref().or(self.hash.as_deref())
    }
}
