use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Zoom value used whenever nothing else picked one.
pub const DEFAULT_SCALE_VALUE: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum SidebarView {
    #[default]
    Unknown,
    None,
    Thumbs,
    Outline,
    Attachments,
    Layers,
}

impl SidebarView {
    pub fn is_known(self) -> bool {
        self != SidebarView::Unknown
    }
}

impl From<i32> for SidebarView {
    fn from(value: i32) -> Self {
        match value {
            0 => SidebarView::None,
            1 => SidebarView::Thumbs,
            2 => SidebarView::Outline,
            3 => SidebarView::Attachments,
            4 => SidebarView::Layers,
            _ => SidebarView::Unknown,
        }
    }
}

impl From<SidebarView> for i32 {
    fn from(view: SidebarView) -> Self {
        match view {
            SidebarView::Unknown => -1,
            SidebarView::None => 0,
            SidebarView::Thumbs => 1,
            SidebarView::Outline => 2,
            SidebarView::Attachments => 3,
            SidebarView::Layers => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ScrollMode {
    #[default]
    Unknown,
    Vertical,
    Horizontal,
    Wrapped,
    Page,
}

impl ScrollMode {
    pub fn is_known(self) -> bool {
        self != ScrollMode::Unknown
    }

    /// Next mode in the order the toolbar cycles through.
    pub fn cycle(self) -> Self {
        match self {
            ScrollMode::Vertical => ScrollMode::Horizontal,
            ScrollMode::Horizontal => ScrollMode::Wrapped,
            ScrollMode::Wrapped => ScrollMode::Page,
            ScrollMode::Page | ScrollMode::Unknown => ScrollMode::Vertical,
        }
    }
}

impl From<i32> for ScrollMode {
    fn from(value: i32) -> Self {
        match value {
            0 => ScrollMode::Vertical,
            1 => ScrollMode::Horizontal,
            2 => ScrollMode::Wrapped,
            3 => ScrollMode::Page,
            _ => ScrollMode::Unknown,
        }
    }
}

impl From<ScrollMode> for i32 {
    fn from(mode: ScrollMode) -> Self {
        match mode {
            ScrollMode::Unknown => -1,
            ScrollMode::Vertical => 0,
            ScrollMode::Horizontal => 1,
            ScrollMode::Wrapped => 2,
            ScrollMode::Page => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum SpreadMode {
    #[default]
    Unknown,
    None,
    Odd,
    Even,
}

impl SpreadMode {
    pub fn is_known(self) -> bool {
        self != SpreadMode::Unknown
    }

    pub fn cycle(self) -> Self {
        match self {
            SpreadMode::None => SpreadMode::Odd,
            SpreadMode::Odd => SpreadMode::Even,
            SpreadMode::Even | SpreadMode::Unknown => SpreadMode::None,
        }
    }
}

impl From<i32> for SpreadMode {
    fn from(value: i32) -> Self {
        match value {
            0 => SpreadMode::None,
            1 => SpreadMode::Odd,
            2 => SpreadMode::Even,
            _ => SpreadMode::Unknown,
        }
    }
}

impl From<SpreadMode> for i32 {
    fn from(mode: SpreadMode) -> Self {
        match mode {
            SpreadMode::Unknown => -1,
            SpreadMode::None => 0,
            SpreadMode::Odd => 1,
            SpreadMode::Even => 2,
        }
    }
}

/// Whether a reopened document restores its previous position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewOnLoad {
    #[default]
    Unknown,
    Previous,
    Initial,
}

impl From<i64> for ViewOnLoad {
    fn from(value: i64) -> Self {
        match value {
            0 => ViewOnLoad::Previous,
            1 => ViewOnLoad::Initial,
            _ => ViewOnLoad::Unknown,
        }
    }
}

/// Page rotation in degrees. Only multiples of 90 are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rotation(u16);

impl Rotation {
    pub fn new(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        Some(Self(degrees.rem_euclid(360) as u16))
    }

    pub fn degrees(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererType {
    Canvas,
    Svg,
}

impl FromStr for RendererType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "canvas" => Ok(RendererType::Canvas),
            "svg" => Ok(RendererType::Svg),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderingState {
    Initial,
    Running,
    Paused,
    Finished,
}

/// `/PageMode` entry of the document catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    UseNone,
    UseOutlines,
    UseThumbs,
    FullScreen,
    UseOc,
    UseAttachments,
}

impl PageMode {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "UseNone" => PageMode::UseNone,
            "UseOutlines" => PageMode::UseOutlines,
            "UseThumbs" => PageMode::UseThumbs,
            "FullScreen" => PageMode::FullScreen,
            "UseOC" => PageMode::UseOc,
            "UseAttachments" => PageMode::UseAttachments,
            _ => return None,
        })
    }

    pub fn sidebar_view(self) -> SidebarView {
        match self {
            PageMode::UseNone | PageMode::FullScreen => SidebarView::None,
            PageMode::UseThumbs => SidebarView::Thumbs,
            PageMode::UseOutlines => SidebarView::Outline,
            PageMode::UseAttachments => SidebarView::Attachments,
            PageMode::UseOc => SidebarView::Layers,
        }
    }
}

/// `/PageLayout` entry of the document catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    SinglePage,
    OneColumn,
    TwoColumnLeft,
    TwoColumnRight,
    TwoPageLeft,
    TwoPageRight,
}

impl PageLayout {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "SinglePage" => PageLayout::SinglePage,
            "OneColumn" => PageLayout::OneColumn,
            "TwoColumnLeft" => PageLayout::TwoColumnLeft,
            "TwoColumnRight" => PageLayout::TwoColumnRight,
            "TwoPageLeft" => PageLayout::TwoPageLeft,
            "TwoPageRight" => PageLayout::TwoPageRight,
            _ => return None,
        })
    }

    pub fn spread_mode(self) -> SpreadMode {
        match self {
            PageLayout::SinglePage | PageLayout::OneColumn => SpreadMode::None,
            PageLayout::TwoColumnLeft | PageLayout::TwoPageLeft => SpreadMode::Odd,
            PageLayout::TwoColumnRight | PageLayout::TwoPageRight => SpreadMode::Even,
        }
    }
}

/// Current viewport position as reported by the primary viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub page_number: usize,
    pub scale: String,
    pub left: f64,
    pub top: f64,
    pub rotation: Rotation,
}

/// Positional snapshot persisted per document fingerprint.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStateRecord {
    pub page: Option<usize>,
    pub zoom: Option<String>,
    pub scroll_left: Option<f64>,
    pub scroll_top: Option<f64>,
    pub rotation: Option<i32>,
    pub sidebar_view: Option<SidebarView>,
    pub scroll_mode: Option<ScrollMode>,
    pub spread_mode: Option<SpreadMode>,
}

impl ViewStateRecord {
    /// Defaults requested when restoring a document's previous view.
    pub fn restore_defaults() -> Self {
        Self {
            page: None,
            zoom: Some(DEFAULT_SCALE_VALUE.to_owned()),
            scroll_left: Some(0.0),
            scroll_top: Some(0.0),
            rotation: None,
            sidebar_view: Some(SidebarView::Unknown),
            scroll_mode: Some(ScrollMode::Unknown),
            spread_mode: Some(SpreadMode::Unknown),
        }
    }

    pub fn from_location(location: &Location) -> Self {
        Self {
            page: Some(location.page_number),
            zoom: Some(location.scale.clone()),
            scroll_left: Some(location.left),
            scroll_top: Some(location.top),
            rotation: Some(i32::from(location.rotation.degrees())),
            ..Self::default()
        }
    }

    /// Fills every missing field from `defaults`.
    pub fn or_defaults(mut self, defaults: &ViewStateRecord) -> Self {
        self.page = self.page.or(defaults.page);
        self.zoom = self.zoom.or_else(|| defaults.zoom.clone());
        self.scroll_left = self.scroll_left.or(defaults.scroll_left);
        self.scroll_top = self.scroll_top.or(defaults.scroll_top);
        self.rotation = self.rotation.or(defaults.rotation);
        self.sidebar_view = self.sidebar_view.or(defaults.sidebar_view);
        self.scroll_mode = self.scroll_mode.or(defaults.scroll_mode);
        self.spread_mode = self.spread_mode.or(defaults.spread_mode);
        self
    }

    /// Overwrites the fields present in `other`.
    pub fn merge(&mut self, other: &ViewStateRecord) {
        if other.page.is_some() {
            self.page = other.page;
        }
        if other.zoom.is_some() {
            self.zoom = other.zoom.clone();
        }
        if other.scroll_left.is_some() {
            self.scroll_left = other.scroll_left;
        }
        if other.scroll_top.is_some() {
            self.scroll_top = other.scroll_top;
        }
        if other.rotation.is_some() {
            self.rotation = other.rotation;
        }
        if other.sidebar_view.is_some() {
            self.sidebar_view = other.sidebar_view;
        }
        if other.scroll_mode.is_some() {
            self.scroll_mode = other.scroll_mode;
        }
        if other.spread_mode.is_some() {
            self.spread_mode = other.spread_mode;
        }
    }

    pub fn apply(&mut self, update: ViewStateUpdate) {
        match update {
            ViewStateUpdate::SidebarView(view) => self.sidebar_view = Some(view),
            ViewStateUpdate::ScrollMode(mode) => self.scroll_mode = Some(mode),
            ViewStateUpdate::SpreadMode(mode) => self.spread_mode = Some(mode),
        }
    }
}

/// Single-field write to the view-state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStateUpdate {
    SidebarView(SidebarView),
    ScrollMode(ScrollMode),
    SpreadMode(SpreadMode),
}

impl fmt::Display for ViewStateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewStateUpdate::SidebarView(view) => write!(f, "sidebarView={}", i32::from(*view)),
            ViewStateUpdate::ScrollMode(mode) => write!(f, "scrollMode={}", i32::from(*mode)),
            ViewStateUpdate::SpreadMode(mode) => write!(f, "spreadMode={}", i32::from(*mode)),
        }
    }
}
