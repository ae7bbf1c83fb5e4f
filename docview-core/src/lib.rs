//! Document-session lifecycle for a paged document viewer.
//!
//! The crate is independent of any particular document engine or UI: both
//! are reached through the traits in [`engine`] and [`viewer`].

pub mod bus;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod guard;
pub mod history;
pub mod idle;
pub mod options;
pub mod progress;
pub mod reconcile;
pub mod types;
pub mod viewer;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, EventKind, FindKind, FindMatchesCount, FindQuery, FindState, ViewerEvent};
pub use controller::{Collaborators, SessionController};
pub use engine::{Document, DocumentEngine, DocumentSource, LoadingTask, OpenArgs};
pub use error::{LoadError, LoadFailure};
pub use history::{FileHistoryBackend, ViewHistoryFactory};
pub use idle::TokioIdleScheduler;
pub use options::{AppOptions, OptionKind, OptionsError};
pub use types::{
    Location, Rotation, ScrollMode, SidebarView, SpreadMode, ViewStateRecord, DEFAULT_SCALE_VALUE,
};
