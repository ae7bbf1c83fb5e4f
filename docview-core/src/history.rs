//! Per-document view-state persistence.
//!
//! All documents share a single JSON database of the form
//! `{"files": [{"fingerprint": "...", "page": 3, ...}, ...]}`. Every operation
//! re-reads the backend, so several stores over the same backend observe each
//! other's writes.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, instrument};

use crate::types::{ViewStateRecord, ViewStateUpdate};

#[async_trait]
pub trait ViewStateStore: Send + Sync {
    /// Stored record for this document with missing fields taken from `defaults`.
    async fn get_multiple(&self, defaults: &ViewStateRecord) -> Result<ViewStateRecord>;
    async fn set(&self, update: ViewStateUpdate) -> Result<()>;
    /// Overwrites every field present in `record`.
    async fn set_multiple(&self, record: ViewStateRecord) -> Result<()>;
}

pub trait ViewStateStoreFactory: Send + Sync {
    fn open(&self, fingerprint: &str) -> Arc<dyn ViewStateStore>;
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access history database {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("history database is corrupted")]
    Decode(#[from] serde_json::Error),
    #[error("history file access was interrupted")]
    Interrupted(#[from] JoinError),
}

/// Raw storage for the serialized database.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn read(&self) -> Result<Option<String>, HistoryError>;
    async fn write(&self, payload: String) -> Result<(), HistoryError>;
}

pub struct FileHistoryBackend {
    path: PathBuf,
}

impl FileHistoryBackend {
    pub fn new(path: PathBuf) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| HistoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HistoryError {
    let path = path.to_path_buf();
    move |source| HistoryError::Io { path, source }
}

/// File access runs on the blocking pool so that slow disks never stall the
/// runtime.
#[async_trait]
impl HistoryBackend for FileHistoryBackend {
    async fn read(&self) -> Result<Option<String>, HistoryError> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            fs::read_to_string(&path).map(Some).map_err(io_error(&path))
        })
        .await?
    }

    async fn write(&self, payload: String) -> Result<(), HistoryError> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let tmp = path.with_extension("json.tmp");
            let mut file = File::create(&tmp).map_err(io_error(&tmp))?;
            file.write_all(payload.as_bytes())
                .and_then(|_| file.flush())
                .map_err(io_error(&tmp))?;
            fs::rename(&tmp, &path).map_err(io_error(&path))
        })
        .await?
    }
}

#[derive(Default)]
pub struct MemoryHistoryBackend {
    inner: Mutex<Option<String>>,
}

impl MemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryBackend for MemoryHistoryBackend {
    async fn read(&self) -> Result<Option<String>, HistoryError> {
        Ok(self.inner.lock().clone())
    }

    async fn write(&self, payload: String) -> Result<(), HistoryError> {
        *self.inner.lock() = Some(payload);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Database {
    files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    fingerprint: String,
    #[serde(flatten)]
    record: ViewStateRecord,
}

/// Shared state of every [`ViewHistory`] created by one factory.
struct Shared {
    backend: Arc<dyn HistoryBackend>,
    cache_size: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    async fn read_database(&self) -> Result<Database, HistoryError> {
        match self.backend.read().await? {
            Some(payload) if !payload.trim().is_empty() => Ok(serde_json::from_str(&payload)?),
            _ => Ok(Database::default()),
        }
    }

    async fn update_entry(
        &self,
        fingerprint: &str,
        update: impl FnOnce(&mut ViewStateRecord),
    ) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;
        let mut database = self.read_database().await?;
        let index = match database
            .files
            .iter()
            .position(|entry| entry.fingerprint == fingerprint)
        {
            Some(index) => index,
            None => {
                database.files.push(FileEntry {
                    fingerprint: fingerprint.to_owned(),
                    record: ViewStateRecord::default(),
                });
                let overflow = database.files.len().saturating_sub(self.cache_size.max(1));
                if overflow > 0 {
                    debug!(evicted = overflow, "evicting oldest history entries");
                    database.files.drain(..overflow);
                }
                database.files.len() - 1
            }
        };
        update(&mut database.files[index].record);
        self.backend.write(serde_json::to_string(&database)?).await
    }
}

/// View state of a single document.
pub struct ViewHistory {
    fingerprint: String,
    shared: Arc<Shared>,
}

impl ViewHistory {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[async_trait]
impl ViewStateStore for ViewHistory {
    async fn get_multiple(&self, defaults: &ViewStateRecord) -> Result<ViewStateRecord> {
        let database = self.shared.read_database().await?;
        let stored = database
            .files
            .into_iter()
            .find(|entry| entry.fingerprint == self.fingerprint)
            .map(|entry| entry.record)
            .unwrap_or_default();
        Ok(stored.or_defaults(defaults))
    }

    #[instrument(skip(self), fields(fingerprint = %self.fingerprint))]
    async fn set(&self, update: ViewStateUpdate) -> Result<()> {
        self.shared
            .update_entry(&self.fingerprint, |record| record.apply(update))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(fingerprint = %self.fingerprint))]
    async fn set_multiple(&self, record: ViewStateRecord) -> Result<()> {
        self.shared
            .update_entry(&self.fingerprint, |stored| stored.merge(&record))
            .await?;
        Ok(())
    }
}

pub struct ViewHistoryFactory {
    shared: Arc<Shared>,
}

impl ViewHistoryFactory {
    pub fn new(backend: Arc<dyn HistoryBackend>, cache_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                cache_size,
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

impl ViewStateStoreFactory for ViewHistoryFactory {
    fn open(&self, fingerprint: &str) -> Arc<dyn ViewStateStore> {
        Arc::new(ViewHistory {
            fingerprint: fingerprint.to_owned(),
            shared: Arc::clone(&self.shared),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScrollMode, SidebarView};
    use tempfile::tempdir;

    fn memory_factory(cache_size: usize) -> (Arc<MemoryHistoryBackend>, ViewHistoryFactory) {
        let backend = Arc::new(MemoryHistoryBackend::new());
        let factory = ViewHistoryFactory::new(backend.clone(), cache_size);
        (backend, factory)
    }

    #[tokio::test]
    async fn unknown_document_yields_defaults() {
        let (_, factory) = memory_factory(20);
        let store = factory.open("abc");
        let defaults = ViewStateRecord::restore_defaults();
        assert_eq!(store.get_multiple(&defaults).await.unwrap(), defaults);
    }

    #[tokio::test]
    async fn writes_merge_into_existing_record() {
        let (_, factory) = memory_factory(20);
        let store = factory.open("abc");
        store
            .set_multiple(ViewStateRecord {
                page: Some(5),
                zoom: Some("1.5".into()),
                rotation: Some(90),
                ..ViewStateRecord::default()
            })
            .await
            .unwrap();
        store
            .set(ViewStateUpdate::SidebarView(SidebarView::Outline))
            .await
            .unwrap();
        store
            .set_multiple(ViewStateRecord {
                page: Some(6),
                ..ViewStateRecord::default()
            })
            .await
            .unwrap();

        let restored = factory
            .open("abc")
            .get_multiple(&ViewStateRecord::restore_defaults())
            .await
            .unwrap();
        assert_eq!(restored.page, Some(6));
        assert_eq!(restored.zoom.as_deref(), Some("1.5"));
        assert_eq!(restored.rotation, Some(90));
        assert_eq!(restored.sidebar_view, Some(SidebarView::Outline));
        assert_eq!(restored.scroll_mode, Some(ScrollMode::Unknown));
    }

    #[tokio::test]
    async fn oldest_entries_are_evicted_when_full() {
        let (backend, factory) = memory_factory(2);
        for fingerprint in ["a", "b", "c"] {
            factory
                .open(fingerprint)
                .set(ViewStateUpdate::ScrollMode(ScrollMode::Wrapped))
                .await
                .unwrap();
        }
        let payload = backend.read().await.unwrap().unwrap();
        let database: Database = serde_json::from_str(&payload).unwrap();
        let kept: Vec<_> = database.files.iter().map(|f| f.fingerprint.as_str()).collect();
        assert_eq!(kept, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn file_backend_persists_across_factories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("history.json");

        let backend = Arc::new(FileHistoryBackend::new(path.clone()).unwrap());
        ViewHistoryFactory::new(backend, 20)
            .open("fp")
            .set_multiple(ViewStateRecord {
                page: Some(2),
                scroll_top: Some(40.0),
                ..ViewStateRecord::default()
            })
            .await
            .unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = Arc::new(FileHistoryBackend::new(path).unwrap());
        let record = ViewHistoryFactory::new(reopened, 20)
            .open("fp")
            .get_multiple(&ViewStateRecord::default())
            .await
            .unwrap();
        assert_eq!(record.page, Some(2));
        assert_eq!(record.scroll_top, Some(40.0));
    }

    #[tokio::test]
    async fn file_backend_reads_nothing_before_the_first_write() {
        let dir = tempdir().unwrap();
        let backend = FileHistoryBackend::new(dir.path().join("history.json")).unwrap();
        assert!(backend.read().await.unwrap().is_none());

        backend.write(r#"{"files":[]}"#.to_owned()).await.unwrap();
        assert_eq!(
            backend.read().await.unwrap().as_deref(),
            Some(r#"{"files":[]}"#)
        );
    }

    #[tokio::test]
    async fn corrupted_database_is_an_error() {
        let (backend, factory) = memory_factory(20);
        backend.write("{not json".to_owned()).await.unwrap();
        let err = factory
            .open("fp")
            .get_multiple(&ViewStateRecord::default())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<HistoryError>().is_some());
    }
}
