//! In-memory archive collaborators
//!
//! The persisted archive and the recording-session controller live outside
//! this crate; these implementations back the offline fixture mode and the
//! test suite.

use crate::recorder::{ArchiveStore, CollectionId, PageId, PageUpsert, RecordingControl, StoreError};
use crate::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// A page record held by [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub id: PageId,
    pub collection: CollectionId,
    pub url: Url,
    pub title: String,
    pub original_url: Option<Url>,
}

/// `ArchiveStore` over a plain vector, upserting by collection + URL
#[derive(Debug, Default)]
pub struct MemoryStore {
    pages: Mutex<Vec<StoredPage>>,
    next_id: AtomicI64,
    latency: Duration,
}

impl MemoryStore {
    /// Creates a store that resolves immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose operations resolve after `latency`
    ///
    /// Used to exercise bindings whose resolutions are still in flight when
    /// the next navigation arrives.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Returns a copy of every stored page, in insertion order
    pub fn pages(&self) -> Vec<StoredPage> {
        self.pages.lock().unwrap().clone()
    }
}

impl ArchiveStore for MemoryStore {
    fn upsert_page(&self, record: PageUpsert) -> BoxFuture<'_, Result<PageId, StoreError>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut pages = self.pages.lock().unwrap();
            if let Some(existing) = pages
                .iter_mut()
                .find(|p| p.collection == record.collection && p.url == record.url)
            {
                existing.title = record.title;
                if record.original_url.is_some() {
                    existing.original_url = record.original_url;
                }
                return Ok(existing.id);
            }
            let id = PageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            pages.push(StoredPage {
                id,
                collection: record.collection,
                url: record.url,
                title: record.title,
                original_url: record.original_url,
            });
            Ok(id)
        })
    }

    fn set_page_title(&self, page: PageId, title: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        let title = title.to_string();
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut pages = self.pages.lock().unwrap();
            match pages.iter_mut().find(|p| p.id == page) {
                Some(existing) => {
                    existing.title = title;
                    Ok(())
                }
                None => Err(StoreError::Rejected(format!("unknown page {:?}", page))),
            }
        })
    }
}

/// `RecordingControl` for a single local session
#[derive(Debug)]
pub struct LocalSession {
    collection: CollectionId,
    active: AtomicBool,
    exclusions: Vec<String>,
    starts: AtomicU32,
    finishes: AtomicU32,
}

impl LocalSession {
    /// Creates an inactive session recording into `collection`
    pub fn new(collection: &str) -> Self {
        Self {
            collection: CollectionId(collection.to_string()),
            active: AtomicBool::new(false),
            exclusions: Vec::new(),
            starts: AtomicU32::new(0),
            finishes: AtomicU32::new(0),
        }
    }

    /// Creates a session that is already recording
    pub fn started(collection: &str) -> Self {
        let session = Self::new(collection);
        session.active.store(true, Ordering::SeqCst);
        session
    }

    /// Creates an active session with URL-prefix exclusions
    pub fn started_with_exclusions(collection: &str, exclusions: Vec<String>) -> Self {
        let mut session = Self::new(collection);
        session.exclusions = exclusions;
        session.active.store(true, Ordering::SeqCst);
        session
    }

    /// How many times a session start was requested
    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// How many times a session finish was requested
    pub fn finish_count(&self) -> u32 {
        self.finishes.load(Ordering::SeqCst)
    }
}

impl RecordingControl for LocalSession {
    fn is_recording_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn start_recording_session(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn finish_recording_session(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.finishes.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn url_is_excluded(&self, url: &Url) -> bool {
        let candidate = url.as_str();
        self.exclusions
            .iter()
            .any(|prefix| candidate.starts_with(prefix.as_str()))
    }

    fn active_collection(&self) -> Option<CollectionId> {
        Some(self.collection.clone())
    }
}
