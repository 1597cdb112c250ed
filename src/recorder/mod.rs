//! Page-record bookkeeping across navigations
//!
//! While a recording session is active, every qualifying full-document
//! navigation gets a page-record binding: the persisted page resolved for the
//! navigation's URL, kept current across same-document navigations and title
//! changes. Store resolutions are asynchronous; updates targeting one binding
//! apply in event order through a per-binding worker, and a binding
//! superseded by the next full navigation drops its uncommitted updates via a
//! generation check.

pub mod memory;

use crate::surface::{BrowsingSurface, SurfaceEvent};
use crate::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use url::Url;

pub use memory::{LocalSession, MemoryStore, StoredPage};

/// Identifier of a persisted archive page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub i64);

/// Identifier of the collection a recording session writes into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionId(pub String);

/// Archive store faults
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive store unavailable")]
    Unavailable,

    #[error("archive store rejected the operation: {0}")]
    Rejected(String),
}

/// Insert-or-update payload for a persisted page
///
/// Upserts are keyed by collection + URL. `original_url` back-references the
/// full navigation a same-document page was reached from.
#[derive(Debug, Clone)]
pub struct PageUpsert {
    pub collection: CollectionId,
    pub url: Url,
    pub title: String,
    pub original_url: Option<Url>,
}

/// The persisted archive the recorder writes page records into
pub trait ArchiveStore: Send + Sync {
    /// Inserts or updates a page record, returning its identifier
    fn upsert_page(&self, record: PageUpsert) -> BoxFuture<'_, Result<PageId, StoreError>>;

    /// Updates the stored title of an existing page
    fn set_page_title(&self, page: PageId, title: &str) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// The recording-session lifecycle the crawl and recorder consult
pub trait RecordingControl: Send + Sync {
    /// Whether a recording session is currently active
    fn is_recording_active(&self) -> bool;

    /// Ensures a recording session is running
    fn start_recording_session(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Ends the active recording session
    fn finish_recording_session(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Whether the URL is excluded from recording
    fn url_is_excluded(&self, url: &Url) -> bool;

    /// Collection the active session records into
    fn active_collection(&self) -> Option<CollectionId>;
}

/// Update destined for a live binding's worker
#[derive(Debug)]
enum BindingOp {
    InPageNavigation { url: Url },
    TitleChange { title: String },
}

/// Live binding for the most recent qualifying full navigation
struct Binding {
    generation: u64,
    ops: mpsc::UnboundedSender<BindingOp>,
}

/// Tracks the mapping from live navigations to persisted page records
pub struct PageRecorder {
    store: Arc<dyn ArchiveStore>,
    session: Arc<dyn RecordingControl>,
    generation: Arc<AtomicU64>,
    binding: Mutex<Option<Binding>>,
}

impl PageRecorder {
    /// Creates a recorder over the given store and session controller
    pub fn new(store: Arc<dyn ArchiveStore>, session: Arc<dyn RecordingControl>) -> Self {
        Self {
            store,
            session,
            generation: Arc::new(AtomicU64::new(0)),
            binding: Mutex::new(None),
        }
    }

    /// Handles a full-document navigation
    ///
    /// A qualifying navigation (recording active, URL not excluded) opens a
    /// new binding and supersedes any previous one; a non-qualifying one just
    /// clears the binding.
    pub fn on_navigated(&self, url: &Url, title: &str) {
        if !self.session.is_recording_active() || self.session.url_is_excluded(url) {
            *self.binding.lock().unwrap() = None;
            return;
        }
        let Some(collection) = self.session.active_collection() else {
            *self.binding.lock().unwrap() = None;
            return;
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (ops, inbox) = mpsc::unbounded_channel();
        *self.binding.lock().unwrap() = Some(Binding { generation, ops });

        tracing::debug!(url = %url, generation, "opening page-record binding");
        tokio::spawn(run_binding(
            Arc::clone(&self.store),
            collection,
            url.clone(),
            title.to_string(),
            inbox,
            generation,
            Arc::clone(&self.generation),
        ));
    }

    /// Handles a same-document navigation
    pub fn on_in_page_navigated(&self, url: &Url, main_frame: bool) {
        if !main_frame || !self.session.is_recording_active() {
            return;
        }
        if let Some(binding) = self.binding.lock().unwrap().as_ref() {
            let _ = binding.ops.send(BindingOp::InPageNavigation { url: url.clone() });
        }
    }

    /// Handles a document title change
    pub fn on_title_changed(&self, title: &str) {
        if !self.session.is_recording_active() {
            return;
        }
        if let Some(binding) = self.binding.lock().unwrap().as_ref() {
            let _ = binding.ops.send(BindingOp::TitleChange {
                title: title.to_string(),
            });
        }
    }

    /// Spawns an event pump feeding this recorder from a surface
    pub fn attach(
        self: &Arc<Self>,
        surface: Arc<dyn BrowsingSurface>,
    ) -> tokio::task::JoinHandle<()> {
        let recorder = Arc::clone(self);
        let mut events = surface.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SurfaceEvent::Navigated { url, .. }) => {
                        recorder.on_navigated(&url, &surface.page_title());
                    }
                    Ok(SurfaceEvent::InPageNavigated { url, main_frame }) => {
                        recorder.on_in_page_navigated(&url, main_frame);
                    }
                    Ok(SurfaceEvent::TitleChanged { title }) => {
                        recorder.on_title_changed(&title);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "recorder lagged behind surface events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Per-binding worker: resolves the root page, then applies queued updates in
/// event order until the binding is superseded or dropped.
async fn run_binding(
    store: Arc<dyn ArchiveStore>,
    collection: CollectionId,
    root_url: Url,
    root_title: String,
    mut inbox: mpsc::UnboundedReceiver<BindingOp>,
    generation: u64,
    live_generation: Arc<AtomicU64>,
) {
    let root_id = match store
        .upsert_page(PageUpsert {
            collection: collection.clone(),
            url: root_url.clone(),
            title: root_title.clone(),
            original_url: None,
        })
        .await
    {
        Ok(id) => id,
        Err(error) => {
            tracing::warn!(url = %root_url, %error, "failed to resolve root page record");
            return;
        }
    };
    if live_generation.load(Ordering::SeqCst) != generation {
        tracing::debug!(generation, "binding superseded before root record applied");
        return;
    }

    let mut current = root_id;
    let mut last_title = root_title;
    while let Some(op) = inbox.recv().await {
        if live_generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "binding superseded, dropping update");
            return;
        }
        match op {
            BindingOp::InPageNavigation { url } => {
                let original_url = (url != root_url).then(|| root_url.clone());
                match store
                    .upsert_page(PageUpsert {
                        collection: collection.clone(),
                        url: url.clone(),
                        title: last_title.clone(),
                        original_url,
                    })
                    .await
                {
                    Ok(id) => current = id,
                    Err(error) => {
                        tracing::warn!(url = %url, %error, "failed to record in-page navigation");
                    }
                }
            }
            BindingOp::TitleChange { title } => {
                last_title = title.clone();
                if let Err(error) = store.set_page_title(current, &title).await {
                    tracing::warn!(%error, "failed to update page title");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    /// Lets spawned binding workers drain their queues.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn recorder_over(
        store: &Arc<MemoryStore>,
        session: &Arc<LocalSession>,
    ) -> PageRecorder {
        PageRecorder::new(
            Arc::clone(store) as Arc<dyn ArchiveStore>,
            Arc::clone(session) as Arc<dyn RecordingControl>,
        )
    }

    #[tokio::test]
    async fn test_navigation_resolves_root_page() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/a"), "Page A");
        settle().await;

        let pages = store.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url.as_str(), "https://example.com/a");
        assert_eq!(pages[0].title, "Page A");
        assert!(pages[0].original_url.is_none());
    }

    #[tokio::test]
    async fn test_navigation_ignored_when_not_recording() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::new("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/a"), "Page A");
        settle().await;

        assert!(store.pages().is_empty());
    }

    #[tokio::test]
    async fn test_excluded_url_clears_binding() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started_with_exclusions(
            "web",
            vec!["https://example.com/private".to_string()],
        ));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/a"), "Page A");
        settle().await;
        recorder.on_navigated(&url("https://example.com/private/x"), "Secret");
        settle().await;

        // The excluded navigation recorded nothing and left no binding for
        // later events to land on.
        recorder.on_title_changed("Renamed");
        settle().await;

        let pages = store.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].title, "Page A");
    }

    #[tokio::test]
    async fn test_in_page_navigation_records_back_reference() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/app"), "App");
        settle().await;
        recorder.on_in_page_navigated(&url("https://example.com/app/view/2"), true);
        settle().await;

        let pages = store.pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].url.as_str(), "https://example.com/app/view/2");
        assert_eq!(
            pages[1].original_url.as_ref().map(|u| u.as_str()),
            Some("https://example.com/app")
        );
    }

    #[tokio::test]
    async fn test_in_page_navigation_to_root_url_has_no_back_reference() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/app"), "App");
        settle().await;
        recorder.on_in_page_navigated(&url("https://example.com/app"), true);
        settle().await;

        // The in-page URL equals the root: the upsert hits the same record
        // and no original_url is attached.
        let pages = store.pages();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].original_url.is_none());
    }

    #[tokio::test]
    async fn test_fragment_navigation_records_back_reference() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/app"), "App");
        settle().await;
        recorder.on_in_page_navigated(&url("https://example.com/app#pane"), true);
        settle().await;

        let pages = store.pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].url.as_str(), "https://example.com/app#pane");
        assert_eq!(
            pages[1].original_url.as_ref().map(|u| u.as_str()),
            Some("https://example.com/app")
        );
    }

    #[tokio::test]
    async fn test_subframe_navigation_ignored() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/app"), "App");
        settle().await;
        recorder.on_in_page_navigated(&url("https://ads.example.net/frame"), false);
        settle().await;

        assert_eq!(store.pages().len(), 1);
    }

    #[tokio::test]
    async fn test_title_change_updates_current_page() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        recorder.on_navigated(&url("https://example.com/app"), "App");
        recorder.on_in_page_navigated(&url("https://example.com/app/view"), true);
        recorder.on_title_changed("View 1");
        settle().await;

        let pages = store.pages();
        assert_eq!(pages.len(), 2);
        // The title change targets the in-page record, not the root.
        assert_eq!(pages[0].title, "App");
        assert_eq!(pages[1].title, "View 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_binding_drops_uncommitted_updates() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(100)));
        let session = Arc::new(LocalSession::started("web"));
        let recorder = recorder_over(&store, &session);

        // First binding gets a title update queued behind its (slow) root
        // resolution, then is superseded before anything commits.
        recorder.on_navigated(&url("https://example.com/one"), "One");
        recorder.on_title_changed("Stale Title");
        recorder.on_navigated(&url("https://example.com/two"), "Two");

        // Paused clock: sleeping here auto-advances past the store latency
        // once both workers are parked on their timers.
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;

        let pages = store.pages();
        assert_eq!(pages.len(), 2);
        let one = pages
            .iter()
            .find(|p| p.url.as_str() == "https://example.com/one")
            .unwrap();
        // The queued title update belonged to the superseded binding.
        assert_eq!(one.title, "One");
    }
}
