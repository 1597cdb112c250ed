//! Browsing-surface abstraction
//!
//! The crawl engine never speaks HTTP itself: it drives an external browsing
//! surface (the archiving browser's content view) through this seam. The
//! surface navigates, settles, and emits lifecycle events; the engine's only
//! other lever is one-shot script evaluation inside the page.

pub mod fixture;

use crate::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

pub use fixture::{FixturePage, FixtureSurface};

/// Events emitted by a browsing surface
#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    /// A navigation began
    LoadStarted,

    /// The current navigation settled (successfully or not)
    LoadStopped,

    /// A full-document navigation committed
    Navigated {
        url: Url,
        status_code: u16,
    },

    /// A same-document navigation occurred
    InPageNavigated {
        url: Url,
        main_frame: bool,
    },

    /// The document title changed
    TitleChanged {
        title: String,
    },
}

/// Browsing-surface faults
#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    #[error("browsing surface has been destroyed")]
    Gone,

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("navigation failed: {0}")]
    Load(String),

    #[error("surface event stream closed")]
    EventsClosed,
}

/// The browsing surface the crawl engine drives
///
/// Object-safe so the runner, channel, and recorder can share one surface
/// behind `Arc<dyn BrowsingSurface>`; async operations return boxed `Send`
/// futures. `load_url` resolves once the navigation is initiated, not once it
/// settles; settling is observed through the event stream.
pub trait BrowsingSurface: Send + Sync {
    /// Whether the surface still exists and can be driven
    fn is_active(&self) -> bool;

    /// URL of the current document
    fn current_url(&self) -> Url;

    /// Title of the current document
    fn page_title(&self) -> String;

    /// Whether a navigation is in flight
    fn is_loading(&self) -> bool;

    /// Begins navigating to the given URL
    fn load_url(&self, url: &Url) -> BoxFuture<'_, Result<(), SurfaceError>>;

    /// Evaluates a script expression in the current page and returns its value
    fn execute_javascript(&self, script: &str) -> BoxFuture<'_, Result<Value, SurfaceError>>;

    /// Subscribes to surface lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent>;
}
