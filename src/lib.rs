//! Ambry-Scrape: the autonomous capture crawler of the Ambry archiving browser
//!
//! This crate drives the archiving of every in-scope page reachable from a
//! starting page by following on-page hyperlinks, pacing navigations against a
//! pages-per-minute ceiling and reporting live progress until the frontier is
//! exhausted or an operator cancels the run. It also provides the polling
//! request/response bridge that lets archived page content exchange structured
//! messages with the host over repeated one-shot script evaluation.

pub mod channel;
pub mod config;
pub mod crawler;
pub mod frontier;
pub mod limiter;
pub mod recorder;
pub mod state;
pub mod surface;
pub mod url;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Boxed future returned by collaborator trait methods.
///
/// The browsing surface, recording controller, and archive store are
/// object-safe seams; their async operations are expressed as boxed `Send`
/// futures so callers can hold them behind `Arc<dyn …>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Main error type for Ambry-Scrape operations
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No active browsing surface")]
    NoSurface,

    #[error("Surface error: {0}")]
    Surface(#[from] surface::SurfaceError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: state::ScrapeState,
        to: state::ScrapeState,
    },

    #[error("Archive store error: {0}")]
    Store(#[from] recorder::StoreError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),
}

/// Result type alias for Ambry-Scrape operations
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use channel::MessageChannel;
pub use config::Config;
pub use crawler::CrawlRunner;
pub use frontier::Frontier;
pub use limiter::RateLimiter;
pub use recorder::PageRecorder;
pub use state::{ScrapeState, ScrapeStatus};
pub use surface::{BrowsingSurface, SurfaceEvent};
