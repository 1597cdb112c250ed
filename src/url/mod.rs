//! URL handling module for Ambry-Scrape
//!
//! This module provides the fragment-stripping normalization used for
//! frontier deduplication, href resolution against a document base, and
//! root-prefix scope matching.

mod normalize;
mod scope;

// Re-export main functions
pub use normalize::{resolve_href, strip_fragment};
pub use scope::in_scope;
