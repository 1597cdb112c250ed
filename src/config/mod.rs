//! Configuration module for Ambry-Scrape
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use ambry_scrape::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawl starts at: {}", config.scrape.first_page);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, OverviewConfig, ReportConfig, ScrapeConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
