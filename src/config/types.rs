use serde::Deserialize;

/// Main configuration structure for Ambry-Scrape
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub overview: OverviewConfig,
}

/// Crawl behavior configuration
///
/// Immutable for the lifetime of a run; the runner copies what it needs at
/// construction time.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    /// URL the crawl starts from
    #[serde(rename = "first-page")]
    pub first_page: String,

    /// URL prefixes defining which pages are in scope
    #[serde(rename = "root-urls")]
    pub root_urls: Vec<String>,

    /// Selector expression identifying anchor-like elements on a page
    #[serde(rename = "link-selector", default = "default_link_selector")]
    pub link_selector: String,

    /// Pages-per-minute ceiling for navigations
    #[serde(rename = "ppm-limit")]
    pub ppm_limit: f64,

    /// When true, no recording session is started or stopped
    #[serde(rename = "dry-run", default)]
    pub dry_run: bool,
}

/// Status reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Interval between status reports while waiting for a page load (milliseconds)
    #[serde(rename = "interval-ms", default = "default_report_interval")]
    pub interval_ms: u64,
}

/// Post-crawl overview navigation configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverviewConfig {
    /// Location the surface is navigated to after the frontier drains.
    /// Owned by the embedding application; when unset the final navigation
    /// is skipped.
    #[serde(rename = "all-pages-url")]
    pub all_pages_url: Option<String>,
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

fn default_report_interval() -> u64 {
    1000
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_report_interval(),
        }
    }
}
