use crate::config::types::{Config, OverviewConfig, ReportConfig, ScrapeConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scrape_config(&config.scrape)?;
    validate_report_config(&config.report)?;
    validate_overview_config(&config.overview)?;
    Ok(())
}

/// Validates crawl behavior configuration
fn validate_scrape_config(config: &ScrapeConfig) -> Result<(), ConfigError> {
    validate_page_url(&config.first_page, "first-page")?;

    if config.root_urls.is_empty() {
        return Err(ConfigError::Validation(
            "root-urls must contain at least one URL prefix".to_string(),
        ));
    }

    for root in &config.root_urls {
        validate_page_url(root, "root-urls entry")?;
    }

    if config.link_selector.trim().is_empty() {
        return Err(ConfigError::Validation(
            "link-selector cannot be empty".to_string(),
        ));
    }

    if !(config.ppm_limit.is_finite() && config.ppm_limit > 0.0) {
        return Err(ConfigError::Validation(format!(
            "ppm-limit must be a positive number, got {}",
            config.ppm_limit
        )));
    }

    Ok(())
}

/// Validates status reporting configuration
fn validate_report_config(config: &ReportConfig) -> Result<(), ConfigError> {
    if config.interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "report interval-ms must be >= 100ms, got {}ms",
            config.interval_ms
        )));
    }

    Ok(())
}

/// Validates the overview navigation configuration
fn validate_overview_config(config: &OverviewConfig) -> Result<(), ConfigError> {
    if let Some(url) = &config.all_pages_url {
        // App-internal schemes are allowed here, so only require parseability.
        Url::parse(url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid all-pages-url '{}': {}", url, e)))?;
    }

    Ok(())
}

/// Validates that a config field holds a parseable http(s) URL
fn validate_page_url(url: &str, field: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, url, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use the http or https scheme",
            field, url
        )));
    }

    Ok(())
}
