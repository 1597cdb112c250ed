use crate::state::ScrapeState;
use chrono::{DateTime, Utc};

/// Immutable progress snapshot of a crawl run
///
/// Built by `CrawlRunner::current_status` at each suspension point and handed
/// to the status reporter by value, so reporters never observe a run mid-update.
#[derive(Debug, Clone)]
pub struct ScrapeStatus {
    /// Lifecycle state at snapshot time
    pub state: ScrapeState,

    /// Pages counted as visited so far (monotonic)
    pub pages_visited: u64,

    /// Current frontier length, recomputed on each report
    pub pages_remaining: usize,

    /// Observed pages-per-minute, derived from the rate limiter
    pub ppm: f64,

    /// Configured pages-per-minute ceiling
    pub ppm_limit: f64,

    /// When this snapshot was taken
    pub reported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_a_value() {
        let status = ScrapeStatus {
            state: ScrapeState::Running,
            pages_visited: 3,
            pages_remaining: 7,
            ppm: 42.0,
            ppm_limit: 60.0,
            reported_at: Utc::now(),
        };

        // A clone is fully independent of the original.
        let copy = status.clone();
        assert_eq!(copy.state, ScrapeState::Running);
        assert_eq!(copy.pages_visited, 3);
        assert_eq!(copy.pages_remaining, 7);
        assert_eq!(copy.ppm_limit, 60.0);
    }
}
