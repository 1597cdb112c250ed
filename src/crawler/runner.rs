//! The crawl runner state machine
//!
//! One runner drives one crawl: navigate, wait for the page to settle,
//! examine it, discover links, admit the next navigation through the rate
//! limiter, repeat. Every step either completes synchronously or suspends on
//! exactly one external event, and cancellation is observed only at the cycle
//! top and before issuing a navigation — never by interrupting an operation
//! in flight.

use crate::config::Config;
use crate::frontier::Frontier;
use crate::limiter::RateLimiter;
use crate::recorder::RecordingControl;
use crate::state::{ScrapeState, ScrapeStatus};
use crate::surface::{BrowsingSurface, SurfaceEvent};
use crate::url::{in_scope, resolve_href, strip_fragment};
use crate::{Result, ScrapeError};
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use url::Url;

/// Caller-supplied status reporting hook
///
/// Invoked with the runner handle and an immutable status snapshot; may fire
/// from within a suspended wait.
pub type StatusReporter = Arc<dyn Fn(&CrawlRunner, ScrapeStatus) + Send + Sync>;

/// How the advance-queue cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Finished,
    Canceled,
}

/// Rate-limited crawl state machine over a browsing surface
pub struct CrawlRunner {
    first_page: Url,
    roots: Vec<Url>,
    link_selector: String,
    ppm_limit: f64,
    dry_run: bool,
    report_interval: Duration,
    overview_url: Option<Url>,
    surface: Arc<dyn BrowsingSurface>,
    session: Arc<dyn RecordingControl>,
    limiter: Mutex<RateLimiter>,
    frontier: Mutex<Frontier>,
    state: watch::Sender<ScrapeState>,
    pages_visited: AtomicU64,
    stop_requested: AtomicBool,
    reporter: Mutex<Option<StatusReporter>>,
}

impl CrawlRunner {
    /// Creates a runner over the given surface and recording controller
    ///
    /// # Arguments
    ///
    /// * `config` - Validated scrape configuration
    /// * `surface` - The browsing surface navigations are issued against
    /// * `session` - Recording-session lifecycle controller
    pub fn new(
        config: &Config,
        surface: Arc<dyn BrowsingSurface>,
        session: Arc<dyn RecordingControl>,
    ) -> Result<Self> {
        let first_page = Url::parse(&config.scrape.first_page)?;
        let roots = config
            .scrape
            .root_urls
            .iter()
            .map(|root| Url::parse(root))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let overview_url = config
            .overview
            .all_pages_url
            .as_deref()
            .map(Url::parse)
            .transpose()?;
        let (state, _) = watch::channel(ScrapeState::Initialized);

        Ok(Self {
            first_page,
            roots,
            link_selector: config.scrape.link_selector.clone(),
            ppm_limit: config.scrape.ppm_limit,
            dry_run: config.scrape.dry_run,
            report_interval: Duration::from_millis(config.report.interval_ms),
            overview_url,
            surface,
            session,
            limiter: Mutex::new(RateLimiter::per_minute(config.scrape.ppm_limit)),
            frontier: Mutex::new(Frontier::new()),
            state,
            pages_visited: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            reporter: Mutex::new(None),
        })
    }

    /// Installs the status reporter
    pub fn set_reporter(&self, reporter: StatusReporter) {
        *self.reporter.lock().unwrap() = Some(reporter);
    }

    /// Returns the current lifecycle state
    pub fn state(&self) -> ScrapeState {
        *self.state.borrow()
    }

    /// Runs the crawl until the frontier drains or a stop is observed
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The run reached `finished` or `canceled`
    /// * `Err(ScrapeError)` - Precondition or collaborator failure
    pub async fn start(&self) -> Result<()> {
        if !self.surface.is_active() {
            return Err(ScrapeError::NoSurface);
        }
        self.transition(ScrapeState::Running)?;
        tracing::info!(
            first_page = %self.first_page,
            roots = self.roots.len(),
            ppm_limit = self.ppm_limit,
            dry_run = self.dry_run,
            "starting crawl"
        );

        // Subscribe before the first navigation so no settle event is missed.
        let mut events = self.surface.subscribe();

        let crawl = async {
            let first = strip_fragment(&self.first_page);
            if strip_fragment(&self.surface.current_url()) != first {
                self.surface.load_url(&first).await?;
            }

            if !self.dry_run && !self.session.is_recording_active() {
                self.session.start_recording_session().await?;
            }

            self.advance_queue(&mut events).await
        };

        let outcome = match crawl.await {
            Ok(outcome) => outcome,
            Err(error) => {
                // Release stop() waiters before surfacing the failure.
                let _ = self.transition(ScrapeState::Canceled);
                self.report();
                if !self.dry_run {
                    let _ = self.session.finish_recording_session().await;
                }
                return Err(error);
            }
        };

        if !self.dry_run {
            self.session.finish_recording_session().await?;
        }

        if outcome == CycleOutcome::Finished {
            if let Some(overview) = &self.overview_url {
                tracing::info!(url = %overview, "navigating to overview");
                self.surface.load_url(overview).await?;
            }
        }

        Ok(())
    }

    /// Requests cancellation and waits until the run has fully stopped
    ///
    /// Cancellation is cooperative: an in-flight page load or evaluation is
    /// allowed to complete, and this resolves only once the cycle has
    /// observed the flag, transitioned to `canceled`, and reported.
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        tracing::info!("stop requested");

        let mut state = self.state.subscribe();
        if *state.borrow() != ScrapeState::Running {
            return;
        }
        while state.changed().await.is_ok() {
            if state.borrow().is_terminal() {
                return;
            }
        }
    }

    /// Builds an immutable snapshot of the run's progress
    pub fn current_status(&self) -> ScrapeStatus {
        ScrapeStatus {
            state: *self.state.borrow(),
            pages_visited: self.pages_visited.load(Ordering::SeqCst),
            pages_remaining: self.frontier.lock().unwrap().remaining(),
            ppm: self.limiter.lock().unwrap().average_rate() * 60.0,
            ppm_limit: self.ppm_limit,
            reported_at: Utc::now(),
        }
    }

    /// Emits the current status through the reporter
    pub fn report(&self) {
        let status = self.current_status();
        tracing::debug!(
            state = %status.state,
            visited = status.pages_visited,
            remaining = status.pages_remaining,
            ppm = status.ppm,
            "status"
        );
        let reporter = self.reporter.lock().unwrap().clone();
        if let Some(reporter) = reporter {
            reporter(self, status);
        }
    }

    /// One visit per iteration: settle, examine, discover, admit, navigate
    async fn advance_queue(
        &self,
        events: &mut broadcast::Receiver<SurfaceEvent>,
    ) -> Result<CycleOutcome> {
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return self.finish_canceled();
            }

            self.wait_for_settled(events).await;

            // Examine the settled page.
            self.pages_visited.fetch_add(1, Ordering::SeqCst);
            self.report();
            let current = strip_fragment(&self.surface.current_url());
            if in_scope(&current, &self.roots) {
                self.frontier.lock().unwrap().mark_seen(&current);
                let links = match self.extract_links(&current).await {
                    Ok(links) => links,
                    Err(error) => {
                        tracing::warn!(url = %current, %error, "link extraction failed, continuing with none");
                        Vec::new()
                    }
                };
                let mut frontier = self.frontier.lock().unwrap();
                for link in links {
                    if in_scope(&link, &self.roots) && frontier.offer_if_new(&link) {
                        tracing::debug!(url = %link, "discovered");
                    }
                }
            } else {
                // Reached via redirect outside scope: counted, not mined.
                tracing::debug!(url = %current, "settled outside every root, skipping link extraction");
            }

            // Load the next page.
            let next = self.frontier.lock().unwrap().take_next();
            let Some(next) = next else {
                self.transition(ScrapeState::Finished)?;
                self.report();
                tracing::info!(
                    visited = self.pages_visited.load(Ordering::SeqCst),
                    "frontier drained, crawl finished"
                );
                return Ok(CycleOutcome::Finished);
            };
            if self.stop_requested.load(Ordering::SeqCst) {
                return self.finish_canceled();
            }
            self.acquire_admission().await;
            tracing::debug!(url = %next, "navigating");
            self.surface.load_url(&next).await?;
        }
    }

    /// Observes the stop flag: transition, report, and release waiters
    fn finish_canceled(&self) -> Result<CycleOutcome> {
        self.transition(ScrapeState::Canceled)?;
        self.report();
        tracing::info!(
            visited = self.pages_visited.load(Ordering::SeqCst),
            "crawl canceled"
        );
        Ok(CycleOutcome::Canceled)
    }

    /// Waits until the current navigation settles, reporting periodically
    ///
    /// Returns immediately if the surface is already settled. The report
    /// ticker lives only for the duration of this wait.
    async fn wait_for_settled(&self, events: &mut broadcast::Receiver<SurfaceEvent>) {
        if !self.surface.is_loading() {
            return;
        }
        let mut ticker = tokio::time::interval(self.report_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval resolves immediately; consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    // A stale settle event from an earlier navigation can
                    // linger in the stream; trust the surface's live state.
                    Ok(SurfaceEvent::LoadStopped) if !self.surface.is_loading() => return,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "surface event stream lagged");
                        if !self.surface.is_loading() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = ticker.tick() => self.report(),
            }
        }
    }

    /// Evaluates the link-harvest query and resolves the results
    async fn extract_links(&self, base: &Url) -> Result<Vec<Url>> {
        let script = link_harvest_script(&self.link_selector);
        let value = self.surface.execute_javascript(&script).await?;
        let Value::Array(raw) = value else {
            tracing::warn!(url = %base, "link harvest returned a non-array value");
            return Ok(Vec::new());
        };

        let mut links = Vec::new();
        for item in raw {
            let Value::String(href) = item else { continue };
            match resolve_href(base, &href) {
                Ok(link) => links.push(link),
                Err(error) => {
                    tracing::trace!(href = %href, %error, "dropping unusable href");
                }
            }
        }
        Ok(links)
    }

    /// Acquires one token of admission from the rate limiter
    ///
    /// Wait for the projected availability, then re-verify the balance and
    /// take; if another consumer of the bucket won the race while we slept,
    /// wait again.
    async fn acquire_admission(&self) {
        loop {
            let wait = self.limiter.lock().unwrap().delay_for_tokens(1.0);
            if !wait.is_zero() {
                tracing::trace!(wait_ms = wait.as_millis() as u64, "waiting for admission");
                tokio::time::sleep(wait).await;
            }
            let mut limiter = self.limiter.lock().unwrap();
            if limiter.has_tokens(1.0) {
                limiter.take_tokens(1.0);
                return;
            }
        }
    }

    /// Applies a lifecycle transition, rejecting illegal ones
    fn transition(&self, to: ScrapeState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_modify(|state| {
            if state.can_transition_to(to) {
                *state = to;
            } else {
                result = Err(ScrapeError::InvalidTransition { from: *state, to });
            }
        });
        if result.is_ok() {
            tracing::debug!(state = %to, "scrape state");
        }
        result
    }
}

/// Builds the in-page link-harvest expression for a selector
///
/// Restricted to elements carrying a navigable attribute; an anchor's `href`
/// property reads back absolute, resolved against the document base.
fn link_harvest_script(selector: &str) -> String {
    let literal =
        serde_json::to_string(selector).unwrap_or_else(|_| "\"a[href]\"".to_string());
    format!(
        "Array.from(document.querySelectorAll({literal})).filter((el) => el.href).map((el) => el.href)"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OverviewConfig, ReportConfig, ScrapeConfig};
    use crate::recorder::LocalSession;
    use crate::surface::FixtureSurface;

    fn test_config(first_page: &str, roots: &[&str]) -> Config {
        Config {
            scrape: ScrapeConfig {
                first_page: first_page.to_string(),
                root_urls: roots.iter().map(|r| r.to_string()).collect(),
                link_selector: "a[href]".to_string(),
                ppm_limit: 6000.0,
                dry_run: false,
            },
            report: ReportConfig { interval_ms: 1000 },
            overview: OverviewConfig {
                all_pages_url: None,
            },
        }
    }

    fn runner_over(config: &Config, surface: &FixtureSurface) -> CrawlRunner {
        CrawlRunner::new(
            config,
            Arc::new(surface.clone()),
            Arc::new(LocalSession::new("web")),
        )
        .unwrap()
    }

    #[test]
    fn test_link_harvest_script_embeds_selector() {
        let script = link_harvest_script("a[href]");
        assert!(script.contains(r#"querySelectorAll("a[href]")"#));
        assert!(script.contains("filter((el) => el.href)"));
    }

    #[test]
    fn test_link_harvest_script_escapes_quotes() {
        let script = link_harvest_script(r#"a[data-kind="nav"]"#);
        assert!(script.contains(r#"querySelectorAll("a[data-kind=\"nav\"]")"#));
    }

    #[tokio::test]
    async fn test_start_without_surface_fails_cleanly() {
        let surface = FixtureSurface::new();
        surface.destroy();
        let config = test_config("https://example.com/a", &["https://example.com/"]);
        let runner = runner_over(&config, &surface);

        let result = runner.start().await;
        assert!(matches!(result, Err(ScrapeError::NoSurface)));
        // Precondition failures leave the run untouched.
        assert_eq!(runner.state(), ScrapeState::Initialized);
    }

    #[tokio::test]
    async fn test_runner_rejects_unparseable_first_page() {
        let surface = FixtureSurface::new();
        let mut config = test_config("https://example.com/a", &["https://example.com/"]);
        config.scrape.first_page = "not a url".to_string();

        let result = CrawlRunner::new(
            &config,
            Arc::new(surface.clone()),
            Arc::new(LocalSession::new("web")),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_report_invokes_reporter_with_snapshot() {
        let surface = FixtureSurface::new();
        let config = test_config("https://example.com/a", &["https://example.com/"]);
        let runner = runner_over(&config, &surface);

        let seen: Arc<Mutex<Vec<ScrapeStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        runner.set_reporter(Arc::new(move |_runner, status| {
            sink.lock().unwrap().push(status);
        }));

        runner.report();

        let reports = seen.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state, ScrapeState::Initialized);
        assert_eq!(reports[0].pages_visited, 0);
        assert_eq!(reports[0].ppm_limit, 6000.0);
    }

    #[tokio::test]
    async fn test_stop_before_start_returns_immediately() {
        let surface = FixtureSurface::new();
        let config = test_config("https://example.com/a", &["https://example.com/"]);
        let runner = runner_over(&config, &surface);

        // Nothing is running, so stop() must not hang.
        runner.stop().await;
        assert_eq!(runner.state(), ScrapeState::Initialized);
    }
}
