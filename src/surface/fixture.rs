//! Offline browsing surface backed by static HTML pages
//!
//! `FixtureSurface` lets operators rehearse a scope configuration (and the
//! test suite drive the whole engine) without a real content view. It serves
//! full-document navigations from an in-memory page set with a configurable
//! settle delay, answers the crawler's link-harvest DOM query against the
//! current page with `scraper`, and emulates the page-side bridge counterpart
//! with a scripted queue of outbound requests.

use crate::surface::{BrowsingSurface, SurfaceError, SurfaceEvent};
use crate::url::strip_fragment;
use crate::BoxFuture;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

/// A single page served by the fixture
#[derive(Debug, Clone)]
pub struct FixturePage {
    pub title: String,
    pub html: String,
}

#[derive(Debug, Clone)]
struct CurrentDoc {
    url: Url,
    title: String,
}

struct Inner {
    pages: Mutex<HashMap<String, FixturePage>>,
    current: Mutex<CurrentDoc>,
    loading: AtomicBool,
    active: AtomicBool,
    load_delay: Mutex<Duration>,
    events: broadcast::Sender<SurfaceEvent>,
    nav_log: Mutex<Vec<Url>>,
    bridge_outbox: Mutex<VecDeque<Value>>,
    bridge_replies: Mutex<Vec<Value>>,
}

/// In-process browsing surface over a static page set
#[derive(Clone)]
pub struct FixtureSurface {
    inner: Arc<Inner>,
}

impl FixtureSurface {
    /// Creates an empty fixture surface, settled on `about:blank`
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                pages: Mutex::new(HashMap::new()),
                current: Mutex::new(CurrentDoc {
                    url: Url::parse("about:blank").expect("static URL"),
                    title: String::new(),
                }),
                loading: AtomicBool::new(false),
                active: AtomicBool::new(true),
                load_delay: Mutex::new(Duration::ZERO),
                events,
                nav_log: Mutex::new(Vec::new()),
                bridge_outbox: Mutex::new(VecDeque::new()),
                bridge_replies: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Builds a fixture from a directory of HTML files
    ///
    /// Each `*.html` file maps to `origin` joined with its path relative to
    /// `dir`; an `index.html` additionally serves its directory URL.
    pub fn from_directory(dir: &Path, origin: &Url) -> crate::Result<Self> {
        let surface = Self::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in std::fs::read_dir(&current)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("html") {
                    continue;
                }
                let rel = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let html = std::fs::read_to_string(&path)?;
                let page_url = origin.join(&rel)?;
                surface.insert_page(page_url.as_str(), &html);
                if let Some(dir_rel) = rel.strip_suffix("index.html") {
                    surface.insert_page(origin.join(dir_rel)?.as_str(), &html);
                }
            }
        }
        Ok(surface)
    }

    /// Registers a page under the given URL
    pub fn insert_page(&self, url: &str, html: &str) {
        let title = extract_title(html);
        self.inner.pages.lock().unwrap().insert(
            url.to_string(),
            FixturePage {
                title,
                html: html.to_string(),
            },
        );
    }

    /// Sets the delay between a navigation starting and settling
    pub fn set_load_delay(&self, delay: Duration) {
        *self.inner.load_delay.lock().unwrap() = delay;
    }

    /// Marks the surface destroyed
    pub fn destroy(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
    }

    /// Places the surface on a page without emitting any events
    pub fn jump_to(&self, url: &Url) {
        let url = strip_fragment(url);
        let title = self
            .inner
            .pages
            .lock()
            .unwrap()
            .get(url.as_str())
            .map(|p| p.title.clone())
            .unwrap_or_default();
        *self.inner.current.lock().unwrap() = CurrentDoc { url, title };
        self.inner.loading.store(false, Ordering::SeqCst);
    }

    /// Emulates a same-document navigation on the current page
    pub fn emulate_in_page_navigation(&self, url: &Url, main_frame: bool) {
        if main_frame {
            self.inner.current.lock().unwrap().url = url.clone();
        }
        let _ = self.inner.events.send(SurfaceEvent::InPageNavigated {
            url: url.clone(),
            main_frame,
        });
    }

    /// Emulates a script-driven title change on the current page
    pub fn emulate_title_change(&self, title: &str) {
        self.inner.current.lock().unwrap().title = title.to_string();
        let _ = self.inner.events.send(SurfaceEvent::TitleChanged {
            title: title.to_string(),
        });
    }

    /// Queues an outbound request the page-side bridge will hand to the host
    pub fn queue_bridge_request(&self, request: Value) {
        self.inner.bridge_outbox.lock().unwrap().push_back(request);
    }

    /// Returns the replies the host delivered through the bridge, in order
    pub fn bridge_replies(&self) -> Vec<Value> {
        self.inner.bridge_replies.lock().unwrap().clone()
    }

    /// Returns every URL `load_url` was asked to navigate to, in order
    pub fn nav_log(&self) -> Vec<Url> {
        self.inner.nav_log.lock().unwrap().clone()
    }

    fn advance_bridge(&self, reply: Option<Value>) -> Value {
        if let Some(reply) = reply {
            self.inner.bridge_replies.lock().unwrap().push(reply);
        }
        self.inner
            .bridge_outbox
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Value::Null)
    }

    fn harvest_links(&self, selector: &str) -> Value {
        let (html, base) = {
            let current = self.inner.current.lock().unwrap();
            let pages = self.inner.pages.lock().unwrap();
            match pages.get(current.url.as_str()) {
                Some(page) => (page.html.clone(), current.url.clone()),
                None => return Value::Array(Vec::new()),
            }
        };
        let Ok(parsed) = Selector::parse(selector) else {
            return Value::Array(Vec::new());
        };
        let document = Html::parse_document(&html);
        let hrefs = document
            .select(&parsed)
            .filter_map(|el| el.value().attr("href"))
            // An anchor's `href` property reads back as an absolute URL.
            .filter_map(|href| base.join(href).ok())
            .map(|abs| Value::String(abs.to_string()))
            .collect();
        Value::Array(hrefs)
    }
}

impl Default for FixtureSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowsingSurface for FixtureSurface {
    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn current_url(&self) -> Url {
        self.inner.current.lock().unwrap().url.clone()
    }

    fn page_title(&self) -> String {
        self.inner.current.lock().unwrap().title.clone()
    }

    fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    fn load_url(&self, url: &Url) -> BoxFuture<'_, Result<(), SurfaceError>> {
        let inner = Arc::clone(&self.inner);
        let url = strip_fragment(url);
        Box::pin(async move {
            if !inner.active.load(Ordering::SeqCst) {
                return Err(SurfaceError::Gone);
            }
            inner.nav_log.lock().unwrap().push(url.clone());
            inner.loading.store(true, Ordering::SeqCst);
            let _ = inner.events.send(SurfaceEvent::LoadStarted);

            let delay = *inner.load_delay.lock().unwrap();
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let (status_code, title) = {
                    let pages = inner.pages.lock().unwrap();
                    match pages.get(url.as_str()) {
                        Some(page) => (200, page.title.clone()),
                        None => (404, "Not Found".to_string()),
                    }
                };
                *inner.current.lock().unwrap() = CurrentDoc {
                    url: url.clone(),
                    title: title.clone(),
                };
                let _ = inner.events.send(SurfaceEvent::Navigated {
                    url: url.clone(),
                    status_code,
                });
                let _ = inner.events.send(SurfaceEvent::TitleChanged { title });
                inner.loading.store(false, Ordering::SeqCst);
                let _ = inner.events.send(SurfaceEvent::LoadStopped);
            });
            Ok(())
        })
    }

    fn execute_javascript(&self, script: &str) -> BoxFuture<'_, Result<Value, SurfaceError>> {
        let surface = self.clone();
        let script = script.to_string();
        Box::pin(async move {
            if !surface.inner.active.load(Ordering::SeqCst) {
                return Err(SurfaceError::Gone);
            }
            if let Some(reply) = parse_advance_payload(&script) {
                let next = surface.advance_bridge(reply);
                return Ok(next);
            }
            if let Some(selector) = parse_query_selector(&script) {
                return Ok(surface.harvest_links(&selector));
            }
            Ok(Value::Null)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.inner.events.subscribe()
    }
}

/// Pulls the `<title>` text out of a fixture page
fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").expect("static selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Recognizes the bridge's advance call and extracts its reply payload
///
/// Returns `Some(None)` for an opening `advance(null)` poll, `Some(Some(v))`
/// for a response-carrying call, `None` for unrelated scripts.
fn parse_advance_payload(script: &str) -> Option<Option<Value>> {
    let start = script.find(".advance(")? + ".advance(".len();
    let end = script.rfind(") : null")?;
    let payload: Value = serde_json::from_str(&script[start..end]).ok()?;
    if payload.is_null() {
        Some(None)
    } else {
        Some(Some(payload))
    }
}

/// Recognizes the link-harvest query and extracts its selector literal
fn parse_query_selector(script: &str) -> Option<String> {
    let start = script.find("querySelectorAll(")? + "querySelectorAll(".len();
    let rest = &script[start..];
    let end = rest.find(')')?;
    serde_json::from_str(&rest[..end]).ok()
}
