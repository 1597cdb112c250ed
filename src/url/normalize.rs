use crate::UrlError;
use url::Url;

/// Returns the URL with its fragment removed
///
/// This is the only normalization the crawl applies: two URLs differing only
/// in fragment name the same document, so the fragment-stripped form is the
/// identity used by the frontier's visited set.
///
/// # Examples
///
/// ```
/// use ambry_scrape::url::strip_fragment;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/page#section").unwrap();
/// assert_eq!(strip_fragment(&url).as_str(), "https://example.com/page");
/// ```
pub fn strip_fragment(url: &Url) -> Url {
    if url.fragment().is_none() {
        return url.clone();
    }
    let mut stripped = url.clone();
    stripped.set_fragment(None);
    stripped
}

/// Resolves an extracted href against the document's base location
///
/// Relative hrefs resolve the way the page's own DOM would resolve them;
/// absolute hrefs pass through. The result is fragment-stripped. Non-web
/// schemes (`mailto:`, `javascript:`, …) are rejected so they never reach the
/// frontier.
///
/// # Arguments
///
/// * `base` - The settled document's URL
/// * `href` - The raw href value extracted from the page
///
/// # Returns
///
/// * `Ok(Url)` - Absolute, fragment-stripped link target
/// * `Err(UrlError)` - The href is malformed or out-of-scheme
pub fn resolve_href(base: &Url, href: &str) -> Result<Url, UrlError> {
    let resolved = Url::options()
        .base_url(Some(base))
        .parse(href)
        .map_err(|e| UrlError::Parse(format!("'{}': {}", href, e)))?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return Err(UrlError::InvalidScheme(resolved.scheme().to_string()));
    }

    Ok(strip_fragment(&resolved))
}
