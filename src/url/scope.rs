use url::Url;

/// Checks whether a URL falls under any configured root prefix
///
/// Scope is plain string-prefix matching on the URL's serialized form, so a
/// root of `https://example.com/docs` covers `https://example.com/docs/guide`
/// but not `https://example.com/blog`. Pages reached outside every root (for
/// example via redirect) are still visited but never mined for links.
///
/// # Examples
///
/// ```
/// use ambry_scrape::url::in_scope;
/// use url::Url;
///
/// let roots = vec![Url::parse("https://example.com/").unwrap()];
/// let page = Url::parse("https://example.com/a").unwrap();
/// let external = Url::parse("https://elsewhere.org/").unwrap();
///
/// assert!(in_scope(&page, &roots));
/// assert!(!in_scope(&external, &roots));
/// ```
pub fn in_scope(url: &Url, roots: &[Url]) -> bool {
    let candidate = url.as_str();
    roots.iter().any(|root| candidate.starts_with(root.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn roots(urls: &[&str]) -> Vec<Url> {
        urls.iter().map(|u| url(u)).collect()
    }

    #[test]
    fn test_in_scope_exact_root() {
        let roots = roots(&["https://example.com/"]);
        assert!(in_scope(&url("https://example.com/"), &roots));
    }

    #[test]
    fn test_in_scope_under_root() {
        let roots = roots(&["https://example.com/"]);
        assert!(in_scope(&url("https://example.com/deep/page"), &roots));
    }

    #[test]
    fn test_out_of_scope_other_host() {
        let roots = roots(&["https://example.com/"]);
        assert!(!in_scope(&url("https://other.org/"), &roots));
    }

    #[test]
    fn test_path_prefix_scoping() {
        let roots = roots(&["https://example.com/docs"]);
        assert!(in_scope(&url("https://example.com/docs/guide"), &roots));
        assert!(!in_scope(&url("https://example.com/blog"), &roots));
    }

    #[test]
    fn test_multiple_roots() {
        let roots = roots(&["https://a.example.com/", "https://b.example.com/"]);
        assert!(in_scope(&url("https://b.example.com/x"), &roots));
        assert!(!in_scope(&url("https://c.example.com/x"), &roots));
    }

    #[test]
    fn test_scheme_mismatch_is_out_of_scope() {
        let roots = roots(&["https://example.com/"]);
        assert!(!in_scope(&url("http://example.com/"), &roots));
    }

    #[test]
    fn test_no_roots_matches_nothing() {
        assert!(!in_scope(&url("https://example.com/"), &[]));
    }
}
