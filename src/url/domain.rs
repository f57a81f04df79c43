use url::Url;

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// The domain is the key every politeness rule (robots.txt, crawl delay, backoff)
/// is scoped by.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_crawl::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("https://sub.example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("sub.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Builds the robots.txt URL for the origin of `url`
///
/// The scheme and any explicit port are preserved, so a page on
/// `http://127.0.0.1:8080/x` maps to `http://127.0.0.1:8080/robots.txt`.
pub fn robots_url(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    let origin = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };
    Url::parse(&origin).ok()?.join("/robots.txt").ok()
}

/// Returns the path (and query, if any) that robots rules are matched against
pub fn request_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
