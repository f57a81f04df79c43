//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the fetch service and the full crawl cycle end-to-end.

use ripple_crawl::config::Config;
use ripple_crawl::crawler::{
    ColumnType, CrawlOutcome, Crawler, FetchOptions, Fetcher, HtmlExtractor, HttpFetcher,
    RetryConfig,
};
use ripple_crawl::output::{ResultSink, SqliteSink};
use ripple_crawl::sitemap::discover;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_options(retries: u32) -> FetchOptions {
    FetchOptions {
        user_agent: "TestBot/1.0".to_string(),
        timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_retries: retries,
            base_delay: Duration::from_millis(10),
        },
        max_redirects: 5,
        throttle_statuses: vec![429],
    }
}

/// Creates a fast test configuration
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.crawler.user_agent = "TestBot/1.0".to_string();
    config.crawler.crawl_delay = 0.0;
    config.crawler.timeout = 5;
    config.crawler.backoff_base = 0.1;
    config.crawler.backoff_cap = 1.0;
    config.fetch.max_retries = 0;
    config
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, page: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_sends_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("user-agent", "TestBot/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/", server.uri()), &create_test_options(0))
        .await;

    assert!(response.success);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, "hello");
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_fetch_follows_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;
    mount_page(&server, "/new", "<p>moved</p>").await;

    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/old", server.uri()), &create_test_options(0))
        .await;

    assert!(response.success);
    assert_eq!(response.redirect_count, 1);
    assert!(response.final_url.ends_with("/new"));
    assert!(response.is_html());
}

#[tokio::test]
async fn test_fetch_detects_redirect_loop_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/pong"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pong"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/ping"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/ping", server.uri()), &create_test_options(3))
        .await;

    assert!(!response.success);
    assert_eq!(response.status_code, 302);
    assert!(response.error.unwrap().contains("loop"));
}

#[tokio::test]
async fn test_fetch_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/missing", server.uri()), &create_test_options(3))
        .await;

    assert!(!response.success);
    assert_eq!(response.status_code, 404);
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_fetch_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/flaky", server.uri()), &create_test_options(2))
        .await;

    assert_eq!(response.status_code, 503);
    assert!(!response.success);
}

#[tokio::test]
async fn test_fetch_returns_throttle_statuses_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "1"))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = create_test_options(2);
    options.throttle_statuses = vec![429, 503];
    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/busy", server.uri()), &options)
        .await;

    assert_eq!(response.status_code, 503);
    assert_eq!(response.retry_after, Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_fetch_retry_waits_for_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/flaky", "<p>ok</p>").await;

    let fetcher = HttpFetcher::new().unwrap();
    let started = std::time::Instant::now();
    let response = fetcher
        .fetch(&format!("{}/flaky", server.uri()), &create_test_options(1))
        .await;

    assert!(response.success);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_fetch_reads_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow-down"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch(&format!("{}/slow-down", server.uri()), &create_test_options(2))
        .await;

    assert_eq!(response.status_code, 429);
    assert_eq!(response.retry_after, Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_fetch_connection_refused_is_transport_error() {
    let fetcher = HttpFetcher::new().unwrap();
    let response = fetcher
        .fetch("http://127.0.0.1:1/", &create_test_options(0))
        .await;

    assert!(response.is_transport_error());
    assert!(response.error.is_some());
}

#[tokio::test]
async fn test_crawl_respects_robots_and_extracts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        r#"<html><head><title>Home</title></head><body><h1>Welcome</h1></body></html>"#,
    )
    .await;
    mount_page(&server, "/about", "<html><head><title>About</title></head></html>").await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.extract.insert("title".into(), "title".into());
    let crawler = Crawler::with_http(config).unwrap();

    let base = server.uri();
    let mut results = crawler
        .start(vec![
            format!("{}/", base),
            format!("{}/private/secret", base),
            format!("{}/about", base),
        ])
        .collect_all()
        .await;
    results.sort_by(|a, b| a.url.cmp(&b.url));

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome == CrawlOutcome::Success));
    assert_eq!(results[0].fields["title"], "Home");
    assert_eq!(results[1].fields["title"], "About");
}

#[tokio::test]
async fn test_crawl_backs_off_on_throttling() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/busy", "<p>ok now</p>").await;

    let crawler = Crawler::with_http(create_test_config()).unwrap();
    let mut stream = crawler.start(vec![format!("{}/busy", server.uri())]);

    let result = stream.next().await.unwrap();
    assert!(stream.next().await.is_none());

    assert_eq!(result.outcome, CrawlOutcome::Success);
    assert_eq!(result.retry_count, 1);

    let domains = stream.registry().snapshot().await;
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].consecutive_429s, 0);
    assert_eq!(domains[0].urls_crawled, 1);
}

#[tokio::test]
async fn test_crawl_reports_http_errors_as_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let crawler = Crawler::with_http(create_test_config()).unwrap();
    let results = crawler
        .start(vec![
            format!("{}/gone", server.uri()),
            "javascript:alert(1)".to_string(),
        ])
        .collect_all()
        .await;

    assert_eq!(results.len(), 2);
    let gone = results.iter().find(|r| r.url.ends_with("/gone")).unwrap();
    assert_eq!(gone.outcome, CrawlOutcome::HttpError);
    assert_eq!(gone.status_code, 410);
    let invalid = results.iter().find(|r| r.url.starts_with("javascript")).unwrap();
    assert_eq!(invalid.outcome, CrawlOutcome::InvalidUrl);
}

#[tokio::test]
async fn test_sitemap_discovery_seeds_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("User-agent: *\nAllow: /\nSitemap: {}/sitemap.xml\n", base)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/one</loc></url>
  <url><loc>{base}/two</loc></url>
  <url><loc>{base}/one</loc></url>
</urlset>"#
        )))
        .mount(&server)
        .await;
    mount_page(&server, "/one", "<p>1</p>").await;
    mount_page(&server, "/two", "<p>2</p>").await;

    let crawler = Crawler::with_http(create_test_config()).unwrap();
    let discovery = discover(
        crawler.fetcher().as_ref(),
        &base,
        &crawler.fetch_options(),
        &crawler.config().crawler,
        10,
    )
    .await
    .unwrap();
    assert_eq!(discovery.urls.len(), 2);

    let registry = crawler.new_registry();
    registry
        .initialize_from_discovery(&discovery.domain, &discovery.state)
        .await;

    // robots.txt is not fetched again: the seeded domain already has its rules
    let results = crawler
        .start_with_registry(discovery.urls.clone(), registry)
        .collect_all()
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome.is_success()));
}

#[tokio::test]
async fn test_crawl_into_sqlite() {
    let server = MockServer::start().await;
    mount_page(&server, "/a", "<html><title>A</title></html>").await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut sink = SqliteSink::new(&dir.path().join("crawl.db"), 1).unwrap();

    let crawler = Crawler::with_http(create_test_config()).unwrap();
    let mut stream = crawler.start(vec![
        format!("{}/a", server.uri()),
        format!("{}/b", server.uri()),
    ]);
    while let Some(result) = stream.next().await {
        sink.write(&result).unwrap();
    }
    sink.finish().unwrap();

    let counts = sink.count_by_outcome().unwrap();
    assert_eq!(counts.get(&CrawlOutcome::Success), Some(&1));
    assert_eq!(counts.get(&CrawlOutcome::HttpError), Some(&1));
}

#[tokio::test]
async fn test_crawl_leaves_throttle_statuses_to_the_scheduler() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nCrawl-delay: 1\n").await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "1"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.crawler.throttle_status_codes = vec![429, 503];
    config.crawler.max_retries = 0;
    config.fetch.max_retries = 2;
    let crawler = Crawler::with_http(config).unwrap();

    let results = crawler
        .start(vec![format!("{}/busy", server.uri())])
        .collect_all()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, CrawlOutcome::RateLimited);
    assert_eq!(results[0].status_code, 503);
}

#[tokio::test]
async fn test_crawl_spaces_server_error_retries_by_crawl_delay() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nCrawl-delay: 1\n").await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/flaky", "<p>ok</p>").await;

    let mut config = create_test_config();
    config.fetch.max_retries = 1;
    config.fetch.retry_delay_ms = 10;
    let crawler = Crawler::with_http(config).unwrap();

    let started = std::time::Instant::now();
    let results = crawler
        .start(vec![format!("{}/flaky", server.uri())])
        .collect_all()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, CrawlOutcome::Success);
    // robots.txt, then the 502 one second later, then the retry one second after that
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_crawled_page_table_extraction() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/stats",
        r#"<html><body><table class="stats">
            <tr><th>City</th><th>Population</th><th>Area</th></tr>
            <tr><td>Springfield</td><td>30720</td><td>61.2</td></tr>
            <tr><td>Shelbyville</td><td>14500</td><td>40</td></tr>
        </table></body></html>"#,
    )
    .await;

    let crawler = Crawler::with_http(create_test_config()).unwrap();
    let results = crawler
        .start(vec![format!("{}/stats", server.uri())])
        .collect_all()
        .await;
    assert_eq!(results[0].outcome, CrawlOutcome::Success);

    let table = HtmlExtractor
        .extract_table(&results[0].body, "table.stats", 0)
        .unwrap();
    assert_eq!(table.headers, vec!["City", "Population", "Area"]);
    assert_eq!(
        table.column_types,
        vec![ColumnType::Varchar, ColumnType::Bigint, ColumnType::Double]
    );
    assert_eq!(table.records()[1]["Population"], serde_json::json!(14500));
}
