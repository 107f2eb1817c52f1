//! `HttpFetcher` against a local HTTP server: retry on 5xx, no retry on
//! 4xx, charset handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mall_ingest::domain::{RenderMode, SelectorSet, SiteProfile};
use mall_ingest::infrastructure::config::CrawlConfig;
use mall_ingest::infrastructure::{FetchError, HttpFetcher, PageFetcher, RetryPolicy, SiteLimiter};

#[derive(Clone)]
struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn html(status: u16, body: &str) -> Self {
        Self::bytes(status, "text/html; charset=utf-8", body.as_bytes().to_vec())
    }

    fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", content_type.to_string())],
            body,
        }
    }

    fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

/// Serves `replies` in order, one per connection; the last one repeats
async fn serve(replies: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let reply = replies[n.min(replies.len() - 1)].clone();

            let mut request = Vec::new();
            let mut buf = [0_u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => request.extend_from_slice(&buf[..read]),
                }
            }

            let mut head = format!("HTTP/1.1 {} Scripted\r\n", reply.status);
            for (name, value) in &reply.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", reply.body.len()));
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&reply.body).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), hits)
}

fn profile(base_url: &str, encoding: Option<&str>) -> SiteProfile {
    SiteProfile {
        id: "local".to_string(),
        display_name: "로컬몰".to_string(),
        region: "서울특별시".to_string(),
        base_url: base_url.to_string(),
        encoding: encoding.map(str::to_string),
        categories: Vec::new(),
        selectors: SelectorSet::default(),
        id_patterns: Vec::new(),
        pagination: Default::default(),
        request_delay_ms: 0,
        render: Default::default(),
        tags: Vec::new(),
        category_map: Vec::new(),
        keyword_rules: Vec::new(),
    }
}

fn fetcher() -> HttpFetcher {
    let config = CrawlConfig {
        direct_timeout_secs: 5,
        ..CrawlConfig::default()
    };
    HttpFetcher::new(&config, None).unwrap().with_retry_policy(RetryPolicy::new(
        3,
        Duration::from_millis(10),
        Duration::from_millis(40),
        Duration::from_millis(20),
    ))
}

async fn fetch(base: &str, profile: &SiteProfile) -> Result<mall_ingest::infrastructure::RawPage, FetchError> {
    let limiter = SiteLimiter::new(&profile.id, Duration::ZERO);
    fetcher()
        .fetch(&format!("{base}/list"), profile, &limiter, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let (base, hits) = serve(vec![
        Reply::html(503, "busy"),
        Reply::html(200, "<html><body>목록</body></html>"),
    ])
    .await;

    let page = fetch(&base, &profile(&base, None)).await.unwrap();

    assert_eq!(page.status, 200);
    assert!(page.body.contains("목록"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let (base, hits) = serve(vec![Reply::html(404, "gone")]).await;

    let err = fetch(&base, &profile(&base, None)).await.unwrap_err();

    assert!(matches!(err, FetchError::Terminal { status: Some(404), .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persistent_failure_exhausts_retries() {
    let (base, hits) = serve(vec![Reply::html(500, "broken")]).await;

    let err = fetch(&base, &profile(&base, None)).await.unwrap_err();

    assert!(matches!(err, FetchError::RetriesExhausted { attempts: 4, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_rate_limited_then_ok() {
    let (base, hits) = serve(vec![
        Reply::html(429, "slow down").header("Retry-After", "0"),
        Reply::html(200, "<p>ok</p>"),
    ])
    .await;

    let page = fetch(&base, &profile(&base, None)).await.unwrap();

    assert!(page.body.contains("ok"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_declared_euc_kr_is_decoded() {
    let (encoded, _, _) = encoding_rs::EUC_KR.encode("<p>성주 참외 19,900원</p>");
    let (base, _) = serve(vec![Reply::bytes(200, "text/html", encoded.into_owned())]).await;

    let page = fetch(&base, &profile(&base, Some("euc-kr"))).await.unwrap();

    assert!(page.body.contains("성주 참외"));
    assert!(!page.charset_fallback);
}

#[tokio::test]
async fn test_wrong_charset_declaration_falls_back() {
    let (base, _) = serve(vec![Reply::html(200, "<p>성주 참외</p>")]).await;

    let page = fetch(&base, &profile(&base, Some("euc-kr"))).await.unwrap();

    assert!(page.charset_fallback);
    assert!(page.body.contains("성주 참외"));
}

#[tokio::test]
async fn test_headless_profile_without_renderer() {
    let (base, hits) = serve(vec![Reply::html(200, "<p>ok</p>")]).await;
    let mut p = profile(&base, None);
    p.render.mode = RenderMode::Headless;

    let err = fetch(&base, &p).await.unwrap_err();

    assert!(matches!(err, FetchError::RendererUnavailable { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
