#![allow(clippy::unwrap_used)]
// Integration tests for `MediaClient` using wiremock.

use std::time::Duration;

use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use camfeed_api::{
    Credentials, Endpoints, Error, HlsEncoding, MediaClient, ProbeMethod, QualityTier,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, MediaClient) {
    setup_with(Credentials::None).await
}

async fn setup_with(credentials: Credentials) -> (MockServer, MediaClient) {
    let server = MockServer::start().await;
    let endpoints = Endpoints::new(Url::parse(&server.uri()).unwrap()).unwrap();
    let client = MediaClient::with_client(reqwest::Client::new(), endpoints, credentials);
    (server, client)
}

/// Serve one clip whose headers arrive at once and whose body trickles in
/// one byte every `gap`. wiremock can only delay the whole response.
async fn trickle_server(body: &'static [u8], gap: Duration) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0_u8; 1024];
        let _ = socket.read(&mut request).await.unwrap();

        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\ncontent-length: {}\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for byte in body {
            tokio::time::sleep(gap).await;
            socket.write_all(&[*byte]).await.unwrap();
            socket.flush().await.unwrap();
        }
    });

    Url::parse(&format!("http://{addr}/api/events/slow/clip.mp4")).unwrap()
}

// ── Probe tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_probe_head_reports_status_and_content_type() {
    let (server, client) = setup().await;

    Mock::given(method("HEAD"))
        .and(path("/api/go2rtc/api/stream.m3u8"))
        .and(query_param("src", "front"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/vnd.apple.mpegurl; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = client
        .endpoints()
        .hls("front", QualityTier::High, HlsEncoding::MpegTs);
    let resp = client.probe(&url, PROBE_TIMEOUT).await.unwrap();

    assert!(resp.is_success());
    assert_eq!(resp.method, ProbeMethod::Head);
    assert_eq!(
        resp.content_type.as_deref(),
        Some("application/vnd.apple.mpegurl")
    );
}

#[tokio::test]
async fn test_probe_falls_back_to_ranged_get_when_head_refused() {
    let (server, client) = setup().await;

    Mock::given(method("HEAD"))
        .and(path("/api/go2rtc/api/stream.mjpeg"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/go2rtc/api/stream.mjpeg"))
        .and(header("range", "bytes=0-0"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-type", "multipart/x-mixed-replace; boundary=frame"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = client.endpoints().mjpeg("front", QualityTier::High);
    let resp = client.probe(&url, PROBE_TIMEOUT).await.unwrap();

    assert_eq!(resp.status, 206);
    assert_eq!(resp.method, ProbeMethod::RangedGet);
    assert_eq!(
        resp.content_type.as_deref(),
        Some("multipart/x-mixed-replace")
    );
}

#[tokio::test]
async fn test_probe_returns_non_success_status_without_error() {
    let (server, client) = setup().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("ghost", QualityTier::High);
    let resp = client.probe(&url, PROBE_TIMEOUT).await.unwrap();

    assert_eq!(resp.status, 404);
    assert!(!resp.is_success());
}

#[tokio::test]
async fn test_probe_times_out() {
    let (server, client) = setup().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("slow", QualityTier::High);
    let result = client.probe(&url, Duration::from_millis(200)).await;

    assert!(
        matches!(result, Err(Error::Timeout { timeout_ms: 200 })),
        "expected Timeout error, got: {result:?}"
    );
    assert!(result.unwrap_err().is_unreachable());
}

#[tokio::test]
async fn test_probe_connection_refused_is_unreachable() {
    let endpoints = Endpoints::parse("http://127.0.0.1:9").unwrap();
    let client = MediaClient::with_client(reqwest::Client::new(), endpoints, Credentials::None);
    let url = client.endpoints().snapshot("front", QualityTier::High);

    let err = client.probe(&url, PROBE_TIMEOUT).await.unwrap_err();
    assert!(err.is_unreachable(), "expected unreachable, got: {err:?}");
}

// ── Still image tests ───────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_image_returns_bytes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/front/latest.jpg"))
        .and(query_param("h", "360"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JPEG, "image/jpeg"))
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("front", QualityTier::Low);
    let image = client.fetch_image(&url, PROBE_TIMEOUT).await.unwrap();

    assert_eq!(image.bytes.as_ref(), JPEG);
    assert_eq!(image.content_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn test_fetch_image_rejects_html_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("front", QualityTier::High);
    let result = client.fetch_image(&url, PROBE_TIMEOUT).await;

    assert!(
        matches!(result, Err(Error::InvalidResponse { .. })),
        "expected InvalidResponse, got: {result:?}"
    );
}

#[tokio::test]
async fn test_fetch_image_rejects_empty_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("front", QualityTier::High);
    let result = client.fetch_image(&url, PROBE_TIMEOUT).await;

    assert!(matches!(result, Err(Error::InvalidResponse { .. })));
}

#[tokio::test]
async fn test_fetch_image_maps_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("front", QualityTier::High);
    let result = client.fetch_image(&url, PROBE_TIMEOUT).await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_bearer_credentials_are_sent() {
    let (server, client) = setup_with(Credentials::Bearer {
        token: SecretString::from("tok-123".to_string()),
    })
    .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JPEG, "image/jpeg"))
        .expect(1)
        .mount(&server)
        .await;

    let url = client.endpoints().snapshot("front", QualityTier::High);
    client.fetch_image(&url, PROBE_TIMEOUT).await.unwrap();
}

// ── Clip download tests ─────────────────────────────────────────────

#[tokio::test]
async fn test_open_download_streams_body() {
    let (server, client) = setup().await;
    let body = vec![7_u8; 64 * 1024];

    Mock::given(method("GET"))
        .and(path("/api/events/evt-1/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "video/mp4"))
        .mount(&server)
        .await;

    let url = client.endpoints().clip("evt-1");
    let mut download = client.open_download(&url, PROBE_TIMEOUT).await.unwrap();
    assert_eq!(download.content_type(), Some("video/mp4"));
    assert_eq!(download.content_length(), Some(64 * 1024));

    let mut received = Vec::new();
    while let Some(chunk) = download.chunk().await.unwrap() {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, body);
}

#[tokio::test]
async fn test_open_download_rejects_json_error_page() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"success":false,"message":"Event not found"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let url = client.endpoints().clip("missing");
    let result = client.open_download(&url, PROBE_TIMEOUT).await;

    assert!(
        matches!(result, Err(Error::InvalidResponse { .. })),
        "expected InvalidResponse, got: {result:?}"
    );
}

#[tokio::test]
async fn test_open_download_maps_not_found() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = client.endpoints().clip("missing");
    let err = client.open_download(&url, PROBE_TIMEOUT).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_open_download_body_may_outlast_header_timeout() {
    let (_server, client) = setup().await;
    let url = trickle_server(b"slowmp", Duration::from_millis(300)).await;

    // Headers arrive well within the deadline; the body takes ~1.8s.
    let mut download = client
        .open_download(&url, Duration::from_secs(1))
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Some(chunk) = download.chunk().await.unwrap() {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"slowmp");
}
