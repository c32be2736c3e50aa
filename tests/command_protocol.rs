//! End-to-end command protocol tests over real TCP.
//!
//! The server runs against a never-launched browser session: status works,
//! scrape requests exercise the allow-list gate, and nothing here needs a
//! real Chrome.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tweetharvest::extract::{DedupIndex, EngineConfig};
use tweetharvest::scheduler::{KeywordScheduler, SchedulerConfig};
use tweetharvest::server::CommandServer;
use tweetharvest::session::{SessionConfig, SessionManager};

async fn start_server(
    keywords_file: Option<PathBuf>,
    output_dir: PathBuf,
) -> (SocketAddr, Arc<KeywordScheduler>) {
    let session = Arc::new(SessionManager::new(SessionConfig::default()));
    let dedup = Arc::new(DedupIndex::new());
    let scheduler = Arc::new(KeywordScheduler::new(
        Arc::clone(&session),
        dedup,
        SchedulerConfig {
            output_dir,
            keywords_file,
            scrape_interval: Duration::from_secs(300),
            engine: EngineConfig {
                settle: Duration::ZERO,
                ..EngineConfig::default()
            },
        },
    ));

    let server = CommandServer::new(Arc::clone(&scheduler), session);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));

    (addr, scheduler)
}

async fn roundtrip(addr: SocketAddr, body: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(body).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn status_roundtrip_is_valid_json() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _scheduler) = start_server(None, dir.path().to_path_buf()).await;

    let response = roundtrip(addr, br#"{"action":"status"}"#).await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "running");
    assert_eq!(body["browser_ready"], false);
    assert!(body["uptime"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn health_is_an_alias_for_status() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _scheduler) = start_server(None, dir.path().to_path_buf()).await;

    let response = roundtrip(addr, br#"{"action":"health"}"#).await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn malformed_request_gets_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _scheduler) = start_server(None, dir.path().to_path_buf()).await;

    let response = roundtrip(addr, b"not json").await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid JSON request");

    // The server survives the bad request
    let response = roundtrip(addr, br#"{"action":"status"}"#).await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn unknown_action_gets_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _scheduler) = start_server(None, dir.path().to_path_buf()).await;

    let response = roundtrip(addr, br#"{"action":"selfdestruct"}"#).await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unknown action");
}

#[tokio::test]
async fn raw_http_health_probe_is_answered() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _scheduler) = start_server(None, dir.path().to_path_buf()).await;

    let response = roundtrip(addr, b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Type: application/json"));

    let body = text.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "running");
}

#[tokio::test]
async fn scrape_request_is_gated_by_the_allow_list_file() {
    let dir = tempfile::tempdir().unwrap();
    let keywords_path = dir.path().join("scraper_keywords.txt");
    std::fs::write(&keywords_path, "# active keywords\nalpha\nbeta\n").unwrap();

    let (addr, scheduler) =
        start_server(Some(keywords_path), dir.path().to_path_buf()).await;

    let response = roundtrip(
        addr,
        br#"{"action":"scrape","keywords":["alpha","gamma"],"handles":[]}"#,
    )
    .await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["keywords"], serde_json::json!(["alpha"]));
    assert_eq!(body["skipped_keywords"], serde_json::json!(["gamma"]));
    // No live browser, so the first cycle produced nothing
    assert_eq!(body["tweets_count"], 0);
    assert!(body["filename"]
        .as_str()
        .unwrap()
        .contains("tweets_output_alpha.md"));

    scheduler.shutdown().await;
}

#[tokio::test]
async fn scrape_with_no_allow_list_accepts_all_keywords() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, scheduler) = start_server(None, dir.path().to_path_buf()).await;

    let response = roundtrip(
        addr,
        br#"{"action":"scrape","keywords":["alpha","gamma"]}"#,
    )
    .await;
    let body: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["keywords"], serde_json::json!(["alpha", "gamma"]));
    assert_eq!(body["skipped_keywords"], serde_json::json!([]));

    scheduler.shutdown().await;
}
