//! Socket command interface.
//!
//! One request per connection: read a JSON body, dispatch, write exactly
//! one JSON response, close. A raw `GET /health` line is also recognized
//! and answered as minimal HTTP/1.1 carrying the same health body, so one
//! port serves both probe styles. Protocol errors never stop the accept
//! loop.

mod protocol;

pub use protocol::{ErrorResponse, Request, ScrapeResponse, StatusResponse};

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::scheduler::KeywordScheduler;
use crate::session::SessionManager;

/// Longest a client gets to deliver its request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Request bodies above this are answered as malformed.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Line-oriented JSON command server over TCP.
pub struct CommandServer {
    scheduler: Arc<KeywordScheduler>,
    session: Arc<SessionManager>,
    started: Instant,
}

impl CommandServer {
    pub fn new(scheduler: Arc<KeywordScheduler>, session: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            session,
            started: Instant::now(),
        })
    }

    /// Bind and serve forever.
    pub async fn run(self: Arc<Self>, bind: &str) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind command server to {}", bind))?;
        info!("Command server listening on {}", bind);
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener. Connections are handled
    /// on detached tasks; a slow scrape never blocks accepting.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            debug!("Connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let body = self.read_request(&mut stream).await;

        // Dual-protocol tolerance: sniff the first bytes for a raw HTTP
        // health probe before attempting JSON.
        let response = if body.starts_with(b"GET ") {
            let health = serde_json::to_string(&self.status_body())?;
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                health.len(),
                health
            )
        } else {
            let reply = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => self.dispatch(request).await,
                Err(_) => serde_json::to_value(ErrorResponse::invalid_json())?,
            };
            serde_json::to_string(&reply)?
        };

        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Read until the buffer parses as JSON, the client half-closes, the
    /// size cap is hit, or the read budget runs out. Whatever was
    /// collected is handed to the dispatcher; garbage turns into a
    /// structured error there.
    async fn read_request(&self, stream: &mut TcpStream) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        let deadline = Instant::now() + READ_TIMEOUT;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
            }

            if buffer.starts_with(b"GET ") && buffer.contains(&b'\n') {
                break;
            }
            if serde_json::from_slice::<serde_json::Value>(&buffer).is_ok() {
                break;
            }
            if buffer.len() > MAX_REQUEST_BYTES {
                break;
            }
        }

        buffer
    }

    async fn dispatch(&self, request: Request) -> serde_json::Value {
        info!("Received request: action={}", request.action);

        match request.action.as_str() {
            "scrape" => {
                let outcome = self
                    .scheduler
                    .submit(&request.keywords, &request.handles)
                    .await;
                serde_json::to_value(ScrapeResponse {
                    success: true,
                    filename: outcome.filenames.join(", "),
                    tweets_count: outcome.tweets_count,
                    keywords: outcome.accepted,
                    skipped_keywords: outcome.skipped,
                })
                .unwrap_or_default()
            }
            "status" | "health" => serde_json::to_value(self.status_body()).unwrap_or_default(),
            _ => serde_json::to_value(ErrorResponse::unknown_action()).unwrap_or_default(),
        }
    }

    fn status_body(&self) -> StatusResponse {
        StatusResponse {
            success: true,
            status: "running",
            browser_ready: self.session.is_ready(),
            uptime: self.started.elapsed().as_secs_f64(),
        }
    }
}
