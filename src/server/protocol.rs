//! Wire types for the command protocol.

use serde::{Deserialize, Serialize};

/// Inbound request. Newline-agnostic JSON body, one per connection.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub handles: Vec<String>,
}

/// Response to a `scrape` action.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResponse {
    pub success: bool,
    pub filename: String,
    pub tweets_count: usize,
    pub keywords: Vec<String>,
    pub skipped_keywords: Vec<String>,
}

/// Response to `status` / `health`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: &'static str,
    pub browser_ready: bool,
    /// Seconds since the server started.
    pub uptime: f64,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }

    pub fn invalid_json() -> Self {
        Self::new("Invalid JSON request")
    }

    pub fn unknown_action() -> Self {
        Self::new("Unknown action")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tolerates_missing_lists() {
        let req: Request = serde_json::from_str(r#"{"action":"status"}"#).unwrap();
        assert_eq!(req.action, "status");
        assert!(req.keywords.is_empty());
        assert!(req.handles.is_empty());
    }

    #[test]
    fn scrape_request_parses() {
        let req: Request = serde_json::from_str(
            r#"{"action":"scrape","keywords":["alpha","beta"],"handles":["@someorg"]}"#,
        )
        .unwrap();
        assert_eq!(req.keywords, vec!["alpha", "beta"]);
        assert_eq!(req.handles, vec!["@someorg"]);
    }

    #[test]
    fn error_response_shape() {
        let json = serde_json::to_string(&ErrorResponse::invalid_json()).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"Invalid JSON request"}"#);
    }

    #[test]
    fn status_response_shape() {
        let status = StatusResponse {
            success: true,
            status: "running",
            browser_ready: false,
            uptime: 1.5,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&status).unwrap()).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["status"], "running");
        assert_eq!(value["browser_ready"], false);
    }
}
