//! Read-only access to a running broker's `/status` and `/history` views.

use anyhow::{Context, Result};
use cmdrelay_common::RoleCounts;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub clients: RoleCounts,
    pub pending_commands: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: String,
    pub command: String,
    pub from_client: String,
    pub to_client: String,
    pub status: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryView {
    pub history: Vec<HistoryRow>,
    pub total: usize,
    pub filtered: usize,
}

/// Filters forwarded to `/history`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub limit: Option<usize>,
    pub command: Option<String>,
    pub status: Option<String>,
}

impl HistoryFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(command) = &self.command {
            pairs.push(("command", command.clone()));
        }
        if let Some(status) = &self.status {
            pairs.push(("status", status.clone()));
        }
        pairs
    }
}

/// HTTP client for a broker's read-only endpoints.
pub struct Inspector {
    http: reqwest::Client,
    base_url: String,
}

impl Inspector {
    /// `base_url` is the broker's HTTP address, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        validate_url(&base_url, &["http://", "https://"], "broker address")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn status(&self) -> Result<StatusView> {
        self.get("/status", &[]).await
    }

    pub async fn history(&self, filter: &HistoryFilter) -> Result<HistoryView> {
        self.get("/history", &filter.query_pairs()).await
    }

    async fn get<T>(&self, path: &str, query: &[(&'static str, String)]) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .with_context(|| format!("Broker rejected GET {}", url))?;
        response
            .json()
            .await
            .with_context(|| format!("Unexpected body from {}", url))
    }
}

/// Checks that `url` starts with one of `schemes`.
pub fn validate_url(url: &str, schemes: &[&str], description: &str) -> Result<()> {
    if schemes.iter().any(|scheme| url.starts_with(scheme)) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with {}",
            description,
            url,
            schemes.join(" or ")
        ))
    }
}

/// Turns a broker WebSocket URL into the HTTP base of the same listener.
pub fn http_base(url: &str) -> String {
    let http = if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else {
        url.to_string()
    };
    let trimmed = http.trim_end_matches('/');
    trimmed.strip_suffix("/ws").unwrap_or(trimmed).to_string()
}

pub fn render_status(status: &StatusView) -> String {
    format!(
        "orchestrators: {}\nexecutors:     {}\ntotal:         {}\npending:       {}\nuptime:        {}s\n",
        status.clients.orchestrator,
        status.clients.executor,
        status.clients.total,
        status.pending_commands,
        status.uptime_seconds,
    )
}

pub fn render_history(view: &HistoryView) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<40} {:<20} {:<8} {:>9}",
        "ID", "COMMAND", "STATUS", "DURATION"
    );
    for row in &view.history {
        let duration = row
            .duration
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<40} {:<20} {:<8} {:>9}",
            row.id, row.command, row.status, duration
        );
    }
    let _ = writeln!(
        out,
        "{} shown, {} matching, {} retained",
        view.history.len(),
        view.filtered,
        view.total
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://127.0.0.1:8080", &["http://", "https://"], "x").is_ok());
        assert!(validate_url("ws://127.0.0.1:8080", &["ws://", "wss://"], "x").is_ok());
        let err = validate_url("127.0.0.1:8080", &["http://", "https://"], "broker address")
            .unwrap_err();
        assert!(err.to_string().contains("broker address"));
    }

    #[test]
    fn test_http_base() {
        assert_eq!(http_base("ws://127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(http_base("wss://relay.example"), "https://relay.example");
        assert_eq!(http_base("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(http_base("ws://127.0.0.1:8080/ws"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_inspector_rejects_bad_scheme() {
        assert!(Inspector::new("ws://127.0.0.1:8080").is_err());
        assert!(Inspector::new("http://127.0.0.1:8080/").is_ok());
    }

    #[test]
    fn test_query_pairs() {
        let filter = HistoryFilter {
            limit: Some(10),
            command: None,
            status: Some("timeout".into()),
        };
        assert_eq!(
            filter.query_pairs(),
            vec![("limit", "10".to_string()), ("status", "timeout".to_string())]
        );
        assert!(HistoryFilter::default().query_pairs().is_empty());
    }

    #[test]
    fn test_status_view_parses_broker_body() {
        let body = r#"{"clients":{"orchestrator":1,"executor":2,"total":3},
            "connections":3,"pendingCommands":4,"uptimeSeconds":12}"#;
        let status: StatusView = serde_json::from_str(body).unwrap();
        assert_eq!(status.clients.executor, 2);
        assert_eq!(status.pending_commands, 4);
        let text = render_status(&status);
        assert!(text.contains("executors:     2"));
        assert!(text.contains("uptime:        12s"));
    }

    #[test]
    fn test_render_history() {
        let body = r#"{"history":[{"id":"c1","command":"click","params":"{}",
            "fromClient":"o1","toClient":"broadcast","status":"success",
            "timestamp":1,"duration":42},
            {"id":"c2","command":"scroll","params":"{}","fromClient":"o1",
            "toClient":"e1","status":"pending","timestamp":2}],
            "total":5,"filtered":2}"#;
        let view: HistoryView = serde_json::from_str(body).unwrap();
        assert_eq!(view.history[1].duration, None);
        let text = render_history(&view);
        assert!(text.contains("42ms"));
        assert!(text.contains("2 shown, 2 matching, 5 retained"));
    }
}
