//! Command History
//!
//! A fixed-capacity ring of recent commands, newest at the back. Entries are
//! appended once when a command is routed and updated once when it resolves.

use cmdrelay_common::protocol::{now_millis, ClientId, CommandId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Longest params preview kept per entry, in characters.
pub const PARAMS_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: CommandId,
    pub command: String,
    /// Serialized params, truncated
    pub params: String,
    pub from_client: ClientId,
    /// Target executor id, or `"broadcast"`
    pub to_client: String,
    /// Executor whose response resolved the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder: Option<ClientId>,
    pub status: HistoryStatus,
    /// Unix epoch, ms
    pub timestamp: u64,
    /// Routing to resolution, ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl HistoryEntry {
    pub fn pending(
        id: CommandId,
        command: String,
        params: &Value,
        from_client: ClientId,
        to_client: Option<&ClientId>,
    ) -> Self {
        Self {
            id,
            command,
            params: preview(params),
            from_client,
            to_client: to_client
                .map(|c| c.to_string())
                .unwrap_or_else(|| "broadcast".to_string()),
            responder: None,
            status: HistoryStatus::Pending,
            timestamp: now_millis(),
            duration: None,
        }
    }
}

fn preview(params: &Value) -> String {
    let text = params.to_string();
    match text.char_indices().nth(PARAMS_PREVIEW_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Filters for `/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub command: Option<String>,
    pub status: Option<HistoryStatus>,
}

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    /// Newest first
    pub history: Vec<HistoryEntry>,
    /// Entries currently retained
    pub total: usize,
    /// Entries matching the filters, before `limit`
    pub filtered: usize,
}

#[derive(Debug)]
pub struct HistoryRecorder {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn record(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Marks the newest pending entry with `id` as resolved.
    ///
    /// Returns `false` if no pending entry exists, e.g. it was already
    /// evicted from the ring.
    pub fn resolve(
        &mut self,
        id: &str,
        status: HistoryStatus,
        duration: Duration,
        responder: Option<ClientId>,
    ) -> bool {
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.id == id && e.status == HistoryStatus::Pending);
        match entry {
            Some(entry) => {
                entry.status = status;
                entry.duration = Some(duration.as_millis() as u64);
                entry.responder = responder;
                true
            }
            None => false,
        }
    }

    pub fn query(&self, query: &HistoryQuery) -> HistoryPage {
        let matching: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| query.command.as_deref().map_or(true, |c| e.command == c))
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .collect();

        let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        HistoryPage {
            filtered: matching.len(),
            total: self.entries.len(),
            history: matching.into_iter().take(limit).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, command: &str) -> HistoryEntry {
        HistoryEntry::pending(
            id.to_string(),
            command.to_string(),
            &json!({}),
            ClientId::from("orch"),
            None,
        )
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut history = HistoryRecorder::new(3);
        for i in 0..5 {
            history.record(entry(&format!("c{}", i), "click"));
        }
        let page = history.query(&HistoryQuery::default());
        let ids: Vec<_> = page.history.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c4", "c3", "c2"]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_resolve_transitions_once() {
        let mut history = HistoryRecorder::new(10);
        history.record(entry("c2", "read"));

        assert!(history.resolve(
            "c2",
            HistoryStatus::Success,
            Duration::from_millis(42),
            Some(ClientId::from("exec"))
        ));
        assert!(!history.resolve("c2", HistoryStatus::Error, Duration::ZERO, None));

        let page = history.query(&HistoryQuery::default());
        assert_eq!(page.history[0].status, HistoryStatus::Success);
        assert_eq!(page.history[0].duration, Some(42));
    }

    #[test]
    fn test_query_filters_and_limit() {
        let mut history = HistoryRecorder::new(100);
        for i in 0..10 {
            let command = if i % 2 == 0 { "click" } else { "read" };
            history.record(entry(&format!("c{}", i), command));
        }
        history.resolve("c8", HistoryStatus::Error, Duration::ZERO, None);

        let clicks = history.query(&HistoryQuery {
            limit: Some(2),
            command: Some("click".into()),
            status: None,
        });
        assert_eq!(clicks.filtered, 5);
        assert_eq!(clicks.history.len(), 2);
        assert_eq!(clicks.history[0].id, "c8");

        let errors = history.query(&HistoryQuery {
            status: Some(HistoryStatus::Error),
            ..Default::default()
        });
        assert_eq!(errors.filtered, 1);
        assert_eq!(errors.total, 10);
    }

    #[test]
    fn test_params_preview_is_truncated_on_char_boundary() {
        let long = "é".repeat(PARAMS_PREVIEW_CHARS * 2);
        let e = HistoryEntry::pending(
            "c".into(),
            "type".into(),
            &json!({ "text": long }),
            ClientId::from("orch"),
            Some(&ClientId::from("exec")),
        );
        assert_eq!(e.params.chars().count(), PARAMS_PREVIEW_CHARS);
        assert_eq!(e.to_client, "exec");
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let value = serde_json::to_value(entry("c1", "click")).unwrap();
        assert_eq!(value["fromClient"], "orch");
        assert_eq!(value["toClient"], "broadcast");
        assert_eq!(value["status"], "pending");
        assert!(value.get("duration").is_none());
    }
}
