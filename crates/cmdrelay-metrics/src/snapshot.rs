// Copyright 2025 cmdrelay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Build and uptime information served on `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub version: String,
    pub uptime_seconds: u64,
}

impl ServerInfo {
    pub fn new(uptime_seconds: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
        }
    }
}

/// Per-command-name statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetrics {
    pub count: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_messages: u64,
    pub total_errors: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_commands: u64,
    pub commands_by_type: BTreeMap<String, CommandMetrics>,
    pub messages_per_second: f64,
    /// Mean over the most recent responses, in milliseconds
    pub avg_response_time: f64,
    pub uptime_seconds: u64,
}
