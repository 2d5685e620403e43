//! Per-connection session state: negotiated protocol version, client
//! capabilities, logging level, client roots, and bounded histories of
//! sampling/elicitation exchanges.

use std::collections::VecDeque;

use mcp_types::ClientCapabilities;
use mcp_types::LoggingLevel;
use mcp_types::Root;
use serde::Serialize;

/// Bound on each exchange history; the oldest record falls off first.
const HISTORY_CAP: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ExchangeRecord {
    pub timestamp: String,
    pub params: serde_json::Value,
    pub result: serde_json::Value,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub initialized: bool,
    pub protocol_version: Option<String>,
    pub client_capabilities: Option<ClientCapabilities>,
    pub logging_level: LoggingLevel,
    pub client_roots: Vec<Root>,
    sampling_history: VecDeque<ExchangeRecord>,
    elicitation_history: VecDeque<ExchangeRecord>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            initialized: false,
            protocol_version: None,
            client_capabilities: None,
            logging_level: LoggingLevel::Info,
            client_roots: Vec::new(),
            sampling_history: VecDeque::new(),
            elicitation_history: VecDeque::new(),
        }
    }
}

impl SessionState {
    /// A re-initialize starts the session over.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn should_emit(&self, level: LoggingLevel) -> bool {
        level >= self.logging_level
    }

    pub fn record_sampling(&mut self, params: serde_json::Value, result: serde_json::Value) {
        push_bounded(&mut self.sampling_history, params, result);
    }

    pub fn record_elicitation(&mut self, params: serde_json::Value, result: serde_json::Value) {
        push_bounded(&mut self.elicitation_history, params, result);
    }

    pub fn sampling_history(&self) -> Vec<ExchangeRecord> {
        self.sampling_history.iter().cloned().collect()
    }

    pub fn elicitation_history(&self) -> Vec<ExchangeRecord> {
        self.elicitation_history.iter().cloned().collect()
    }
}

fn push_bounded(
    history: &mut VecDeque<ExchangeRecord>,
    params: serde_json::Value,
    result: serde_json::Value,
) {
    if history.len() == HISTORY_CAP {
        history.pop_front();
    }
    history.push_back(ExchangeRecord {
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        params,
        result,
    });
}
