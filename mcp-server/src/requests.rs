//! In-flight request registry: maps request ids and progress tokens to the
//! cancel handles of their running handlers.

use std::collections::HashMap;
use std::sync::Mutex;

use mcp_types::ProgressToken;
use mcp_types::RequestId;
use tokio_util::sync::CancellationToken;

// Ids and progress tokens share one key space; prefixes keep a request id
// "tok" from colliding with a progress token "tok".
fn id_key(id: &RequestId) -> String {
    format!("id:{id}")
}

fn token_key(token: &ProgressToken) -> String {
    format!("token:{token}")
}

struct Entry {
    cancel: CancellationToken,
    aliases: Vec<String>,
}

#[derive(Default)]
pub(crate) struct RequestRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl RequestRegistry {
    /// Admit a request: create its cancel handle and register it under the
    /// request id and, when present, the progress token.
    pub(crate) fn register(
        &self,
        request_id: &RequestId,
        progress_token: Option<&ProgressToken>,
    ) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut aliases = vec![id_key(request_id)];
        if let Some(token) = progress_token {
            aliases.push(token_key(token));
        }
        if let Ok(mut entries) = self.entries.lock() {
            for alias in &aliases {
                entries.insert(
                    alias.clone(),
                    Entry {
                        cancel: cancel.clone(),
                        aliases: aliases.clone(),
                    },
                );
            }
        }
        cancel
    }

    /// Fire the cancel handle for a `notifications/cancelled` key. Returns
    /// whether a live, not-yet-cancelled entry was found; a second
    /// cancellation for the same key is a no-op.
    pub(crate) fn cancel(
        &self,
        request_id: Option<&RequestId>,
        progress_token: Option<&ProgressToken>,
    ) -> bool {
        let Ok(entries) = self.entries.lock() else {
            return false;
        };
        let entry = request_id
            .and_then(|id| entries.get(&id_key(id)))
            .or_else(|| progress_token.and_then(|t| entries.get(&token_key(t))));
        match entry {
            Some(entry) if !entry.cancel.is_cancelled() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Handler teardown: drop every alias and cancel the handle so any
    /// leftover child work stops.
    pub(crate) fn complete(&self, request_id: &RequestId) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if let Some(entry) = entries.remove(&id_key(request_id)) {
            for alias in &entry.aliases {
                entries.remove(alias);
            }
            entry.cancel.cancel();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}
