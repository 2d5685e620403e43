//! Resource registry and per-URI subscription bookkeeping.
//!
//! Built-in static resources acknowledge subscribe without wiring. A
//! watchable resource gets one forwarder task per subscription that turns
//! its updates into `notifications/resources/*` frames until the watcher
//! channel closes, the subscription is cancelled, or the resource reports
//! itself removed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use mcp_types::ReadResourceResult;
use mcp_types::Resource;
use mcp_types::ResourceListChangedNotification;
use mcp_types::ResourceTemplate;
use mcp_types::ResourceUpdatedNotification;
use mcp_types::ResourceUpdatedNotificationParams;
use mcp_types::TextResourceContents;
use morfx_core::Config;
use morfx_core::MorfxErr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::outgoing_message::OutgoingMessageSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceUpdateKind {
    Updated,
    ListChanged,
    Removed,
}

#[derive(Debug, Clone)]
pub(crate) struct ResourceUpdate {
    pub uri: String,
    pub kind: ResourceUpdateKind,
}

/// A resource whose content can change while the connection is open.
pub(crate) trait WatchableResource: Send + Sync {
    fn resource(&self) -> Resource;
    fn read(&self) -> ReadResourceResult;
    fn watch(&self) -> mpsc::Receiver<ResourceUpdate>;
}

struct StaticResource {
    resource: Resource,
    text: String,
}

pub(crate) enum SubscribeOutcome {
    /// Static resource: acknowledged, nothing to wire.
    Acknowledged,
    /// Watcher started under this subscription id.
    Subscribed(String),
}

pub(crate) struct ResourceRegistry {
    statics: Vec<StaticResource>,
    watchables: HashMap<String, Arc<dyn WatchableResource>>,
    templates: Vec<ResourceTemplate>,
    subscriptions: Mutex<HashMap<String, HashMap<String, CancellationToken>>>,
    next_subscription: AtomicU64,
}

impl ResourceRegistry {
    /// The built-in resource set: server info and the active safety limits.
    pub(crate) fn builtin(config: &Config) -> Self {
        let mut registry = Self::empty();
        registry.add_static(
            Resource {
                uri: "morfx://server/info".to_string(),
                name: "server-info".to_string(),
                title: Some("Server information".to_string()),
                description: Some("Name, version and negotiated protocol".to_string()),
                mime_type: Some("application/json".to_string()),
            },
            serde_json::json!({
                "name": "morfx-mcp-server",
                "version": env!("CARGO_PKG_VERSION"),
                "protocolVersion": mcp_types::LATEST_PROTOCOL_VERSION,
            })
            .to_string(),
        );
        registry.add_static(
            Resource {
                uri: "morfx://config/limits".to_string(),
                name: "config-limits".to_string(),
                title: Some("Safety limits".to_string()),
                description: Some("Active size and confidence limits".to_string()),
                mime_type: Some("application/json".to_string()),
            },
            serde_json::json!({
                "maxFiles": config.safety.max_files,
                "maxFileSize": config.safety.max_file_size,
                "maxTotalSize": config.safety.max_total_size,
                "perFileThreshold": config.safety.per_file_threshold,
                "globalThreshold": config.safety.global_threshold,
                "autoApplyThreshold": config.staging.auto_apply_threshold,
                "stagingTtlSecs": config.staging.ttl.as_secs(),
            })
            .to_string(),
        );
        registry.templates.push(ResourceTemplate {
            uri_template: "morfx://stages/{stageId}".to_string(),
            name: "stage".to_string(),
            title: Some("Staged transformation".to_string()),
            description: Some("A pending transformation proposal by id".to_string()),
            mime_type: Some("application/json".to_string()),
        });
        registry
    }

    pub(crate) fn empty() -> Self {
        Self {
            statics: Vec::new(),
            watchables: HashMap::new(),
            templates: Vec::new(),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub(crate) fn add_static(&mut self, resource: Resource, text: String) {
        self.statics.push(StaticResource { resource, text });
    }

    pub(crate) fn add_watchable(&mut self, resource: Arc<dyn WatchableResource>) {
        self.watchables
            .insert(resource.resource().uri.clone(), resource);
    }

    pub(crate) fn list(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> =
            self.statics.iter().map(|s| s.resource.clone()).collect();
        resources.extend(self.watchables.values().map(|w| w.resource()));
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    pub(crate) fn templates(&self) -> Vec<ResourceTemplate> {
        self.templates.clone()
    }

    pub(crate) fn read(&self, uri: &str) -> Result<ReadResourceResult, MorfxErr> {
        if let Some(entry) = self.statics.iter().find(|s| s.resource.uri == uri) {
            return Ok(ReadResourceResult {
                contents: vec![TextResourceContents {
                    uri: uri.to_string(),
                    mime_type: entry.resource.mime_type.clone(),
                    text: entry.text.clone(),
                }],
            });
        }
        if let Some(watchable) = self.watchables.get(uri) {
            return Ok(watchable.read());
        }
        Err(MorfxErr::InvalidParams(format!("unknown resource: {uri}")))
    }

    pub(crate) fn subscribe(
        &self,
        uri: &str,
        outgoing: Arc<OutgoingMessageSender>,
    ) -> Result<SubscribeOutcome, MorfxErr> {
        if self.statics.iter().any(|s| s.resource.uri == uri) {
            return Ok(SubscribeOutcome::Acknowledged);
        }
        let Some(watchable) = self.watchables.get(uri) else {
            return Err(MorfxErr::InvalidParams(format!("unknown resource: {uri}")));
        };

        let subscription_id = format!(
            "sub_{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        let cancel = CancellationToken::new();
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.entry(uri.to_string())
                .or_default()
                .insert(subscription_id.clone(), cancel.clone());
        }

        let mut updates = watchable.watch();
        let uri_owned = uri.to_string();
        let sub_for_task = subscription_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => match update {
                        Some(ResourceUpdate { uri, kind }) => {
                            match kind {
                                ResourceUpdateKind::Updated => {
                                    outgoing
                                        .send_notification::<ResourceUpdatedNotification>(
                                            ResourceUpdatedNotificationParams { uri },
                                        )
                                        .await;
                                }
                                ResourceUpdateKind::ListChanged => {
                                    outgoing
                                        .send_notification::<ResourceListChangedNotification>(None)
                                        .await;
                                }
                                ResourceUpdateKind::Removed => {
                                    outgoing
                                        .send_notification::<ResourceListChangedNotification>(None)
                                        .await;
                                    break;
                                }
                            }
                        }
                        // Watcher closed its channel; tear the
                        // subscription down.
                        None => break,
                    }
                }
            }
            tracing::debug!("subscription {sub_for_task} for {uri_owned} ended");
        });

        Ok(SubscribeOutcome::Subscribed(subscription_id))
    }

    /// Cancel one subscription id, or every subscription for the URI.
    pub(crate) fn unsubscribe(&self, uri: &str, subscription_id: Option<&str>) -> usize {
        let Ok(mut subs) = self.subscriptions.lock() else {
            return 0;
        };
        let Some(for_uri) = subs.get_mut(uri) else {
            return 0;
        };
        let mut cancelled = 0;
        match subscription_id {
            Some(id) => {
                if let Some(token) = for_uri.remove(id) {
                    token.cancel();
                    cancelled = 1;
                }
            }
            None => {
                for (_, token) in for_uri.drain() {
                    token.cancel();
                    cancelled += 1;
                }
            }
        }
        if for_uri.is_empty() {
            subs.remove(uri);
        }
        cancelled
    }
}
