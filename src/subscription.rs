//! Subscription Index maintenance (spec §3, §4.6): keeps K/V set membership
//! in sync with enabled channel records and their per-resource config.

use serde_json::Value;
use std::collections::HashSet;

use crate::kv::KvStore;

/// Channel types whose config enumerates per-resource keys (e.g. `rss`
/// feed URLs). Declared here as the gateway's own capability registry
/// analogue of spec §4.8 — in a pluggable-handler design each handler would
/// declare this itself; the gateway core only needs to know which types
/// are per-resource to route index updates correctly.
pub fn is_per_resource(channel_type: &str) -> bool {
    channel_type == "rss"
}

fn broadcast_key(channel_type: &str) -> String {
    format!("channel:subscribers:{channel_type}")
}

fn resource_key(channel_type: &str, resource: &str) -> String {
    format!("{channel_type}:subscribers:{resource}")
}

/// Extract the per-resource keys enumerated by a channel's config, e.g.
/// `{ "feeds": [{ "url": "..." }, ...] }` for `rss`.
pub fn resource_keys(channel_type: &str, config: &Value) -> HashSet<String> {
    if !is_per_resource(channel_type) {
        return HashSet::new();
    }
    config
        .get("feeds")
        .and_then(Value::as_array)
        .map(|feeds| {
            feeds
                .iter()
                .filter_map(|feed| feed.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub struct SubscriptionIndex {
    kv: KvStore,
}

impl SubscriptionIndex {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Add `sub` as a member of the broadcast set for `channel_type`, and
    /// (for per-resource types) every resource key enumerated by `config`.
    pub async fn add(&self, sub: &str, channel_type: &str, config: &Value) -> anyhow::Result<()> {
        self.kv.sadd(&broadcast_key(channel_type), sub).await?;
        for resource in resource_keys(channel_type, config) {
            self.kv
                .sadd(&resource_key(channel_type, &resource), sub)
                .await?;
        }
        Ok(())
    }

    /// Mirror of `add`, using the config that was effective before deletion.
    pub async fn remove(&self, sub: &str, channel_type: &str, config: &Value) -> anyhow::Result<()> {
        self.kv.srem(&broadcast_key(channel_type), sub).await?;
        for resource in resource_keys(channel_type, config) {
            self.kv
                .srem(&resource_key(channel_type, &resource), sub)
                .await?;
        }
        Ok(())
    }

    /// Apply the set difference between a channel's old and new per-resource
    /// config: SREM removed keys, SADD added keys (spec §4.6 — cheaper than
    /// a blanket remove-then-add).
    pub async fn update_resources(
        &self,
        sub: &str,
        channel_type: &str,
        old_config: &Value,
        new_config: &Value,
    ) -> anyhow::Result<()> {
        let old_keys = resource_keys(channel_type, old_config);
        let new_keys = resource_keys(channel_type, new_config);

        for removed in old_keys.difference(&new_keys) {
            self.kv
                .srem(&resource_key(channel_type, removed), sub)
                .await?;
        }
        for added in new_keys.difference(&old_keys) {
            self.kv
                .sadd(&resource_key(channel_type, added), sub)
                .await?;
        }
        Ok(())
    }

    pub async fn broadcast_subscribers(&self, channel_type: &str) -> anyhow::Result<Vec<String>> {
        self.kv.smembers(&broadcast_key(channel_type)).await
    }

    pub async fn resource_subscribers(
        &self,
        channel_type: &str,
        resource: &str,
    ) -> anyhow::Result<Vec<String>> {
        self.kv.smembers(&resource_key(channel_type, resource)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_keys_extracts_feed_urls() {
        let config = serde_json::json!({
            "feeds": [{"url": "https://ex.com/a"}, {"url": "https://ex.com/b"}]
        });
        let keys = resource_keys("rss", &config);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("https://ex.com/a"));
    }

    #[test]
    fn non_resource_type_yields_no_keys() {
        let config = serde_json::json!({"feeds": [{"url": "x"}]});
        assert!(resource_keys("finance", &config).is_empty());
    }
}
