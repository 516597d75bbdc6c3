//! Thin typed surface over the shared K/V store (spec §4.2).
//!
//! Grounded on the `redis` / `AsyncCommands` idiom used for caching
//! elsewhere in the retrieved pack; generalised here to also cover the
//! pub/sub and set operations the routing layer and event hub need.

use futures::Stream;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::pin::Pin;

/// A `(channel, payload)` pair delivered by a pattern subscription.
pub struct Message {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Typed, clone-safe wrapper around a Redis connection manager.
///
/// `ConnectionManager` reconnects transparently and is safe to share across
/// tasks, so one `KvStore` is a process-wide singleton (spec §5).
#[derive(Clone)]
pub struct KvStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    /// Returns `Some(value)` iff a value existed and deserialised
    /// successfully; any error (missing key, bad JSON) silently yields
    /// `None` rather than propagating (spec §4.2).
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.ok()?;
        let raw = raw?;
        serde_json::from_str(&raw).ok()
    }

    /// Serialise and store with a mandatory TTL (spec §4.2: TTL prevents
    /// unbounded growth of per-resource caches).
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: std::time::Duration,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, raw, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    pub async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members = conn.smembers(key).await?;
        Ok(members)
    }

    /// Publish pre-serialised bytes exactly as given (spec §4.2).
    pub async fn publish(&self, channel: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, bytes).await?;
        Ok(())
    }

    /// Subscribe to a glob-style channel pattern, returning a cancellable
    /// stream of messages in arrival order.
    pub async fn psubscribe(
        &self,
        pattern: &str,
    ) -> anyhow::Result<Pin<Box<dyn Stream<Item = Message> + Send>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        let stream = async_stream::stream! {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = futures::StreamExt::next(&mut messages).await {
                let channel = msg.get_channel_name().to_string();
                let payload = msg.get_payload_bytes().to_vec();
                yield Message { channel, payload };
            }
        };

        Ok(Box::pin(stream))
    }

    /// Iterate keys matching a glob pattern (used by lifecycle cleanup
    /// sweeps; spec §4.2).
    pub async fn scan(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = futures::StreamExt::next(&mut iter).await {
            keys.push(key);
        }
        Ok(keys)
    }
}
