//! Event Hub: in-process registry of live streaming sessions, fed by the
//! shared K/V bus so any replica can deliver to any session (spec §4.3, §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::kv::KvStore;

/// Bounded outbound buffer per session; lossy on full, never blocking.
pub const SESSION_BUFFER_SIZE: usize = 100;

const USER_CHANNEL_PREFIX: &str = "events:user:";
const USER_CHANNEL_PATTERN: &str = "events:user:*";

/// A single live streaming connection belonging to one user.
pub struct Session {
    id: u64,
    sub: String,
    rx: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    hub: Arc<Hub>,
}

impl Session {
    /// Receive the next frame, or `None` once the hub has closed the buffer.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hub.unregister(self.sub.clone(), self.id);
    }
}

struct RegisteredSession {
    id: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

/// In-process fan-out hub. Process-wide singleton (spec §5).
pub struct Hub {
    sessions: Mutex<HashMap<String, Vec<RegisteredSession>>>,
    next_id: Mutex<u64>,
    kv: KvStore,
}

impl Hub {
    pub fn new(kv: KvStore) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
            kv,
        })
    }

    /// Register a new session for `sub`, with a fixed-size lossy buffer.
    pub fn register(self: &Arc<Self>, sub: String) -> Arc<Session> {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        let id = {
            let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next_id += 1;
            *next_id
        };

        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(sub.clone())
            .or_default()
            .push(RegisteredSession { id, tx });

        Arc::new(Session {
            id,
            sub,
            rx: AsyncMutex::new(rx),
            hub: self.clone(),
        })
    }

    fn unregister(&self, sub: String, id: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = sessions.get_mut(&sub) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                sessions.remove(&sub);
            }
        }
    }

    /// Total live sessions across all users (spec §4.4, the `/events/count`
    /// collaborator endpoint).
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|v| v.len())
            .sum()
    }

    /// Publish through the shared bus rather than into local sessions
    /// directly — the pattern subscriber below is the only thing that ever
    /// writes to a local session, so a publish from any replica reaches
    /// every replica holding a session for that user (spec §4.3, §9).
    pub async fn publish_for_user(&self, sub: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let channel = format!("{USER_CHANNEL_PREFIX}{sub}");
        self.kv.publish(&channel, bytes).await
    }

    /// Start the background pattern-subscriber task. Must be called once at
    /// startup; the returned task runs until the K/V pattern subscription
    /// errors out or is dropped.
    pub fn spawn_bus_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match hub.kv.psubscribe(USER_CHANNEL_PATTERN).await {
                    Ok(mut stream) => {
                        use futures::StreamExt;
                        while let Some(message) = stream.next().await {
                            hub.fan_out(&message.channel, message.payload);
                        }
                        tracing::warn!("bus pattern subscription ended, reconnecting");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to open bus pattern subscription");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        })
    }

    /// Deliver one bus message to every local session for the user named in
    /// the channel. Never holds the session-map mutex across I/O: `try_send`
    /// is synchronous, so the mutex guard's scope ends before any await.
    fn fan_out(&self, channel: &str, payload: Vec<u8>) {
        let Some(sub) = channel.strip_prefix(USER_CHANNEL_PREFIX) else {
            return;
        };
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = sessions.get(sub) {
            for session in list {
                // Non-blocking: a full buffer drops the message for that
                // session only, never stalling the subscriber or other
                // sessions (spec §4.3, §5).
                let _ = session.tx.try_send(payload.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_for(sub: &str) -> String {
        format!("{USER_CHANNEL_PREFIX}{sub}")
    }

    #[test]
    fn fan_out_parses_sub_from_channel_name() {
        let channel = channel_for("user-123");
        assert_eq!(channel.strip_prefix(USER_CHANNEL_PREFIX), Some("user-123"));
    }
}
