//! Webhook Dispatcher: authenticated CDC ingress (spec §4.5).
//!
//! Grounded on the teacher's always-200 Postmark webhook
//! (`domains/newsletter/webhook.rs`): processing failures are logged and
//! swallowed rather than surfaced, because a non-2xx response would cause
//! the producer to redeliver and amplify the problem.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;

use crate::app::AppState;
use crate::envelope::{parse_payload, CdcRecord, Envelope};
use crate::error::AppError;
use crate::routing::{recipients, strategy_for_table};

fn authorized(headers: &HeaderMap, shared_secret: &str) -> bool {
    let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(token) = auth.strip_prefix("Bearer ") else {
        return false;
    };
    // Constant-time-ish equality isn't required by spec (bearer-equality
    // baseline, §9 open question), but cheap to do right.
    token.len() == shared_secret.len() && token == shared_secret
}

/// POST /webhooks/sequin
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if !authorized(&headers, &state.config.webhook_shared_secret) {
        return Err(AppError::Unauthorized);
    }

    let records = parse_payload(&body)?;

    for record in records {
        dispatch_record(&state, record).await;
    }

    Ok(StatusCode::OK)
}

async fn dispatch_record(state: &AppState, record: CdcRecord) {
    let table = record.metadata.table_name.clone();

    let Some(strategy) = strategy_for_table(&table) else {
        tracing::debug!(table = %table, "no handler claims this table, dropping");
        return;
    };

    let recipients = match recipients(&record, &strategy, &state.subscription_index, &state.db).await
    {
        Ok(recipients) => recipients,
        Err(err) => {
            tracing::warn!(table = %table, error = %err, "routing lookup failed, dropping record");
            return;
        }
    };

    if recipients.is_empty() {
        return;
    }

    let envelope = Envelope::wrap(record);
    let bytes = match envelope.to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(table = %table, error = %err, "failed to serialise envelope");
            return;
        }
    };

    publish_to_all(&state.hub, &recipients, &bytes).await;
}

async fn publish_to_all(hub: &Arc<crate::hub::Hub>, recipients: &[String], bytes: &[u8]) {
    for sub in recipients {
        if let Err(err) = hub.publish_for_user(sub, bytes).await {
            tracing::warn!(sub = %sub, error = %err, "bus publish failed, dropping for recipient");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!authorized(&headers, "secret"));
    }

    #[test]
    fn rejects_mismatched_secret() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert!(!authorized(&headers, "secret"));
    }

    #[test]
    fn accepts_matching_secret() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(authorized(&headers, "secret"));
    }
}
