//! Streaming Endpoint: long-lived framed-message stream, authenticated per
//! connection (spec §4.4, §6).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::server_auth::authenticate_stream;

const RETRY_MS: u64 = 3000;
const HEARTBEAT_SECS: u64 = 15;

#[derive(Deserialize)]
pub struct StreamQuery {
    token: Option<String>,
}

/// GET /events?token=<jwt>
///
/// Auth: reads the bearer credential from `?token=`, falling back to the
/// `Authorization` header for clients that can set one (spec §4.4).
/// Unauthorised access returns before any streaming bytes are written.
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let sub = authenticate_stream(&state.token_validator, query.token.as_deref(), &headers)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let session = state.hub.register(sub);

    let retry = stream::once(async move {
        Ok(Event::default().retry(Duration::from_millis(RETRY_MS)))
    });

    let heartbeats = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        Duration::from_secs(HEARTBEAT_SECS),
    ))
    .map(|_| Ok(Event::default().comment("ping")));

    let data = stream::unfold(session, |session| async move {
        let bytes = session.recv().await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Some((Ok(Event::default().data(text)), session))
    });

    // Heartbeats and data frames interleave in issuance order (spec §5);
    // `select` preserves that rather than draining one stream first.
    let body = retry.chain(stream::select(heartbeats, data));

    Ok(Sse::new(body).keep_alive(KeepAlive::new().interval(Duration::from_secs(HEARTBEAT_SECS))))
}

#[derive(Serialize)]
pub struct CountResponse {
    count: usize,
}

/// GET /events/count — public liveness indicator (spec §4.4, §9).
pub async fn count_handler(State(state): State<AppState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.hub.session_count(),
    })
}
