//! Axum middleware that turns a verified bearer credential into an
//! `AuthUser` request extension (grounded on the teacher's
//! `server/middleware/jwt_auth.rs`).

use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::app::AppState;
use crate::token::TokenValidator;

/// The authenticated identity attached to a request after `jwt_auth_middleware`.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub sub: String,
}

fn bearer_token<B>(request: &Request<B>) -> Option<String> {
    let header = request.headers().get("authorization")?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(str::to_string)
}

/// Requires a valid bearer token; rejects with 401 otherwise. Used on the
/// per-user channel CRUD routes (spec §4.7), as distinct from the
/// query-param auth the streaming endpoint uses (spec §4.4).
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&request) else {
        return crate::error::AppError::Unauthorized.into_response();
    };

    match state.token_validator.validate(&token).await {
        Ok((sub, _claims)) => {
            request.extensions_mut().insert(AuthUser { sub });
            next.run(request).await
        }
        Err(_) => crate::error::AppError::Unauthorized.into_response(),
    }
}

/// Resolve a bearer credential from the query string or header for the
/// streaming endpoint (spec §4.4: query-param auth is required because
/// `EventSource` cannot set arbitrary headers; clients that can set headers
/// may still use the endpoint, so header is also accepted).
pub async fn authenticate_stream(
    validator: &Arc<TokenValidator>,
    query_token: Option<&str>,
    headers: &axum::http::HeaderMap,
) -> Result<String, crate::token::TokenError> {
    let token = query_token
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or(crate::token::TokenError::Missing)?;

    let (sub, _claims) = validator.validate(&token).await?;
    Ok(sub)
}
