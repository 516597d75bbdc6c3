//! Per-User Channel CRUD and lifecycle (spec §3 "Channel", §4.6, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::app::AppState;
use crate::error::AppError;
use crate::subscription::SubscriptionIndex;

/// The closed set of registered channel types. Spec §4.8 describes this as
/// a dynamic registry built from pluggable domain handlers discovered at
/// startup; the gateway core has no domain handlers of its own beyond the
/// routing table in `routing.rs`, so the set is declared once here instead
/// of derived from a handler registry.
pub const REGISTERED_CHANNEL_TYPES: &[&str] = &["finance", "sports", "fantasy", "rss"];

pub fn is_registered_type(channel_type: &str) -> bool {
    REGISTERED_CHANNEL_TYPES.contains(&channel_type)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Channel {
    pub id: i64,
    pub sub: String,
    #[sqlx(rename = "type")]
    pub channel_type: String,
    pub enabled: bool,
    pub visible: bool,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannel {
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub config: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateChannel {
    pub enabled: Option<bool>,
    pub visible: Option<bool>,
    pub config: Option<Value>,
}

/// List all channels owned by `sub`.
pub async fn list(db: &PgPool, sub: &str) -> anyhow::Result<Vec<Channel>> {
    let channels = sqlx::query_as::<_, Channel>(
        "SELECT id, sub, type, enabled, visible, config, created_at, updated_at
         FROM user_channels WHERE sub = $1 ORDER BY id",
    )
    .bind(sub)
    .fetch_all(db)
    .await?;
    Ok(channels)
}

/// Create a new channel, reconciling the Subscription Index on success.
pub async fn create(
    db: &PgPool,
    index: &SubscriptionIndex,
    sub: &str,
    input: CreateChannel,
) -> Result<Channel, AppError> {
    if !is_registered_type(&input.channel_type) {
        return Err(AppError::BadRequest(format!(
            "unknown channel type: {}",
            input.channel_type
        )));
    }

    let channel = sqlx::query_as::<_, Channel>(
        "INSERT INTO user_channels (sub, type, enabled, visible, config)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, sub, type, enabled, visible, config, created_at, updated_at",
    )
    .bind(sub)
    .bind(&input.channel_type)
    .bind(input.enabled)
    .bind(input.visible)
    .bind(&input.config)
    .fetch_one(db)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::Conflict
        } else {
            AppError::Infra(err.into())
        }
    })?;

    if channel.enabled {
        index
            .add(sub, &channel.channel_type, &channel.config)
            .await
            .map_err(AppError::Infra)?;
    }

    Ok(channel)
}

/// Partially update a channel, applying the subscription delta (spec §4.6).
pub async fn update(
    db: &PgPool,
    index: &SubscriptionIndex,
    sub: &str,
    id: i64,
    input: UpdateChannel,
) -> Result<Channel, AppError> {
    let before = fetch_owned(db, sub, id).await?;

    let enabled = input.enabled.unwrap_or(before.enabled);
    let visible = input.visible.unwrap_or(before.visible);
    let config = input.config.clone().unwrap_or_else(|| before.config.clone());

    let after = sqlx::query_as::<_, Channel>(
        "UPDATE user_channels SET enabled = $1, visible = $2, config = $3, updated_at = now()
         WHERE id = $4 AND sub = $5
         RETURNING id, sub, type, enabled, visible, config, created_at, updated_at",
    )
    .bind(enabled)
    .bind(visible)
    .bind(&config)
    .bind(id)
    .bind(sub)
    .fetch_one(db)
    .await
    .map_err(|err| AppError::Infra(err.into()))?;

    reconcile(index, sub, &before, &after).await?;

    Ok(after)
}

/// Delete a channel, removing its Subscription Index membership.
pub async fn delete(
    db: &PgPool,
    index: &SubscriptionIndex,
    sub: &str,
    id: i64,
) -> Result<(), AppError> {
    let before = fetch_owned(db, sub, id).await?;

    let result = sqlx::query("DELETE FROM user_channels WHERE id = $1 AND sub = $2")
        .bind(id)
        .bind(sub)
        .execute(db)
        .await
        .map_err(|err| AppError::Infra(err.into()))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if before.enabled {
        index
            .remove(sub, &before.channel_type, &before.config)
            .await
            .map_err(AppError::Infra)?;
    }

    Ok(())
}

async fn fetch_owned(db: &PgPool, sub: &str, id: i64) -> Result<Channel, AppError> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, sub, type, enabled, visible, config, created_at, updated_at
         FROM user_channels WHERE id = $1 AND sub = $2",
    )
    .bind(id)
    .bind(sub)
    .fetch_optional(db)
    .await
    .map_err(|err| AppError::Infra(err.into()))?
    .ok_or(AppError::NotFound)
}

/// Apply the enabled/disabled and per-resource config delta between two
/// revisions of the same channel to the Subscription Index.
async fn reconcile(
    index: &SubscriptionIndex,
    sub: &str,
    before: &Channel,
    after: &Channel,
) -> Result<(), AppError> {
    match (before.enabled, after.enabled) {
        (false, true) => index
            .add(sub, &after.channel_type, &after.config)
            .await
            .map_err(AppError::Infra)?,
        (true, false) => index
            .remove(sub, &before.channel_type, &before.config)
            .await
            .map_err(AppError::Infra)?,
        (true, true) => index
            .update_resources(sub, &after.channel_type, &before.config, &after.config)
            .await
            .map_err(AppError::Infra)?,
        (false, false) => {}
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Idempotent rebuild pass: reload all of a user's channels from the
/// database and re-apply the equivalent `add` operations (spec §4.6). Used
/// on reconnect paths to repair divergence from process restarts.
pub async fn warm_up(db: &PgPool, index: &SubscriptionIndex, sub: &str) -> anyhow::Result<()> {
    let channels = list(db, sub).await?;
    for channel in channels.iter().filter(|c| c.enabled) {
        index.add(sub, &channel.channel_type, &channel.config).await?;
    }
    Ok(())
}

/// Seed policy (spec §4.7): create any missing default channels for a user
/// on first dashboard load. Idempotent under the `(sub, type)` uniqueness
/// constraint — a conflict on an already-seeded type is not an error.
pub async fn seed_defaults(
    db: &PgPool,
    index: &SubscriptionIndex,
    sub: &str,
    default_types: &[String],
) -> anyhow::Result<()> {
    for channel_type in default_types {
        if !is_registered_type(channel_type) {
            continue;
        }
        let input = CreateChannel {
            channel_type: channel_type.clone(),
            enabled: true,
            visible: true,
            config: Value::Object(Default::default()),
        };
        match create(db, index, sub, input).await {
            Ok(_) | Err(AppError::Conflict) => {}
            Err(err) => return Err(anyhow::anyhow!(err)),
        }
    }
    Ok(())
}

// --- HTTP handlers -------------------------------------------------------

use axum::extract::{Path, State};
use axum::{Extension, Json};

use crate::server_auth::AuthUser;

pub async fn list_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Channel>>, AppError> {
    let channels = list(&state.db, &user.sub).await.map_err(AppError::Infra)?;
    Ok(Json(channels))
}

pub async fn create_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<CreateChannel>,
) -> Result<Json<Channel>, AppError> {
    let channel = create(&state.db, &state.subscription_index, &user.sub, input).await?;
    Ok(Json(channel))
}

pub async fn update_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateChannel>,
) -> Result<Json<Channel>, AppError> {
    let channel = update(&state.db, &state.subscription_index, &user.sub, id, input).await?;
    Ok(Json(channel))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<axum::http::StatusCode, AppError> {
    delete(&state.db, &state.subscription_index, &user.sub, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
