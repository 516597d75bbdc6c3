//! Database pool and schema bootstrap (spec §6: "Schema bootstrap at
//! startup via `CREATE IF NOT EXISTS`; migrations are out of scope").

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .idle_timeout(std::time::Duration::from_secs(600))
        .connect(database_url)
        .await?;
    bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Creates the tables the gateway core owns or reads from. `user_channels`
/// is owned by the Channel Lifecycle subsystem (spec §6); `yahoo_users` and
/// `yahoo_leagues` are the lookup tables the join-resolved routing
/// strategies query (spec §4.5, §8 scenarios D-E) and are otherwise owned
/// by the Yahoo integration collaborator — the gateway only needs them to
/// exist so its join queries don't fail on a fresh database.
async fn bootstrap_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_channels (
            id BIGSERIAL PRIMARY KEY,
            sub TEXT NOT NULL,
            type TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT true,
            visible BOOLEAN NOT NULL DEFAULT true,
            config JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (sub, type)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS yahoo_users (
            guid TEXT PRIMARY KEY,
            logto_sub TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS yahoo_leagues (
            league_key TEXT PRIMARY KEY,
            logto_sub TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
