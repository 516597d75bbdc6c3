//! Test harness with testcontainers for integration testing.
//!
//! Uses shared containers across all tests, started once and reused
//! (grounded on the teacher's `tests/common/harness.rs`). Migrations are out
//! of scope for this crate (spec §6), so schema setup goes through the
//! gateway's own `db::connect`, which bootstraps tables on connect.

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use gateway_core::app::{build_app, AppState};
use gateway_core::config::Config;
use gateway_core::hub::Hub;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

const TEST_ISSUER: &str = "gateway-tests";
const TEST_AUDIENCE: &str = "gateway-clients";
const TEST_SECRET: &str = "integration-test-signing-secret";
const TEST_KID: &str = "test-key";
const WEBHOOK_SECRET: &str = "webhook-shared-secret";

struct SharedTestInfra {
    database_url: String,
    redis_url: String,
    jwks_addr: std::net::SocketAddr,
    _postgres: ContainerAsync<GenericImage>,
    _redis: ContainerAsync<Redis>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = GenericImage::new("postgres", "16-alpine")
            .with_wait_for(testcontainers::core::WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_exposed_port(testcontainers::core::ContainerPort::Tcp(5432))
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_DB", "postgres")
            .start()
            .await
            .context("failed to start postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let database_url = format!("postgresql://postgres:postgres@{pg_host}:{pg_port}/postgres");

        let redis = Redis::default()
            .start()
            .await
            .context("failed to start redis container")?;
        let redis_host = redis.get_host().await?;
        let redis_port = redis.get_host_port_ipv4(6379).await?;
        let redis_url = format!("redis://{redis_host}:{redis_port}");

        let jwks_addr = spawn_jwks_server().await?;

        Ok(Self {
            database_url,
            redis_url,
            jwks_addr,
            _postgres: postgres,
            _redis: redis,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("failed to start test infra") })
            .await
    }
}

#[derive(Serialize)]
struct JwkOut {
    kty: &'static str,
    kid: &'static str,
    alg: &'static str,
    #[serde(rename = "use")]
    key_use: &'static str,
    k: String,
}

async fn jwks_handler() -> Json<serde_json::Value> {
    let k = base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        TEST_SECRET.as_bytes(),
    );
    let jwk = JwkOut {
        kty: "oct",
        kid: TEST_KID,
        alg: "HS256",
        key_use: "sig",
        k,
    };
    Json(json!({ "keys": [jwk] }))
}

/// A throwaway JWKS endpoint backing the real `TokenValidator` in tests — it
/// fetches keys over HTTP exactly as it would against a production IdP.
async fn spawn_jwks_server() -> Result<std::net::SocketAddr> {
    let router = Router::new().route("/jwks", get(jwks_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

/// One gateway instance wired against the shared containers, listening on
/// its own ephemeral port, plus everything needed to act as a test client:
/// a token-issuing helper and direct handles to the DB/KV state.
pub struct TestHarness {
    pub base_url: String,
    pub state: AppState,
    pub hub: Arc<Hub>,
    pub http: reqwest::Client,
}

impl TestHarness {
    pub async fn start() -> Self {
        let infra = SharedTestInfra::get().await;

        let config = Config {
            database_url: infra.database_url.clone(),
            kv_url: infra.redis_url.clone(),
            port: 0,
            jwks_url: format!("http://{}/jwks", infra.jwks_addr),
            token_issuer: TEST_ISSUER.to_string(),
            token_audience: TEST_AUDIENCE.to_string(),
            webhook_shared_secret: WEBHOOK_SECRET.to_string(),
            allowed_origins: Vec::new(),
            default_channel_types: Vec::new(),
        };

        let (router, state) = build_app(config)
            .await
            .expect("failed to build application under test");
        let hub = state.hub.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("listener has no local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        // Give the server a moment to accept connections.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{addr}"),
            state,
            hub,
            http: reqwest::Client::new(),
        }
    }

    /// Mint a bearer credential accepted by this harness's token validator.
    pub fn issue_token(&self, sub: &str) -> String {
        let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
        header.kid = Some(TEST_KID.to_string());
        let claims = json!({
            "sub": sub,
            "iss": TEST_ISSUER,
            "aud": TEST_AUDIENCE,
            "exp": (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
        });
        encode(&header, &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes()))
            .expect("failed to sign test token")
    }

    pub fn webhook_secret(&self) -> &'static str {
        WEBHOOK_SECRET
    }

    /// Drop stray subscription-index/channel state between tests — each test
    /// uses distinct random `sub`s so cross-test interference isn't possible,
    /// but resource sets accumulate across unique feed URLs; callers that
    /// care scope their assertions to their own keys.
    pub fn db(&self) -> &sqlx::PgPool {
        &self.state.db
    }

    pub fn subscription_index(&self) -> &gateway_core::subscription::SubscriptionIndex {
        &self.state.subscription_index
    }
}

/// Open an SSE stream and read raw `data:`/`: comment` lines off it, one at
/// a time, with a timeout. Returns `None` on timeout (no frame arrived).
pub struct SseReader {
    lines: std::pin::Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buf: Vec<u8>,
}

impl SseReader {
    pub async fn connect(http: &reqwest::Client, url: &str) -> Self {
        use futures_util::StreamExt;
        let resp = http.get(url).send().await.expect("sse request failed");
        assert_eq!(resp.status(), reqwest::StatusCode::OK, "sse handshake failed");
        let stream = resp.bytes_stream().boxed();
        Self { lines: stream, buf: Vec::new() }
    }

    /// Read lines until a `data: ...` frame arrives, parsing its JSON body.
    /// Skips `retry:` directives and `: ping` heartbeat comments.
    pub async fn next_data(&mut self, timeout: std::time::Duration) -> Option<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let line = self.next_line(remaining).await?;
            if let Some(json) = line.strip_prefix("data:") {
                return serde_json::from_str(json.trim()).ok();
            }
        }
    }

    /// Read the next logical SSE line (`data: ...` or `: ...`), waiting up
    /// to `timeout` for it to arrive.
    pub async fn next_line(&mut self, timeout: std::time::Duration) -> Option<String> {
        use futures_util::StreamExt;
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.buf.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    return text;
                }
                match self.lines.next().await {
                    Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                    _ => std::future::pending::<()>().await,
                }
            }
        })
        .await
        .ok()
    }
}
