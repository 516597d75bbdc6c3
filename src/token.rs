//! Token Validator: verifies a bearer credential against a remote JWKS,
//! with background-refreshed keys (spec §4.1).

use jsonwebtoken::jwk::{JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const REFRESH_FLOOR: Duration = Duration::from_secs(60);
const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);
const BACKGROUND_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token validator not initialised")]
    NotInitialised,
    #[error("missing authentication")]
    Missing,
    #[error("token parse failed")]
    ParseFailed,
    #[error("token not valid")]
    NotValid,
    #[error("token missing sub claim")]
    MissingSub,
    #[error("unexpected issuer")]
    BadIssuer,
    #[error("unexpected audience")]
    BadAudience,
}

/// The `aud` claim may be a scalar or a list (spec §4.1).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    fn matches(&self, expected: &str) -> bool {
        match self {
            Audience::Single(a) => a == expected,
            Audience::Many(list) => list.iter().any(|a| a == expected),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub iss: Option<String>,
    pub aud: Option<Audience>,
    pub exp: i64,
}

struct KeySet {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    fetched_at: Instant,
}

/// Verifies bearer credentials against a remote key set, refreshing it on a
/// timer with a floor on refresh frequency (spec §4.1).
pub struct TokenValidator {
    http: reqwest::Client,
    jwks_url: String,
    issuer: String,
    audience: String,
    keys: RwLock<Option<KeySet>>,
    /// Single-flight gate: held across the fetch and the key-set swap so
    /// overlapping refresh triggers await one refresh instead of each
    /// issuing their own JWKS fetch (spec §1, §5).
    refresh_gate: tokio::sync::Mutex<()>,
}

fn to_algorithm(key_alg: KeyAlgorithm) -> Option<Algorithm> {
    match key_alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

impl TokenValidator {
    pub fn new(jwks_url: String, issuer: String, audience: String) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            jwks_url,
            issuer,
            audience,
            keys: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Fetch the key set once, then spawn the background refresher.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.refresh_keys().await?;
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BACKGROUND_REFRESH_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                if let Err(err) = this.refresh_keys().await {
                    tracing::warn!(error = %err, "jwks background refresh failed");
                }
            }
        });
        Ok(())
    }

    /// Serializes on `refresh_gate`; callers racing for a refresh all
    /// await the same fetch rather than each issuing their own.
    async fn refresh_keys(&self) -> anyhow::Result<()> {
        let _guard = self.refresh_gate.lock().await;
        self.fetch_and_store().await
    }

    /// Performs the actual JWKS fetch and key-set swap. Callers must hold
    /// `refresh_gate` before calling this.
    async fn fetch_and_store(&self) -> anyhow::Result<()> {
        let resp = tokio::time::timeout(REFRESH_TIMEOUT, self.http.get(&self.jwks_url).send())
            .await??;
        let jwk_set: JwkSet = resp.json().await?;

        let mut keys = HashMap::new();
        for jwk in &jwk_set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            let Ok(decoding_key) = DecodingKey::from_jwk(jwk) else {
                continue;
            };
            let algorithm = jwk
                .common
                .key_algorithm
                .and_then(to_algorithm)
                .unwrap_or(Algorithm::RS256);
            keys.insert(kid, (decoding_key, algorithm));
        }

        *self.keys.write().await = Some(KeySet {
            keys,
            fetched_at: Instant::now(),
        });
        tracing::info!("jwks refreshed");
        Ok(())
    }

    /// Resolve a key id, refreshing the key set at most once per floor
    /// window when the kid is unknown (spec §4.1). Concurrent callers
    /// serialize on `refresh_gate`: only the first actually fetches, the
    /// rest wake up, re-check the now-fresh cache, and skip the fetch.
    async fn resolve_key(&self, kid: &str) -> Option<(DecodingKey, Algorithm)> {
        if let Some(found) = self.lookup_key(kid).await {
            return Some(found);
        }

        let _guard = self.refresh_gate.lock().await;

        if let Some(found) = self.lookup_key(kid).await {
            return Some(found);
        }

        let should_refresh = match self.keys.read().await.as_ref() {
            None => true,
            Some(ks) => ks.fetched_at.elapsed() >= REFRESH_FLOOR,
        };
        if should_refresh {
            if let Err(err) = self.fetch_and_store().await {
                tracing::warn!(error = %err, "jwks refresh failed");
            }
        }

        self.lookup_key(kid).await
    }

    async fn lookup_key(&self, kid: &str) -> Option<(DecodingKey, Algorithm)> {
        self.keys.read().await.as_ref()?.keys.get(kid).cloned()
    }

    /// Verify a bearer credential, returning the verified `sub` and claims.
    pub async fn validate(&self, token: &str) -> Result<(String, Claims), TokenError> {
        if self.keys.read().await.is_none() {
            return Err(TokenError::NotInitialised);
        }

        let header = decode_header(token).map_err(|_| TokenError::ParseFailed)?;
        let kid = header.kid.ok_or(TokenError::ParseFailed)?;
        let (decoding_key, algorithm) =
            self.resolve_key(&kid).await.ok_or(TokenError::NotValid)?;

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false; // custom scalar-or-list check below

        let data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|_| TokenError::NotValid)?;
        let claims = data.claims;

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(TokenError::BadIssuer);
        }

        let audience_ok = claims
            .aud
            .as_ref()
            .map(|aud| aud.matches(&self.audience))
            .unwrap_or(false);
        if !audience_ok {
            return Err(TokenError::BadAudience);
        }

        let sub = claims.sub.clone().ok_or(TokenError::MissingSub)?;
        Ok((sub, claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_scalar_matches_exactly() {
        let aud = Audience::Single("gateway".into());
        assert!(aud.matches("gateway"));
        assert!(!aud.matches("other"));
    }

    #[test]
    fn audience_list_matches_membership() {
        let aud = Audience::Many(vec!["a".into(), "gateway".into()]);
        assert!(aud.matches("gateway"));
        assert!(!aud.matches("missing"));
    }
}
