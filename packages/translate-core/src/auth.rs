//! Speaker-token verification (component D).
//!
//! Verifies a bearer token against a cached JWKS signing-key set. Every
//! failure path — expired, wrong key, malformed, absent — downgrades to an
//! *anonymous* principal rather than rejecting; rejection is a separate,
//! downstream role-policy decision made by the gateway (§4.E).

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::protocol_constants::SIGNING_KEY_CACHE_TTL_SECS;

/// The verified identity of a connection. Anonymous listeners are a first-class
/// outcome, not an error — see module docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub authenticated: bool,
}

impl Principal {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: String::new(),
            authenticated: false,
        }
    }
}

/// Claims this verifier cares about. Extra claims in the token are ignored.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    token_use: Option<String>,
}

/// Fetches the signing-key set (JWKS) from the token issuer. Out of scope
/// per §1: the issuer itself is an external collaborator; this trait is its
/// contract.
#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch_keys(&self) -> Option<Vec<(String, DecodingKey)>>;
}

/// Fetches JWKS over HTTP via the shared `reqwest::Client`, parsing RSA keys
/// out of the standard JWK Set document shape.
pub struct HttpJwksSource {
    client: reqwest::Client,
    jwks_url: String,
}

#[derive(Deserialize)]
struct JwkSetDoc {
    keys: Vec<JwkDoc>,
}

#[derive(Deserialize)]
struct JwkDoc {
    kid: String,
    n: String,
    e: String,
}

impl HttpJwksSource {
    #[must_use]
    pub fn new(client: reqwest::Client, jwks_url: impl Into<String>) -> Self {
        Self {
            client,
            jwks_url: jwks_url.into(),
        }
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch_keys(&self) -> Option<Vec<(String, DecodingKey)>> {
        let resp = self.client.get(&self.jwks_url).send().await.ok()?;
        let doc: JwkSetDoc = resp.json().await.ok()?;
        let keys = doc
            .keys
            .into_iter()
            .filter_map(|jwk| {
                let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).ok()?;
                Some((jwk.kid, key))
            })
            .collect();
        Some(keys)
    }
}

/// In-memory JWKS source for tests: returns a fixed key set, or `None` to
/// simulate an issuer outage.
pub struct StaticJwksSource {
    pub keys: Option<Vec<(String, DecodingKey)>>,
}

#[async_trait]
impl JwksSource for StaticJwksSource {
    async fn fetch_keys(&self) -> Option<Vec<(String, DecodingKey)>> {
        self.keys.clone()
    }
}

struct KeySet {
    keys: Vec<(String, DecodingKey)>,
    fetched_at_millis: u64,
}

/// Verifies speaker tokens against a read-mostly, TTL-cached signing-key set.
/// Refreshes are single-flighted via an async mutex so a cache stampede
/// collapses to one upstream fetch.
pub struct AuthVerifier {
    source: Arc<dyn JwksSource>,
    audience: String,
    ttl_secs: u64,
    cache: RwLock<Option<KeySet>>,
    refresh_lock: AsyncMutex<()>,
}

impl AuthVerifier {
    /// Uses the default signing-key cache TTL ([`SIGNING_KEY_CACHE_TTL_SECS`]).
    /// Use [`Self::with_ttl_secs`] to override it from [`crate::state::Config`].
    #[must_use]
    pub fn new(source: Arc<dyn JwksSource>, audience: impl Into<String>) -> Self {
        Self::with_ttl_secs(source, audience, SIGNING_KEY_CACHE_TTL_SECS)
    }

    #[must_use]
    pub fn with_ttl_secs(source: Arc<dyn JwksSource>, audience: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            source,
            audience: audience.into(),
            ttl_secs,
            cache: RwLock::new(None),
            refresh_lock: AsyncMutex::new(()),
        }
    }

    fn cache_is_fresh(&self, now_millis: u64) -> bool {
        match self.cache.read().as_ref() {
            Some(set) => now_millis.saturating_sub(set.fetched_at_millis) < self.ttl_secs * 1000,
            None => false,
        }
    }

    /// Forces a signing-key cache refresh check, for the supervisor's
    /// periodic refresh tick (§10.6) rather than a lazy `verify()` call.
    /// Still single-flighted and still a no-op if the cache is fresh.
    pub async fn refresh_if_stale(&self, now_millis: u64) {
        self.ensure_fresh(now_millis).await;
    }

    async fn ensure_fresh(&self, now_millis: u64) {
        if self.cache_is_fresh(now_millis) {
            return;
        }
        let _guard = self.refresh_lock.lock().await;
        if self.cache_is_fresh(now_millis) {
            return;
        }
        if let Some(keys) = self.source.fetch_keys().await {
            *self.cache.write() = Some(KeySet {
                keys,
                fetched_at_millis: now_millis,
            });
        }
    }

    fn key_for_kid(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let guard = self.cache.read();
        let set = guard.as_ref()?;
        match kid {
            Some(kid) => set.keys.iter().find(|(k, _)| k == kid).map(|(_, key)| key.clone()),
            None => set.keys.first().map(|(_, key)| key.clone()),
        }
    }

    /// Verifies `token`, refreshing the signing-key cache first if it has
    /// gone stale. Never returns an error: any failure downgrades to
    /// [`Principal::anonymous`].
    pub async fn verify(&self, token: Option<&str>, now_millis: u64) -> Principal {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Principal::anonymous();
        };

        self.ensure_fresh(now_millis).await;

        let header = match jsonwebtoken::decode_header(token) {
            Ok(h) => h,
            Err(_) => return Principal::anonymous(),
        };
        let Some(key) = self.key_for_kid(header.kid.as_deref()) else {
            return Principal::anonymous();
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);

        let claims = match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
            Ok(data) => data.claims,
            Err(_) => return Principal::anonymous(),
        };

        if claims.token_use.as_deref() != Some("identity") {
            return Principal::anonymous();
        }
        if claims.aud.as_deref() != Some(self.audience.as_str()) {
            return Principal::anonymous();
        }

        Principal {
            user_id: claims.sub,
            authenticated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_token_is_anonymous() {
        let verifier = AuthVerifier::new(Arc::new(StaticJwksSource { keys: None }), "aud");
        let principal = verifier.verify(None, 0).await;
        assert!(!principal.authenticated);
        assert_eq!(principal.user_id, "");
    }

    #[tokio::test]
    async fn malformed_token_is_anonymous() {
        let verifier = AuthVerifier::new(Arc::new(StaticJwksSource { keys: None }), "aud");
        let principal = verifier.verify(Some("not-a-jwt"), 0).await;
        assert!(!principal.authenticated);
    }

    #[tokio::test]
    async fn unavailable_issuer_downgrades_rather_than_rejects() {
        let verifier = AuthVerifier::new(Arc::new(StaticJwksSource { keys: None }), "aud");
        // No keys ever populate the cache; any token fails signature lookup.
        let principal = verifier.verify(Some("x.y.z"), 0).await;
        assert!(!principal.authenticated);
        assert_eq!(principal, Principal::anonymous());
    }
}
