//! Firebase ID token verification.
//!
//! ID tokens are RS256 JWTs signed by `securetoken@system.gserviceaccount.com`. A token is accepted
//! when its signature matches one of the published keys, it was issued for the configured project
//! (`aud` and `iss`), it has not expired, and it names a user (`sub`).
//!
//! The published key set rotates; it is kept for the `max-age` Google sends with it. A token naming
//! a key we have not seen triggers a refetch, at most once a minute.

use super::{IdentityVerifier, VerifiedIdentity, VerifyError};
use crate::config::FirebaseConfig;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    errors::ErrorKind,
    jwk::{Jwk, JwkSet},
};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const DEFAULT_KEYS_MAX_AGE: Duration = Duration::from_secs(3600);
const MAX_UID_LEN: usize = 128;
/// Unknown key ids do not refetch a key set younger than this
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    iat: i64,
    #[serde(default)]
    auth_time: Option<i64>,
    #[serde(default)]
    email: Option<String>,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
    expires_at: Instant,
}

pub struct FirebaseVerifier {
    http: reqwest::Client,
    jwks_url: Url,
    project_id: String,
    issuer: String,
    leeway: Duration,
    refetch_interval: Duration,
    keys: ArcSwapOption<CachedKeys>,
    refresh: Mutex<()>,
}

impl std::fmt::Debug for FirebaseVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseVerifier")
            .field("project_id", &self.project_id)
            .field("jwks_url", &self.jwks_url.as_str())
            .finish_non_exhaustive()
    }
}

/// `max-age` from a Cache-Control header value
fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn rejection_reason(error: &jsonwebtoken::errors::Error) -> String {
    match error.kind() {
        ErrorKind::ExpiredSignature => "token has expired".to_string(),
        ErrorKind::InvalidSignature => "signature does not match".to_string(),
        ErrorKind::InvalidAudience => "token was issued for a different project".to_string(),
        ErrorKind::InvalidIssuer => "unexpected issuer".to_string(),
        ErrorKind::ImmatureSignature => "token is not valid yet".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing {claim} claim"),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => "malformed token".to_string(),
        ErrorKind::Json(e) => format!("malformed claims: {e}"),
        _ => error.to_string(),
    }
}

impl FirebaseVerifier {
    pub fn new(http: reqwest::Client, config: &FirebaseConfig) -> Self {
        Self {
            http,
            jwks_url: config.jwks_url.clone(),
            project_id: config.project_id.clone(),
            issuer: format!("{ISSUER_PREFIX}{}", config.project_id),
            leeway: config.clock_skew,
            refetch_interval: MIN_REFETCH_INTERVAL,
            keys: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    fn cached_key(&self, kid: &str) -> Option<Jwk> {
        let cached = self.keys.load();
        let cached = cached.as_ref()?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        cached.keys.find(kid).cloned()
    }

    /// True while the cached set is unexpired and was fetched within `refetch_interval`
    fn recently_fetched(&self) -> bool {
        self.keys.load().as_ref().is_some_and(|cached| {
            let now = Instant::now();
            now < cached.expires_at && now.duration_since(cached.fetched_at) < self.refetch_interval
        })
    }

    /// The signing key named `kid`, refetching the key set if it is stale or lacks that key
    async fn signing_key(&self, kid: &str) -> Result<Jwk, VerifyError> {
        let unknown = || VerifyError::Rejected(format!("token signed with unknown key {kid}"));

        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }
        if self.recently_fetched() {
            return Err(unknown());
        }

        let _guard = self.refresh.lock().await;
        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }
        if self.recently_fetched() {
            return Err(unknown());
        }

        let fetched = self.fetch_keys().await?;
        let key = fetched.keys.find(kid).cloned();
        self.keys.store(Some(Arc::new(fetched)));
        key.ok_or_else(unknown)
    }

    #[instrument(skip(self), fields(url = %self.jwks_url), err)]
    async fn fetch_keys(&self) -> Result<CachedKeys, VerifyError> {
        let response = self
            .http
            .get(self.jwks_url.clone())
            .send()
            .await
            .map_err(|e| VerifyError::KeysUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::KeysUnavailable(format!("key endpoint returned {status}")));
        }

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_KEYS_MAX_AGE);

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| VerifyError::KeysUnavailable(format!("invalid key set: {e}")))?;
        debug!(count = keys.keys.len(), ttl_secs = ttl.as_secs(), "Fetched token signing keys");

        let now = Instant::now();
        Ok(CachedKeys {
            keys,
            fetched_at: now,
            expires_at: now + ttl,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation.leeway = self.leeway.as_secs();
        validation
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    #[instrument(skip_all, err(level = "debug"))]
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let header = decode_header(token).map_err(|e| VerifyError::Rejected(rejection_reason(&e)))?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::Rejected(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Rejected("token has no key id".to_string()))?;

        let jwk = self.signing_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| {
            warn!(%kid, error = %e, "Published signing key is unusable");
            VerifyError::KeysUnavailable(e.to_string())
        })?;

        let claims = decode::<IdTokenClaims>(token, &key, &self.validation())
            .map_err(|e| VerifyError::Rejected(rejection_reason(&e)))?
            .claims;

        if claims.sub.is_empty() {
            return Err(VerifyError::Rejected("token has an empty subject".to_string()));
        }
        if claims.sub.chars().count() > MAX_UID_LEN {
            return Err(VerifyError::Rejected("subject is longer than 128 characters".to_string()));
        }

        let latest_allowed = chrono::Utc::now().timestamp() + self.leeway.as_secs() as i64;
        if claims.iat > latest_allowed {
            return Err(VerifyError::Rejected("token issued in the future".to_string()));
        }
        if claims.auth_time.is_some_and(|t| t > latest_allowed) {
            return Err(VerifyError::Rejected("authentication time is in the future".to_string()));
        }

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
        })
    }
}
