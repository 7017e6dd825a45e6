use super::{IdentityVerifier, VerifiedIdentity, VerifyError};
use crate::{
    AppState,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, instrument, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// A request whose bearer token was verified. Handlers that mutate storage take this as an
/// argument, so they cannot run for unauthenticated callers.
#[derive(Debug, Clone)]
pub struct Authenticated(pub VerifiedIdentity);

/// Verify the raw `Authorization` header value.
pub async fn verify_bearer(verifier: &dyn IdentityVerifier, authorization: Option<&str>) -> Result<VerifiedIdentity> {
    let token = authorization
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("Authorization header missing".to_string()),
        })?;

    verifier.verify_token(token).await.map_err(|e| {
        if let VerifyError::KeysUnavailable(_) = e {
            warn!(error = %e, "Token could not be checked");
        }
        Error::Unauthenticated {
            message: Some(format!("Invalid token: {e}")),
        }
    })
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let authorization = parts.headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
        let identity = verify_bearer(state.verifier.as_ref(), authorization).await?;
        debug!(uid = %identity.uid, "Authenticated caller");
        Ok(Authenticated(identity))
    }
}
