//! Bearer token verification.
//!
//! Tokens are HMAC-signed JWTs. Browsers cannot set headers on a WebSocket
//! handshake, so the token may also arrive as the `token` query parameter.
//! The verified `id` claim becomes the connection's owner identity.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Authentication errors. All map to `401 Unauthorized`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither the header nor the query carried a token.
    #[error("No token provided")]
    MissingToken,

    /// Signature, algorithm, or expiry check failed.
    #[error("Invalid token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token verified but carries no `id` claim.
    #[error("Token has no id claim")]
    MissingIdentity,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        metrics::record_auth_failure();

        let body = match &self {
            AuthError::InvalidToken(e) => serde_json::json!({
                "error": self.to_string(),
                "details": e.to_string(),
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Verifies bearer tokens against a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // `exp` and `nbf` are checked when present but not required.
        validation.required_spec_claims.clear();
        validation.validate_nbf = true;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify `token` and return the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns an error if the token does not verify or has no `id` claim.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;

        match data.claims.id {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(serde_json::Value::Null) | None => Err(AuthError::MissingIdentity),
            Some(other) => {
                debug!("Non-string id claim: {}", other);
                Ok(other.to_string())
            }
        }
    }
}

/// Pull the raw token from `Authorization` or the `token` query parameter.
pub fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
        .filter(|token| !token.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
}

/// The verified identity of the caller.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let identity = state.verifier.verify(&token)?;
        Ok(Identity(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn token(claims: serde_json::Value, secret: &[u8]) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn parts(uri: &str, authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_verify_string_id() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"id": "6999f9fa", "email": "peter@example.com"}), SECRET);
        assert_eq!(verifier.verify(&token).unwrap(), "6999f9fa");
    }

    #[test]
    fn test_verify_numeric_id() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"id": 42}), SECRET);
        assert_eq!(verifier.verify(&token).unwrap(), "42");
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"id": "u1"}), b"other-secret");
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"id": "u1", "exp": 1_000}), SECRET);
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_not_yet_valid() {
        let verifier = TokenVerifier::new(SECRET);
        let future = token(serde_json::json!({"id": "u1", "nbf": 4_000_000_000u64}), SECRET);
        assert!(matches!(
            verifier.verify(&future),
            Err(AuthError::InvalidToken(_))
        ));

        let past = token(serde_json::json!({"id": "u1", "nbf": 1_000}), SECRET);
        assert_eq!(verifier.verify(&past).unwrap(), "u1");
    }

    #[test]
    fn test_verify_requires_id() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"email": "peter@example.com"}), SECRET);
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::MissingIdentity)
        ));
    }

    #[test]
    fn test_token_from_header_or_query() {
        assert_eq!(
            bearer_token(&parts("/ws", Some("Bearer abc"))).as_deref(),
            Some("abc")
        );
        assert_eq!(
            bearer_token(&parts("/ws?token=xyz", None)).as_deref(),
            Some("xyz")
        );
        assert_eq!(
            bearer_token(&parts("/ws?token=xyz", Some("Bearer abc"))).as_deref(),
            Some("abc")
        );
        assert!(bearer_token(&parts("/ws", None)).is_none());
        assert!(bearer_token(&parts("/ws?token=", Some("Bearer "))).is_none());
    }
}
