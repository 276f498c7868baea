//! Bearer credential verification
//!
//! One verifier serves both entry points: the HTTP auth middleware and the
//! realtime handshake. Token issuance is not handled here; tokens come from
//! an external identity service sharing the HS256 secret.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header::{AUTHORIZATION, COOKIE},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by a bearer token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the opaque identity of the principal
    pub sub: String,
    /// Expiry as a Unix timestamp
    pub exp: usize,
}

/// The identity of an authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct Identity(pub String);

/// Validates bearer tokens and resolves them to an identity
///
/// Stateless and safe to call concurrently.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier from the shared HS256 secret
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate a token and return the identity it was issued to
    pub fn verify(&self, token: &str) -> Result<String, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Unauthenticated(format!("Invalid token: {}", e)))?;
        Ok(data.claims.sub)
    }
}

/// Extract a bearer token from the Authorization header, falling back to a
/// `token` cookie
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token);
            }
        }
    }

    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .map(str::trim)
        .find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            if name.trim() == "token" {
                Some(value.trim())
            } else {
                None
            }
        })
}

/// Auth middleware - verifies the caller's bearer token and attaches the
/// resolved [`Identity`] to the request
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| AppError::Unauthenticated("Missing bearer token".to_string()))?;

    let user_id = state.verifier.verify(token)?;
    request.extensions_mut().insert(Identity(user_id));

    Ok(next.run(request).await)
}
