//! Credential checks for API tokens and the admin key.
//!
//! Missing and wrong credentials produce the same error; only the logs tell
//! them apart. Checks have no side effects: usage is recorded separately by
//! the caller once a request is let through.

use crate::error::ApiError;
use crate::http::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use faceswap_tokens::{TokenStore, TokenStoreError};
use thiserror::Error;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

/// Check an API token against the store and return its id.
pub async fn authorize(store: &TokenStore, presented: Option<&str>) -> Result<String, AuthError> {
    let Some(token) = presented.filter(|t| !t.is_empty()) else {
        tracing::debug!("api token missing");
        return Err(AuthError::Unauthorized);
    };
    if !store.validate(token).await? {
        tracing::warn!("api token rejected: unknown token");
        return Err(AuthError::Unauthorized);
    }
    Ok(token.to_string())
}

/// Check the admin credential.
pub fn authorize_admin(secret: &str, presented: Option<&str>) -> Result<(), AuthError> {
    let Some(key) = presented else {
        tracing::debug!("admin key missing");
        return Err(AuthError::Unauthorized);
    };
    if !constant_time_eq(key.as_bytes(), secret.as_bytes()) {
        tracing::warn!("admin key rejected: mismatch");
        return Err(AuthError::Unauthorized);
    }
    Ok(())
}

/// Compare without an early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = 0u8;
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0 && a.len() == b.len()
}

/// Header value as text, if present and valid UTF-8.
pub fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Proof that the request carried the admin key.
pub struct AdminKey;

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authorize_admin(&state.admin_key, header_str(parts, ADMIN_KEY_HEADER))
            .map_err(|_| ApiError::Unauthorized("Invalid Admin Key".to_string()))?;
        Ok(AdminKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq(b"admin-secret-key", b"admin-secret-key"));
        assert!(!constant_time_eq(b"admin-secret-key", b"admin-secret-kez"));
        assert!(!constant_time_eq(b"admin", b"admin-secret-key"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn admin_missing_and_wrong_look_the_same() {
        let missing = authorize_admin("s3cret", None).unwrap_err();
        let wrong = authorize_admin("s3cret", Some("guess")).unwrap_err();
        assert_eq!(missing.to_string(), wrong.to_string());
        assert!(authorize_admin("s3cret", Some("s3cret")).is_ok());
    }

    #[tokio::test]
    async fn api_token_checks() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let token = store.create().await.unwrap();

        assert_eq!(authorize(&store, Some(&token)).await.unwrap(), token);
        assert!(matches!(authorize(&store, None).await, Err(AuthError::Unauthorized)));
        assert!(matches!(authorize(&store, Some("")).await, Err(AuthError::Unauthorized)));
        assert!(matches!(authorize(&store, Some("bogus")).await, Err(AuthError::Unauthorized)));

        // authorization alone never counts usage
        assert_eq!(store.get(&token).await.unwrap().unwrap().total_requests, 0);
    }
}
