//! Auth extractors: bearer JWT for end users, `x-app-key` for operators.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::debug;

use crate::error::AppError;
use crate::handlers::http::AppState;

pub const HEADER_APP_KEY: &str = "x-app-key";
const BEARER_PREFIX: &str = "Bearer ";

/// Bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Provide a valid auth token.".to_string()))?;
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| AppError::Auth("Bearer token malformed.".to_string()))?
        .trim();
    if token.is_empty() {
        return Err(AppError::Auth("Provide a valid auth token.".to_string()));
    }
    Ok(token)
}

/// Extractor: authenticated user id from the bearer JWT.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser(pub i64);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user_id = state.jwt_secret().resolve_identity(token)?;
        Ok(AuthUser(user_id))
    }
}

/// Extractor: request carries the configured operator key.
#[derive(Clone, Copy, Debug)]
pub struct AppKey;

#[axum::async_trait]
impl FromRequestParts<AppState> for AppKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(HEADER_APP_KEY)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if key.is_empty() || key != state.app_key {
            debug!("rejected request: invalid or missing x-app-key");
            return Err(AppError::Auth("invalid or missing x-app-key".to_string()));
        }
        Ok(AppKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert!(matches!(bearer_token(&headers), Err(AppError::Auth(m)) if m.contains("malformed")));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }
}
