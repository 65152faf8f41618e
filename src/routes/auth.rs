//! Session authentication for HTTP and streaming routes.

use axum::extract::FromRef;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::error::ApiError;
use crate::services::task::TaskError;
use crate::state::AppState;
use crate::storage::Identity;

const COOKIE_NAME: &str = "session_token";

/// Session token from the `session_token` cookie, falling back to an
/// `Authorization: Bearer` header.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(token) = jar.get(COOKIE_NAME).map(Cookie::value).filter(|t| !t.is_empty()) {
        return Some(token.to_owned());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user resolved from the session token.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub identity: Identity,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(TaskError::Unauthenticated)?;

        let app_state = AppState::from_ref(state);
        let identity = app_state
            .store
            .resolve_session(&token)
            .await
            .map_err(TaskError::from)?
            .ok_or(TaskError::Unauthenticated)?;

        Ok(Self { identity })
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
