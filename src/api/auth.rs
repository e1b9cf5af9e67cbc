//! Bearer-token authentication.
//!
//! One shared token guards the whole surface. WebSocket clients cannot set
//! headers from a browser, so a `token` query parameter is accepted there
//! as a fallback.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::BayError;

pub const SESSION_HEADER: &str = "X-SESSION-ID";

#[derive(Clone)]
pub struct AuthState {
    token: Arc<String>,
}

impl AuthState {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(token.into()),
        }
    }

    pub fn verify(&self, candidate: &str) -> bool {
        constant_time_eq(candidate.as_bytes(), self.token.as_bytes())
    }
}

/// Length-safe constant-time byte comparison; no early exit on mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn bearer_token_from_header(header_value: &str) -> Option<&str> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?;
    if token.is_empty() || parts.next().is_some() {
        return None;
    }
    Some(token)
}

/// Token from the request: `Authorization: Bearer` first, `token` query
/// parameter second.
pub fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(header) = parts.headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok())
        && let Some(token) = bearer_token_from_header(header)
    {
        return Some(token.to_string());
    }

    parts.uri.query().and_then(|q| {
        q.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token" && !value.is_empty()).then(|| value.to_string())
        })
    })
}

/// Middleware guarding the protected routes.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, BayError> {
    let (parts, body) = req.into_parts();

    let token = extract_token(&parts)
        .ok_or_else(|| BayError::Unauthorized("missing authorization".to_string()))?;
    if !auth.verify(&token) {
        return Err(BayError::Unauthorized("invalid access token".to_string()));
    }

    let req = axum::http::Request::from_parts(parts, body);
    Ok(next.run(req).await)
}

/// The session identity of a request, taken from the `X-SESSION-ID` header
/// and never inferred from anything else.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = BayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BayError::invalid(format!("missing {SESSION_HEADER} header")))?;
        Ok(SessionId(value.to_string()))
    }
}
