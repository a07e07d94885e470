//! HTTP middleware for api-guard
//!
//! This module provides middleware layers for:
//! - API token authentication and rate limiting
//! - Session-only access to the administration routes
//! - Request spans and completion logging
//!
//! It also defines the request extensions through which downstream handlers
//! learn who is calling.

use axum::{
    extract::{Query, Request, State},
    http::{header, Extensions, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{Admission, AuthManager};
use crate::database::Database;
use crate::error::AuthError;
use crate::models::{ContextUser, Identity, SessionUser};

/// Offset added to identity IDs to form context user IDs
///
/// Keeps token-derived users from colliding with session user IDs.
pub const API_VIRTUAL_USER_ID_OFFSET: i64 = 1_000_000;

/// Header carrying a bare API token
pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Query parameter carrying an API token
pub const API_TOKEN_QUERY_PARAM: &str = "api_token";

/// Identity admitted by token, inserted into request extensions
#[derive(Clone, Debug)]
pub struct ApiIdentity(pub Identity);

/// Identity admitted by token for this request, if any
pub fn api_identity(extensions: &Extensions) -> Option<&Identity> {
    extensions.get::<ApiIdentity>().map(|api| &api.0)
}

/// User the request acts as
///
/// Prefers the token-derived user and falls back to an upstream session.
pub fn context_user(extensions: &Extensions) -> Option<ContextUser> {
    extensions.get::<ContextUser>().cloned().or_else(|| {
        extensions
            .get::<SessionUser>()
            .cloned()
            .map(ContextUser::from)
    })
}

/// Context user synthesized for an identity
pub fn virtual_user(identity: &Identity) -> ContextUser {
    ContextUser {
        id: API_VIRTUAL_USER_ID_OFFSET + identity.id,
        username: format!("api:{}", identity.name),
    }
}

/// Extract a candidate API token from a request
///
/// Sources in order: `Authorization: Bearer <t>` (scheme case-insensitive),
/// the `X-API-Token` header, the `api_token` query parameter. Values are
/// trimmed and the first non-empty one wins.
pub fn extract_api_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .and_then(|v| {
            let scheme = v.get(..7)?;
            scheme.eq_ignore_ascii_case("bearer ").then(|| v[7..].trim())
        })
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let header_token = headers
        .get(API_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = header_token {
        return Some(token.to_string());
    }

    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove(API_TOKEN_QUERY_PARAM))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// API authentication middleware function
///
/// This middleware:
/// 1. Extracts a candidate token and any upstream session user
/// 2. Asks the auth manager to admit the request
/// 3. Publishes `ApiIdentity` and `ContextUser` for downstream handlers
pub async fn api_auth_middleware<D: Database + 'static>(
    State(auth_manager): State<Arc<AuthManager<D>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthResponse> {
    let token = extract_api_token(request.headers(), request.uri());
    let session = request.extensions().get::<SessionUser>().cloned();

    let admission = auth_manager
        .admit(token.as_deref(), session.as_ref())
        .await
        .map_err(AuthResponse::from_error)?;

    match admission {
        Admission::Token(identity) => {
            tracing::Span::current().record("api.identity_id", identity.id);
            request.extensions_mut().insert(virtual_user(&identity));
            request.extensions_mut().insert(ApiIdentity(identity));
        }
        Admission::Session(user) => {
            request.extensions_mut().insert(ContextUser::from(user));
        }
    }

    Ok(next.run(request).await)
}

/// Session-only gate for the administration routes
///
/// Requires a `SessionUser` published by an upstream session layer. API tokens
/// are never consulted here, so a token-admitted identity cannot manage
/// identities or settings, its own quota included. Rejections use the same
/// empty 404 as the API gate.
pub async fn session_admin_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, AuthResponse> {
    if api_identity(request.extensions()).is_some() {
        tracing::debug!("Token-admitted request refused on admin route");
        return Err(AuthResponse::not_found());
    }

    let Some(user) = request.extensions().get::<SessionUser>().cloned() else {
        tracing::debug!("Admin request without session refused");
        return Err(AuthResponse::not_found());
    };

    request.extensions_mut().insert(ContextUser::from(user));
    Ok(next.run(request).await)
}

/// Authentication error response
///
/// Rejections are indistinguishable from a missing route, except for rate
/// limiting which tells a legitimate caller to back off.
#[derive(Debug)]
pub struct AuthResponse {
    status: StatusCode,
    body: Option<serde_json::Value>,
}

impl AuthResponse {
    /// Empty 404, indistinguishable from a missing route
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: None,
        }
    }

    pub fn from_error(error: AuthError) -> Self {
        match error {
            AuthError::RateLimited => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: Some(serde_json::json!({ "error": "rate limit exceeded" })),
            },
            AuthError::MissingToken
            | AuthError::MalformedToken
            | AuthError::UnknownOrDisabledIdentity
            | AuthError::SecretMismatch
            | AuthError::StoreUnavailable => Self::not_found(),
        }
    }
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Request span middleware function
///
/// Wraps each request in a span carrying method, path, status and, once the
/// gate has admitted a token, the identity ID. Logs completion with duration.
/// The query string is never recorded.
pub async fn request_span_middleware(request: Request, next: Next) -> Response {
    use tracing::Instrument;

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        http.method = %method,
        http.path = %path,
        http.status_code = tracing::field::Empty,
        api.identity_id = tracing::field::Empty,
    );

    async move {
        let response = next.run(request).await;
        let status = response.status();

        tracing::Span::current().record("http.status_code", status.as_u16());
        tracing::info!(
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}
