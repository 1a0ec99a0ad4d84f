//! Request/response stages composed around the router.
//!
//! - `authenticate`: resolves `Authorization: Token <key>` into a [`CurrentUser`]
//! - `authenticate_header`: tags 401 responses with `WWW-Authenticate: Token`
//! - `cache_control`: default `Cache-Control: max-age` on successful reads
//! - `etags`: `ETag` from the body digest, honouring `If-None-Match`

use crate::{config::AppConfig, errors::AppError, models::user::User};
use axum::{
    body::{Body, to_bytes},
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderValue, Method, StatusCode,
        header::{
            AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, ETAG, IF_NONE_MATCH, WWW_AUTHENTICATE,
        },
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

/// The authenticated requester.
///
/// As an extractor it rejects anonymous requests.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(AppError::authentication_required)
    }
}

/// Resolve token credentials. Requests without an `Authorization` header pass
/// through anonymously; an unknown token is rejected with 401.
pub async fn authenticate(
    State(db): State<Arc<SqlitePool>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if let Some(header) = header {
        let mut parts = header.split_whitespace();
        let scheme = parts.next().unwrap_or_default();
        if scheme.eq_ignore_ascii_case("token") {
            let (Some(key), None) = (parts.next(), parts.next()) else {
                return Err(AppError::invalid_token());
            };

            let user = sqlx::query_as::<_, User>(
                "SELECT u.id, u.username, u.first_name, u.last_name, u.email, u.date_joined
                 FROM auth_tokens t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.key = ?",
            )
            .bind(key)
            .fetch_optional(&*db)
            .await?;

            let Some(user) = user else {
                debug!("rejected unknown token");
                return Err(AppError::invalid_token());
            };
            debug!(user = %user.username, "authenticated request");
            req.extensions_mut().insert(CurrentUser(user));
        }
    }

    Ok(next.run(req).await)
}

/// Ask clients for token credentials instead of triggering basic-auth prompts.
pub async fn authenticate_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    if response.status() == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Token"));
    }
    response
}

/// Default cache lifetime for successful `GET`/`HEAD` responses.
pub async fn cache_control(
    State(config): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let cacheable = matches!(*req.method(), Method::GET | Method::HEAD);
    let mut response = next.run(req).await;

    if cacheable
        && response.status().is_success()
        && !response.headers().contains_key(CACHE_CONTROL)
    {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", config.cache_max_age)) {
            response.headers_mut().insert(CACHE_CONTROL, value);
        }
    }
    response
}

/// Weakly-cached reads: hash successful `GET` bodies into an `ETag` and
/// answer 304 when the client already holds that version.
pub async fn etags(req: Request, next: Next) -> Result<Response, AppError> {
    if req.method() != Method::GET {
        return Ok(next.run(req).await);
    }

    let if_none_match = req.headers().get(IF_NONE_MATCH).cloned();
    let response = next.run(req).await;
    if response.status() != StatusCode::OK {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes: Bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|err| AppError::internal(format!("buffering response body: {}", err)))?;

    let etag = format!("\"{:x}\"", md5::compute(&bytes));
    let Ok(etag_value) = HeaderValue::from_str(&etag) else {
        return Ok(Response::from_parts(parts, Body::from(bytes)));
    };
    parts.headers.insert(ETAG, etag_value);

    let matches = if_none_match
        .as_ref()
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| etag_matches(value, &etag));

    if matches {
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(CONTENT_LENGTH);
        return Ok(Response::from_parts(parts, Body::empty()));
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

/// `If-None-Match` holds `*` or a comma-separated list of (possibly weak) tags.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}
