//! Authentication middleware.
//!
//! Two credentials are accepted:
//! - `X-API-Key: <secret>` for programmatic callers of the gateway endpoints
//! - `Authorization: Bearer <jwt>` for account owners managing keys
//!
//! On success a context is inserted into the request extensions; on failure
//! the request is rejected with 401 before reaching the handler.

use crate::{
    error::AppError,
    models::api_key::ApiKey,
    services::{key_registry, session},
    state::AppState,
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// `X-API-Key`, in the lower-case form header maps store.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Who is making the request. Present on every authenticated route.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub user_id: Uuid,
}

/// The API key a request authenticated with. Present on API-key routes.
#[derive(Debug, Clone)]
pub struct CurrentKey(pub ApiKey);

/// Require a valid, active API key.
///
/// # Flow
///
/// 1. Read `X-API-Key`
/// 2. Hash it and look up an active key with that hash
/// 3. Refresh `last_used_at` in the background
/// 4. Insert [`CurrentKey`] and [`CurrentUser`]
pub async fn api_key_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let secret = api_key_from(request.headers())
        .ok_or(AppError::Unauthenticated("API key is required"))?;
    let key = authenticate_key(&state, secret).await?;
    attach_key(&mut request, key);

    Ok(next.run(request).await)
}

/// Require a valid session token.
pub async fn session_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = authenticate_session(&state, request.headers())?;
    request.extensions_mut().insert(CurrentUser { user_id });

    Ok(next.run(request).await)
}

/// Accept either credential. An `X-API-Key` header, when present, wins.
pub async fn key_or_session_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match api_key_from(request.headers()) {
        Some(secret) => {
            let key = authenticate_key(&state, secret).await?;
            attach_key(&mut request, key);
        }
        None => {
            let user_id = authenticate_session(&state, request.headers())?;
            request.extensions_mut().insert(CurrentUser { user_id });
        }
    }

    Ok(next.run(request).await)
}

fn attach_key(request: &mut Request, key: ApiKey) {
    let extensions = request.extensions_mut();
    extensions.insert(CurrentUser { user_id: key.user_id });
    extensions.insert(CurrentKey(key));
}

fn api_key_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

async fn authenticate_key(state: &AppState, secret: &str) -> Result<ApiKey, AppError> {
    let key = key_registry::lookup(&state.pool, secret)
        .await?
        .ok_or(AppError::Unauthenticated("Invalid or inactive API key"))?;

    let pool = state.pool.clone();
    let key_id = key.id;
    tokio::spawn(async move { key_registry::touch_last_used(&pool, key_id).await });

    Ok(key)
}

fn authenticate_session(state: &AppState, headers: &HeaderMap) -> Result<Uuid, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(session::extract_bearer)
        .ok_or(AppError::Unauthenticated("Not authorized to access this route"))?;

    Ok(state.sessions.verify(token)?.sub)
}
