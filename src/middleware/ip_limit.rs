//! Coarse per-address request cap in front of the API-key routes.

use crate::{error::AppError, state::AppState};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Reject the request with 429 once its peer address used up its hourly quota.
///
/// Passes through when the cap is disabled or the peer address is unknown
/// (e.g. a router driven directly in tests).
pub async fn ip_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiter) = state.ip_limiter.as_deref() else {
        return Ok(next.run(request).await);
    };

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        let ip = addr.ip();
        if limiter.check_key(&ip).is_err() {
            tracing::warn!(ip = %ip, "IP rate limit exceeded");
            return Err(AppError::IpRateLimited);
        }
    }

    Ok(next.run(request).await)
}
