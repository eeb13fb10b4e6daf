//! Shared application state handed to every handler and middleware.

use crate::{
    config::Config,
    db::DbPool,
    services::{
        ai_client::AiClient, document_store::DocumentStore, gateway::Gateway,
        rate_limiter::RateLimiter, session::SessionKeys,
    },
};
use axum::extract::FromRef;
use governor::{
    Quota, RateLimiter as KeyedLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore,
};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Coarse per-address limiter in front of the API-key routes.
pub type IpRateLimiter = KeyedLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub sessions: Arc<SessionKeys>,
    pub documents: Arc<DocumentStore>,
    pub gateway: Arc<Gateway>,
    /// `None` when `IP_RATE_LIMIT_PER_HOUR` is 0
    pub ip_limiter: Option<Arc<IpRateLimiter>>,
}

impl AppState {
    /// Build every service from `config` once; nothing reads the environment afterwards.
    pub fn new(config: &Config, pool: DbPool) -> anyhow::Result<Self> {
        let documents = Arc::new(DocumentStore::from_config(config)?);
        let ai = AiClient::from_config(config)?;
        let gateway = Gateway::new(
            pool.clone(),
            ai,
            Arc::clone(&documents),
            RateLimiter::default(),
        );

        let ip_limiter = NonZeroU32::new(config.ip_rate_limit_per_hour)
            .map(|per_hour| Arc::new(IpRateLimiter::keyed(Quota::per_hour(per_hour))));

        Ok(Self {
            pool,
            sessions: Arc::new(SessionKeys::new(config.jwt_secret.as_bytes())),
            documents,
            gateway: Arc::new(gateway),
            ip_limiter,
        })
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
