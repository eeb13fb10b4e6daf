//! HTTP routing: which credential guards which route.
//!
//! | Route                        | Credential          |
//! |------------------------------|---------------------|
//! | `POST /use-case`             | API key             |
//! | `POST /reverse-transaction`  | API key             |
//! | `POST /multi-agent`          | API key             |
//! | `GET /transactions`          | API key or session  |
//! | `GET /transactions/{id}`     | session             |
//! | `POST /keys`, `GET /keys`    | session             |
//! | `GET /keys/{id}/usage`       | session             |
//! | `DELETE /keys/{id}`          | session             |
//! | `GET /downloads/{file}`      | signed link         |
//! | `GET /health`                | none                |

use crate::{
    handlers::{downloads, gateway, health, keys, transactions},
    middleware::{auth, ip_limit},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Room for the `text` field and multipart framing on top of the document.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.documents.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    // Layers added last run first: the IP cap sits in front of authentication.
    let gateway_routes = Router::new()
        .route("/use-case", post(gateway::use_case))
        .route("/reverse-transaction", post(gateway::reverse_transaction))
        .route("/multi-agent", post(gateway::multi_agent))
        .layer(DefaultBodyLimit::max(body_limit))
        .route_layer(from_fn_with_state(state.clone(), auth::api_key_auth))
        .route_layer(from_fn_with_state(state.clone(), ip_limit::ip_rate_limit));

    let shared_routes = Router::new()
        .route("/transactions", get(transactions::list_transactions))
        .route_layer(from_fn_with_state(state.clone(), auth::key_or_session_auth))
        .route_layer(from_fn_with_state(state.clone(), ip_limit::ip_rate_limit));

    let session_routes = Router::new()
        .route("/transactions/{id}", get(transactions::get_transaction))
        .route("/keys", post(keys::issue_key).get(keys::list_keys))
        .route("/keys/{id}", delete(keys::revoke_key))
        .route("/keys/{id}/usage", get(keys::key_usage))
        .route_layer(from_fn_with_state(state.clone(), auth::session_auth));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/downloads/{file}", get(downloads::download))
        .merge(gateway_routes)
        .merge(shared_routes)
        .merge(session_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
