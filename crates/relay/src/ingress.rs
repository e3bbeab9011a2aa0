//! HTTP ingress
//!
//! The homeserver pushes transactions of room events to the relay. Each event
//! is handled on its own task; the transaction is acknowledged right away.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use deskrelay_shared::RoomEvent;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::relay::Relay;

/// How many transaction ids to remember for deduplication
const SEEN_TRANSACTIONS: usize = 1024;

#[derive(Clone)]
pub struct IngressState {
    relay: Arc<Relay>,
    hs_token: Arc<str>,
    seen: Arc<Mutex<LruCache<String, ()>>>,
}

impl IngressState {
    pub fn new(relay: Arc<Relay>) -> Self {
        let hs_token = Arc::from(relay.config().hs_token.as_str());
        let capacity = NonZeroUsize::new(SEEN_TRANSACTIONS).unwrap_or(NonZeroUsize::MIN);
        Self {
            relay,
            hs_token,
            seen: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }
}

/// Build the ingress router
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/_matrix/app/v1/transactions/:txn_id", put(push_transaction))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .with_state(IngressState::new(relay))
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("Missing access token")]
    Unauthorized,
    #[error("Invalid access token")]
    Forbidden,
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, errcode) = match self {
            IngressError::Unauthorized => (StatusCode::UNAUTHORIZED, "M_UNAUTHORIZED"),
            IngressError::Forbidden => (StatusCode::FORBIDDEN, "M_FORBIDDEN"),
        };
        let body = Json(json!({
            "errcode": errcode,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    events: Vec<Value>,
}

fn authorize(state: &IngressState, headers: &HeaderMap, query: &AuthQuery) -> Result<(), IngressError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(query.access_token.as_deref())
        .ok_or(IngressError::Unauthorized)?;

    if bool::from(presented.as_bytes().ct_eq(state.hs_token.as_bytes())) {
        Ok(())
    } else {
        Err(IngressError::Forbidden)
    }
}

async fn push_transaction(
    State(state): State<IngressState>,
    Path(txn_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    Json(transaction): Json<Transaction>,
) -> Result<Json<Value>, IngressError> {
    authorize(&state, &headers, &query)?;

    {
        let mut seen = state.seen.lock().unwrap_or_else(|p| p.into_inner());
        if seen.put(txn_id.clone(), ()).is_some() {
            tracing::debug!(txn_id = %txn_id, "Duplicate transaction acknowledged");
            return Ok(Json(json!({})));
        }
    }

    tracing::debug!(txn_id = %txn_id, events = transaction.events.len(), "Received transaction");
    for raw in transaction.events {
        let event: RoomEvent = match serde_json::from_value(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(txn_id = %txn_id, error = %e, "Skipping undecodable event");
                continue;
            }
        };
        let relay = Arc::clone(&state.relay);
        tokio::spawn(async move {
            let event_id = event.event_id.clone();
            let room_id = event.room_id.clone();
            if let Err(e) = relay.handle_event(event).await {
                tracing::error!(event_id = %event_id, room_id = %room_id, error = %e, "Event handling failed");
            }
        });
    }

    Ok(Json(json!({})))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sync_running: bool,
}

/// Health check endpoint
pub async fn health(State(state): State<IngressState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sync_running: state.relay.is_syncing(),
    })
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
