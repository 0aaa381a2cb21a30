//! Session hooks and read-mostly listings.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use poolgrid_balancer::{JoinOutcome, LeaveOutcome, ListFilter};
use poolgrid_state::PointOfInterest;

use crate::ApiState;
use crate::error::{ApiError, ApiResponse, Identity, parse_body};

/// Body of the connect/disconnect hooks.
#[derive(Debug, Deserialize)]
pub struct SessionEvent {
    pub user_id: String,
    pub session_id: String,
}

impl SessionEvent {
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let event: SessionEvent = parse_body(body)?;
        if event.user_id.trim().is_empty() || event.session_id.trim().is_empty() {
            return Err(ApiError::InvalidArgument(
                "user_id and session_id are required".to_string(),
            ));
        }
        Ok(event)
    }
}

// ── Sessions ───────────────────────────────────────────────────

/// POST /api/v1/sessions/connect
pub async fn connect(State(state): State<ApiState>, body: Bytes) -> Response {
    let event = match SessionEvent::parse(&body) {
        Ok(e) => e,
        Err(e) => return e.into_response(),
    };

    let connected = state.lifecycle.on_connect(&event.user_id, &event.session_id).await;
    state
        .outboxes
        .lock()
        .await
        .insert(event.session_id.clone(), connected.outbox);

    match connected.outcome {
        Some(JoinOutcome::Placed(placement)) => ApiResponse::ok(json!({
            "pool": placement.pool.name,
            "pool_id": placement.pool.id,
            "created": placement.created,
            "migrated": placement.migrated,
        }))
        .into_response(),
        Some(JoinOutcome::Contended) => {
            ApiError::Contended("join lock contended, user not placed".to_string()).into_response()
        }
        None => ApiError::Internal("placement failed".to_string()).into_response(),
    }
}

/// POST /api/v1/sessions/disconnect
pub async fn disconnect(State(state): State<ApiState>, body: Bytes) -> Response {
    let event = match SessionEvent::parse(&body) {
        Ok(e) => e,
        Err(e) => return e.into_response(),
    };

    let gone = state.lifecycle.on_disconnect(&event.user_id, &event.session_id).await;
    state.outboxes.lock().await.remove(&event.session_id);

    match gone.outcome {
        Some(LeaveOutcome::Removed(departure)) => ApiResponse::ok(json!({
            "removed": true,
            "pool": departure.pool.name,
            "backfilled": departure.backfilled,
            "rebalance": departure.rebalance,
            "channels": gone.channels,
        }))
        .into_response(),
        Some(LeaveOutcome::NotMember) => ApiResponse::ok(json!({
            "removed": false,
            "channels": gone.channels,
        }))
        .into_response(),
        Some(LeaveOutcome::Contended) => {
            ApiError::Contended("leave lock contended, session detached".to_string()).into_response()
        }
        None => ApiError::Internal("departure failed, session detached".to_string()).into_response(),
    }
}

/// GET /api/v1/sessions/events
///
/// Everything queued for the caller's session since the last poll.
pub async fn events(State(state): State<ApiState>, identity: Identity) -> Response {
    let mut outboxes = state.outboxes.lock().await;
    let Some(outbox) = outboxes.get_mut(&identity.session_id) else {
        return ApiError::NotFound("session not connected".to_string()).into_response();
    };
    let mut drained = Vec::new();
    while let Ok(envelope) = outbox.try_recv() {
        drained.push(envelope);
    }
    debug!(session_id = %identity.session_id, count = drained.len(), "outbox drained");
    ApiResponse::ok(drained).into_response()
}

// ── Pools ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PoolSummary {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    pub members: usize,
    pub created_at: u64,
}

/// GET /api/v1/pools
pub async fn list_pools(State(state): State<ApiState>) -> Response {
    let directory = state.directory();
    let pools = match directory.list(&ListFilter::default()) {
        Ok(p) => p,
        Err(e) => return ApiError::Internal(e.to_string()).into_response(),
    };

    let mut summaries = Vec::with_capacity(pools.len());
    for pool in pools {
        let members = match directory.count(&pool.id) {
            Ok(n) => n,
            Err(e) => return ApiError::Internal(e.to_string()).into_response(),
        };
        summaries.push(PoolSummary {
            id: pool.id,
            name: pool.name,
            capacity: pool.capacity,
            members,
            created_at: pool.created_at,
        });
    }
    ApiResponse::ok(summaries).into_response()
}

// ── Points of interest ─────────────────────────────────────────

/// GET /api/v1/pois
pub async fn list_pois(State(state): State<ApiState>) -> Response {
    match state.pois.list() {
        Ok(pois) => ApiResponse::ok(pois).into_response(),
        Err(e) => ApiError::Internal(e.to_string()).into_response(),
    }
}

/// POST /api/v1/pois
pub async fn push_poi(State(state): State<ApiState>, body: Bytes) -> Response {
    let poi: PointOfInterest = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    match state.pois.upsert(&poi) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(poi)).into_response(),
        Err(e) => {
            warn!(poi = poi.id, error = %e, "poi push failed");
            ApiError::Internal(e.to_string()).into_response()
        }
    }
}
