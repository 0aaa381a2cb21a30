//! Client RPCs. Each takes a JSON body and answers `{"ok": true, ...}`.

use axum::body::Bytes;
use axum::extract::State;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tracing::error;

use poolgrid_core::Coordinates;
use poolgrid_presence::LocationUpdate;

use crate::ApiState;
use crate::error::{ApiError, ApiResponse, Identity, parse_body};

type RpcResult = Result<axum::Json<ApiResponse<Value>>, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct CoordsBody {
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PoolBody {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct LocationBody {
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    data: Option<Value>,
}

/// Any present value, `null` included, is `Some`. Only a missing key is `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// POST /api/v1/rpc/join_cell
pub async fn join_cell(State(state): State<ApiState>, id: Identity, body: Bytes) -> RpcResult {
    let coords: CoordsBody = parse_body(&body)?;
    let (Some(lat), Some(lon)) = (coords.lat, coords.lon) else {
        return Err(ApiError::InvalidArgument("lat and lon are required".to_string()));
    };
    let cell = state.router.join_cell(&id.user_id, &id.session_id, lat, lon)?;
    Ok(ApiResponse::ok(json!({ "ok": true, "cell": cell })))
}

/// POST /api/v1/rpc/leave_cell
///
/// Without coordinates this is a no-op.
pub async fn leave_cell(State(state): State<ApiState>, id: Identity, body: Bytes) -> RpcResult {
    let coords: CoordsBody = parse_body(&body)?;
    let coords = match (coords.lat, coords.lon) {
        (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
        (None, None) => None,
        _ => {
            return Err(ApiError::InvalidArgument(
                "lat and lon must be given together".to_string(),
            ));
        }
    };
    let cell = state.router.leave_cell(&id.user_id, &id.session_id, coords)?;
    Ok(ApiResponse::ok(json!({ "ok": true, "cell": cell })))
}

/// POST /api/v1/rpc/join_pool
pub async fn join_pool(State(state): State<ApiState>, id: Identity, body: Bytes) -> RpcResult {
    let pool: PoolBody = parse_body(&body)?;
    let joined = state.router.join_pool(&id.user_id, &id.session_id, &pool.name)?;
    Ok(ApiResponse::ok(json!({ "ok": true, "joined": joined })))
}

/// POST /api/v1/rpc/leave_pool
pub async fn leave_pool(State(state): State<ApiState>, id: Identity, body: Bytes) -> RpcResult {
    let pool: PoolBody = parse_body(&body)?;
    state.router.leave_pool(&id.user_id, &id.session_id, &pool.name)?;
    Ok(ApiResponse::ok(json!({ "ok": true })))
}

/// POST /api/v1/rpc/send_location
pub async fn send_location(State(state): State<ApiState>, id: Identity, body: Bytes) -> RpcResult {
    let location: LocationBody = parse_body(&body)?;
    let update = LocationUpdate {
        lat: location.lat,
        lon: location.lon,
        data: location.data,
    };
    let outcome = state.router.send_location(&id.user_id, &id.session_id, update)?;

    match (outcome.cell, outcome.pool) {
        (Ok(cell), Ok(pool)) => Ok(ApiResponse::ok(json!({
            "ok": true,
            "cell": cell,
            "pool": pool,
        }))),
        (cell, pool) => {
            let failures: Vec<String> = [("cell", cell.err()), ("pool", pool.err())]
                .into_iter()
                .filter_map(|(path, e)| e.map(|e| format!("{path}: {e}")))
                .collect();
            error!(user_id = %id.user_id, failures = ?failures, "location send incomplete");
            Err(ApiError::Internal(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use poolgrid_core::PoolgridConfig;
    use poolgrid_presence::ChannelHub;
    use poolgrid_state::StateStore;

    fn test_state() -> (ApiState, ChannelHub) {
        ApiState::assemble(&PoolgridConfig::default(), StateStore::open_in_memory().unwrap(), None).unwrap()
    }

    fn caller() -> Identity {
        Identity {
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
        }
    }

    fn status(result: RpcResult) -> StatusCode {
        result.into_response().status()
    }

    #[tokio::test]
    async fn join_cell_requires_coordinates() {
        let (state, hub) = test_state();
        let _rx = hub.attach("u1", "s1");

        let r = join_cell(State(state.clone()), caller(), Bytes::from_static(b"{\"lat\": 1}")).await;
        assert_eq!(status(r), StatusCode::BAD_REQUEST);

        let r = join_cell(State(state), caller(), Bytes::from_static(b"{\"lat\": 1, \"lon\": 2}")).await;
        assert_eq!(status(r), StatusCode::OK);
        assert_eq!(hub.channels_of("s1"), vec!["cell_1.000000_2.000000"]);
    }

    #[tokio::test]
    async fn leave_cell_with_empty_body_is_noop() {
        let (state, hub) = test_state();
        let _rx = hub.attach("u1", "s1");
        join_cell(State(state.clone()), caller(), Bytes::from_static(b"{\"lat\": 0, \"lon\": 0}"))
            .await
            .unwrap();

        let r = leave_cell(State(state.clone()), caller(), Bytes::new()).await;
        assert_eq!(status(r), StatusCode::OK);
        assert_eq!(hub.channels_of("s1").len(), 1);

        let r = leave_cell(State(state), caller(), Bytes::from_static(b"{\"lat\": 0}")).await;
        assert_eq!(status(r), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn join_pool_on_unattached_session_is_internal_error() {
        let (state, _hub) = test_state();
        let r = join_pool(State(state), caller(), Bytes::from_static(b"{\"name\": \"AutoGroup_1\"}")).await;
        assert_eq!(status(r), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn send_location_rejects_missing_data() {
        let (state, _hub) = test_state();
        let r = send_location(State(state), caller(), Bytes::from_static(b"{\"lat\": 1, \"lon\": 2}")).await;
        assert_eq!(status(r), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_location_accepts_null_data() {
        let (state, hub) = test_state();
        let _rx = hub.attach("u1", "s1");
        let body = Bytes::from_static(b"{\"lat\": 1, \"lon\": 2, \"data\": null}");
        let r = send_location(State(state), caller(), body).await;
        assert_eq!(status(r), StatusCode::OK);
    }
}
