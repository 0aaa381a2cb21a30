//! Response envelope, error mapping, and caller identity.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use poolgrid_presence::RouterError;
use poolgrid_presence::router::{INTERNAL, INVALID_ARGUMENT};

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-session-id";

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// Identity headers missing.
    Unauthorized(String),
    /// Malformed payload or missing field. No state was changed.
    InvalidArgument(String),
    NotFound(String),
    /// A lock could not be taken within its retry budget.
    Contended(String),
    /// A store or transport call failed.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Contended(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn parts(self) -> (Option<i32>, String) {
        match self {
            ApiError::InvalidArgument(m) => (Some(INVALID_ARGUMENT), m),
            ApiError::Internal(m) => (Some(INTERNAL), m),
            ApiError::Unauthorized(m) | ApiError::NotFound(m) | ApiError::Contended(m) => (None, m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = self.parts();
        (
            status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(message),
                code,
            }),
        )
            .into_response()
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        if e.is_input() {
            ApiError::InvalidArgument(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

/// Decode a JSON body. An empty body decodes as `{}`.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidArgument(format!("invalid payload: {e}")))
}

/// The calling user and session, as set by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub session_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
        };
        Ok(Identity {
            user_id: header(USER_HEADER)?,
            session_id: header(SESSION_HEADER)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Coords {
        lat: Option<f64>,
        lon: Option<f64>,
    }

    #[test]
    fn empty_body_decodes_as_empty_object() {
        let coords: Coords = parse_body(b"").unwrap();
        assert_eq!(coords, Coords { lat: None, lon: None });
        let coords: Coords = parse_body(b"  \n").unwrap();
        assert_eq!(coords.lat, None);
    }

    #[test]
    fn malformed_body_is_invalid_argument() {
        let err = parse_body::<Coords>(b"{lat:").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn router_errors_map_by_kind() {
        let input: ApiError = RouterError::InvalidArgument("x".to_string()).into();
        assert_eq!(input.status(), StatusCode::BAD_REQUEST);

        let transport: ApiError =
            RouterError::Transport(poolgrid_core::TransportError::SessionClosed("s".to_string())).into();
        assert_eq!(transport.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn identity_requires_both_headers() {
        let (mut parts, _) = Request::builder()
            .header(USER_HEADER, "u1")
            .body(())
            .unwrap()
            .into_parts();
        let err = Identity::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let (mut parts, _) = Request::builder()
            .header(USER_HEADER, "u1")
            .header(SESSION_HEADER, "s1")
            .body(())
            .unwrap()
            .into_parts();
        let id = Identity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(
            id,
            Identity {
                user_id: "u1".to_string(),
                session_id: "s1".to_string()
            }
        );
    }
}
