use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_core::HeraldError;
use serde_json::json;

/// `HeraldError` rendered as an HTTP response.
///
/// Body: `{ "error": { "code": "CAPACITY_EXCEEDED", "message": "..." } }`
#[derive(Debug)]
pub struct ApiError(pub HeraldError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            HeraldError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            HeraldError::CapacityExceeded { .. } | HeraldError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            HeraldError::ConnectionNotFound { .. } | HeraldError::ServerNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            HeraldError::Protocol(_) | HeraldError::Validation(_) => StatusCode::BAD_REQUEST,
            HeraldError::ConnectionClosed { .. } => StatusCode::GONE,
            HeraldError::Transport { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<HeraldError> for ApiError {
    fn from(e: HeraldError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_map_to_client_visible_statuses() {
        assert_eq!(
            ApiError(HeraldError::MethodNotAllowed { method: "POST".into() }).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError(HeraldError::CapacityExceeded { active: 1, max: 1 }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError(HeraldError::ShuttingDown).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError(HeraldError::ConnectionNotFound { id: "x".into() }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(HeraldError::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
