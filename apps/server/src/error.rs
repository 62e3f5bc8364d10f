use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use remus_shared::error::RemusError;

/// Newtype wrapper for `RemusError` that implements `IntoResponse`.
///
/// Needed because of the orphan rule — neither the trait (`IntoResponse`)
/// nor the type (`RemusError`) is defined in this crate.
#[derive(Debug)]
pub struct ServerError(pub RemusError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            RemusError::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            RemusError::Unauthorized => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            RemusError::AuthorityUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            RemusError::Forbidden => (StatusCode::FORBIDDEN, self.0.to_string()),
            RemusError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            // State-invariant violations surface as 400, matching the
            // delete-@everyone contract.
            RemusError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RemusError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.0.to_string()),
            RemusError::UploadTooLarge(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RemusError::InvalidDatabase(msg) | RemusError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<RemusError> for ServerError {
    fn from(e: RemusError) -> Self {
        ServerError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let response = ServerError(RemusError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let response = ServerError(RemusError::Unauthorized).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn authority_unavailable_maps_to_503() {
        let response = ServerError(RemusError::AuthorityUnavailable).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let response = ServerError(RemusError::Forbidden).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn conflict_maps_to_400_state_invariant() {
        let response =
            ServerError(RemusError::Conflict("@everyone cannot be deleted".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upload_too_large_maps_to_400_with_message() {
        let response =
            ServerError(RemusError::UploadTooLarge("file exceeds 25 MB".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let response = ServerError(RemusError::RateLimited).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn error_responses_are_json_with_error_field() {
        let response = ServerError(RemusError::NotFound).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "not found");
    }
}
