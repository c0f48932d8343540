use super::dto::ErrorResponse;
use crate::application::chat::ChatError;
use axum::Json;
use axum::http::StatusCode;

/// Shape an orchestrator rejection as a REST error tuple.
pub(crate) fn chat_error_response(error: &ChatError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match error {
        ChatError::ModelResolution(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_structured_errors() {
        let (status, body) =
            chat_error_response(&ChatError::ModelResolution("no default".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.error.contains("no default"));
    }
}
