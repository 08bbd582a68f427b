use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chatrelay_agent::SessionView;
use chatrelay_core::{ChatId, RelayError};
use std::sync::Arc;
use tracing::warn;

/// A [`RelayError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::NotFound(_) | RelayError::NoActiveExchange => StatusCode::NOT_FOUND,
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Conflict(_) | RelayError::AlreadyReplied | RelayError::Terminated => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

/// `GET /api/v1/chats/{chat_id}`
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let chat_id: ChatId = chat_id.parse()?;
    let view = state.service.get_by_id(chat_id).await?;
    Ok(Json(view))
}
