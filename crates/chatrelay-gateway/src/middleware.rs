use crate::webhook::validate_secret;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Header Telegram sets on webhook calls when a secret was registered.
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Webhook authentication settings.
#[derive(Clone, Debug, Default)]
pub struct WebhookAuth {
    /// Expected secret token. `None` = no check.
    pub secret: Option<String>,
}

impl WebhookAuth {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Returns true if a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

/// Rejects webhook calls whose secret token header does not match.
pub async fn telegram_secret_middleware(
    State(auth): State<Arc<WebhookAuth>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = auth.secret.as_deref() else {
        return next.run(request).await;
    };

    let rejection = match request
        .headers()
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(token) if validate_secret(expected, token) => None,
        Some(_) => Some("Invalid secret token"),
        None => Some("Secret token required"),
    };

    match rejection {
        None => next.run(request).await,
        Some(reason) => {
            warn!(reason, "Rejected webhook call");
            (StatusCode::UNAUTHORIZED, reason).into_response()
        }
    }
}
