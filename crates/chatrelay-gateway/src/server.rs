use crate::api::get_chat;
use crate::middleware::{telegram_secret_middleware, WebhookAuth};
use crate::webhook::telegram_callback;
use axum::{middleware as axum_mw, response::IntoResponse, routing::get, routing::post, Json, Router};
use chatrelay_agent::ChatService;
use chatrelay_channels::TelegramClient;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub service: ChatService,
    /// Client used to acknowledge Telegram commands. `None` disables acks.
    pub telegram: Option<Arc<TelegramClient>>,
}

/// The HTTP surface of chatrelay.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router without webhook authentication.
    pub fn build(service: ChatService, telegram: Option<Arc<TelegramClient>>) -> Router {
        Self::build_with_auth(service, telegram, WebhookAuth::default())
    }

    /// Build the router, checking the Telegram secret token when configured.
    pub fn build_with_auth(
        service: ChatService,
        telegram: Option<Arc<TelegramClient>>,
        auth: WebhookAuth,
    ) -> Router {
        let state = Arc::new(AppState { service, telegram });

        let webhooks: Router<Arc<AppState>> = Router::new()
            .route("/api/v1/telegram/callback", post(telegram_callback))
            .layer(axum_mw::from_fn_with_state(
                Arc::new(auth),
                telegram_secret_middleware,
            ));

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/v1/chats/{chat_id}", get(get_chat))
            .merge(webhooks)
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "chatrelay"}))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chatrelay_agent::{CompletionGateway, ServiceConfig};
    use chatrelay_core::RelayResult;
    use chatrelay_session::{Dispatcher, MemorySessionStore, Session};
    use tower::ServiceExt;

    struct Unused;

    #[async_trait]
    impl CompletionGateway for Unused {
        fn name(&self) -> &str {
            "unused"
        }

        async fn complete(&self, _session: &Session) -> RelayResult<String> {
            Ok("unused".into())
        }
    }

    fn app() -> Router {
        let service = ChatService::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(Dispatcher::builder().start()),
            Arc::new(Unused),
            ServiceConfig::default(),
        );
        GatewayServer::build(service, None)
    }

    #[tokio::test]
    async fn test_health_in_process() {
        let resp = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let resp = app()
            .oneshot(Request::get("/api/v2/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_without_secret_accepts_updates() {
        let resp = app()
            .oneshot(
                Request::post("/api/v1/telegram/callback")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"update_id": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
