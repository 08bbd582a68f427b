#![allow(clippy::unwrap_used, clippy::expect_used)]

use chatrelay_channels::{TelegramClient, TelegramNotifier, TEXT_ENDED};
use chatrelay_core::{Channel, ChatId, Identity};
use chatrelay_session::{EventHandler, EventOrigin, Exchange, SessionEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn origin(user: &str) -> EventOrigin {
    EventOrigin {
        chat_id: ChatId::new(),
        identity: Identity::new(Channel::Telegram, user),
    }
}

async fn notifier(server: &MockServer) -> TelegramNotifier {
    TelegramNotifier::new(Arc::new(TelegramClient::with_api_base("T0K", server.uri())))
}

#[tokio::test]
async fn test_reply_quotes_originating_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0K/sendMessage"))
        .and(body_json(json!({
            "chat_id": 42,
            "text": "pong",
            "reply_to_message_id": 11
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let mut exchange = Exchange::new("ping", "11@42");
    exchange.reply = "pong".into();
    let event = SessionEvent::ExchangeCompleted {
        origin: origin("42"),
        exchange,
    };
    notifier(&server)
        .await
        .handle(&CancellationToken::new(), &event)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_opened_sends_typing_action() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0K/sendChatAction"))
        .and(body_json(json!({"chat_id": 42, "action": "typing"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
        .expect(1)
        .mount(&server)
        .await;

    let event = SessionEvent::ExchangeOpened {
        origin: origin("42"),
        exchange: Exchange::new("ping", "11@42"),
    };
    notifier(&server)
        .await
        .handle(&CancellationToken::new(), &event)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ended_goes_to_private_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0K/sendMessage"))
        .and(body_json(json!({"chat_id": 77, "text": TEXT_ENDED})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let event = SessionEvent::SessionEnded {
        origin: origin("77"),
    };
    notifier(&server)
        .await
        .handle(&CancellationToken::new(), &event)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_api_refusal_is_channel_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0K/sendMessage"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .mount(&server)
        .await;

    let event = SessionEvent::SessionEnded {
        origin: origin("77"),
    };
    let err = notifier(&server)
        .await
        .handle(&CancellationToken::new(), &event)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("chat not found"));
}

#[tokio::test]
async fn test_started_makes_no_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(0)
        .mount(&server)
        .await;

    let event = SessionEvent::SessionStarted {
        origin: origin("42"),
    };
    notifier(&server)
        .await
        .handle(&CancellationToken::new(), &event)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_abandons_slow_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0K/sendMessage"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true, "result": {}}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let event = SessionEvent::SessionEnded {
        origin: origin("77"),
    };
    let notifier = notifier(&server).await;
    let err = tokio::time::timeout(Duration::from_secs(5), notifier.handle(&cancel, &event))
        .await
        .expect("cancelled send returns promptly")
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"));
}
