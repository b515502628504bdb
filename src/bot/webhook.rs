//! HTTP surface for the WhatsApp Cloud API webhook.
//!
//! - `GET /webhook`: subscription handshake, echoes `hub.challenge`
//! - `POST /webhook`: inbound notifications, acknowledged immediately
//! - `GET /health`: liveness probe

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::engine::{ConversationEngine, InboundEvent};

/// Shared state for the webhook handlers
pub struct WebhookState {
    pub verify_token: String,
    pub engine: Arc<ConversationEngine>,
}

/// Build the router serving the webhook and health endpoints
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", get(verify_handler).post(notification_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Constant-time comparison of the configured and presented tokens
pub fn validate_secret(config_secret: &str, request_secret: &str) -> bool {
    let a = config_secret.as_bytes();
    let b = request_secret.as_bytes();

    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

async fn health_handler() -> impl IntoResponse {
    serde_json::json!({"status": "ok", "service": "ledger-bot"}).to_string()
}

async fn verify_handler(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<WebhookState>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params.get("hub.verify_token").map(String::as_str).unwrap_or("");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe" && validate_secret(&state.verify_token, token) {
        info!("Webhook subscription verified");
        (StatusCode::OK, challenge)
    } else {
        warn!(mode, "Webhook verification rejected");
        (StatusCode::FORBIDDEN, String::new())
    }
}

/// Acknowledges every notification with 200 and handles its messages in the background
async fn notification_handler(State(state): State<Arc<WebhookState>>, body: String) -> StatusCode {
    let events = match serde_json::from_str::<WebhookPayload>(&body) {
        Ok(payload) => payload.into_events(),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed webhook payload");
            return StatusCode::OK;
        }
    };

    if events.is_empty() {
        debug!("Notification without messages");
        return StatusCode::OK;
    }

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        // Sequential so events from one payload keep their order
        for event in events {
            engine.handle(event).await;
        }
    });

    StatusCode::OK
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    pub from: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: Option<TextBody>,
    pub interactive: Option<Interactive>,
    pub button: Option<QuickReply>,
    pub image: Option<MediaRef>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct Interactive {
    pub button_reply: Option<Reply>,
    pub list_reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
pub struct Reply {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Template quick-reply button
#[derive(Debug, Deserialize)]
pub struct QuickReply {
    pub payload: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaRef {
    pub id: String,
}

impl WebhookPayload {
    pub fn into_events(self) -> Vec<InboundEvent> {
        self.entry
            .into_iter()
            .flat_map(|entry| entry.changes)
            .flat_map(|change| change.value.messages)
            .map(WhatsAppMessage::into_event)
            .collect()
    }
}

impl WhatsAppMessage {
    pub fn into_event(self) -> InboundEvent {
        let reply = self
            .interactive
            .and_then(|i| i.button_reply.or(i.list_reply));

        let (button_id, text) = match (reply, self.button) {
            (Some(reply), _) => (Some(reply.id), Some(reply.title)),
            (None, Some(quick)) => (quick.payload.or(quick.text.clone()), quick.text),
            (None, None) => (None, self.text.map(|t| t.body)),
        };

        if self.kind == "image" && self.image.is_none() {
            debug!(from = %self.from, "Image message without media id");
        }

        InboundEvent {
            from: self.from,
            text,
            button_id,
            image_id: self.image.map(|m| m.id),
        }
    }
}
