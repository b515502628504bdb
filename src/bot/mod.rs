//! Bot module for handling WhatsApp conversations
//!
//! This module is split into several submodules:
//! - `engine`: The per-user conversation state machine
//! - `ui_builder`: Creates menus and formats confirmation messages
//! - `webhook`: Axum routes receiving WhatsApp notifications

pub mod engine;
pub mod ui_builder;
pub mod webhook;

pub use engine::{Action, ConversationEngine, EngineSettings, InboundEvent, DEFAULT_CALL_TIMEOUT};
pub use webhook::{router, WebhookState};
