//! # Ledger Bot
//!
//! A WhatsApp bot that walks authenticated vendors through recording
//! income and expense entries, appending them to an external ledger and
//! storing receipt photos in a hosted media store.

pub mod bot;
pub mod category;
pub mod clock;
pub mod config;
pub mod dialogue;
pub mod errors;
pub mod ledger;
pub mod localization;
pub mod media;
pub mod messaging;
pub mod retry;
pub mod session_store;
pub mod validation;
