//! Outbound message delivery.
//!
//! The conversation engine only needs two operations: plain text and a
//! menu of reply buttons. `WhatsAppMessenger` implements them on the
//! WhatsApp Cloud API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::errors::{check_status, GatewayResult};
use crate::localization::t_lang;

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// Reply buttons allowed in one interactive button message
pub const MAX_REPLY_BUTTONS: usize = 3;
/// Rows allowed in one interactive list message
pub const MAX_LIST_ROWS: usize = 10;
const BUTTON_TITLE_LIMIT: usize = 20;
const ROW_TITLE_LIMIT: usize = 24;

/// A selectable option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Whether a typed or pressed input selects this option
    pub fn matches(&self, input: &str) -> bool {
        let input = input.trim();
        !input.is_empty()
            && (input.eq_ignore_ascii_case(self.id.trim())
                || input.eq_ignore_ascii_case(self.title.trim()))
    }
}

/// Outbound delivery used by the conversation engine
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> GatewayResult<()>;

    async fn send_buttons(&self, to: &str, body: &str, buttons: &[Button]) -> GatewayResult<()>;
}

/// Truncate to at most `limit` characters, marking the cut with an ellipsis
pub fn truncate_title(title: &str, limit: usize) -> String {
    if title.chars().count() <= limit {
        return title.to_string();
    }
    let mut out: String = title.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Labels of an interactive list: the opening button and the section title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListLabels {
    pub button: String,
    pub section: String,
}

impl ListLabels {
    pub fn localized(language: Option<&str>) -> Self {
        Self {
            button: truncate_title(&t_lang("list-button", language), BUTTON_TITLE_LIMIT),
            section: truncate_title(&t_lang("list-section", language), ROW_TITLE_LIMIT),
        }
    }
}

/// WhatsApp Cloud API client
pub struct WhatsAppMessenger {
    client: reqwest::Client,
    api_base: String,
    phone_number_id: String,
    token: String,
    list_labels: ListLabels,
}

impl WhatsAppMessenger {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        phone_number_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            phone_number_id: phone_number_id.into(),
            token: token.into(),
            list_labels: ListLabels::localized(None),
        }
    }

    /// Localize the list-message labels
    pub fn language(mut self, language: &str) -> Self {
        self.list_labels = ListLabels::localized(Some(language));
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_base.trim_end_matches('/'),
            self.phone_number_id
        )
    }

    async fn post(&self, payload: serde_json::Value) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Build the interactive payloads for a menu. Up to three options go out as
/// reply buttons; longer menus become list messages of at most ten rows.
pub fn menu_payloads(
    to: &str,
    body: &str,
    buttons: &[Button],
    labels: &ListLabels,
) -> Vec<serde_json::Value> {
    if buttons.len() <= MAX_REPLY_BUTTONS {
        let buttons: Vec<_> = buttons
            .iter()
            .map(|b| {
                json!({
                    "type": "reply",
                    "reply": { "id": b.id, "title": truncate_title(&b.title, BUTTON_TITLE_LIMIT) }
                })
            })
            .collect();
        return vec![json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": { "buttons": buttons }
            }
        })];
    }

    buttons
        .chunks(MAX_LIST_ROWS)
        .map(|chunk| {
            let rows: Vec<_> = chunk
                .iter()
                .map(|b| json!({ "id": b.id, "title": truncate_title(&b.title, ROW_TITLE_LIMIT) }))
                .collect();
            json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "interactive",
                "interactive": {
                    "type": "list",
                    "body": { "text": body },
                    "action": {
                        "button": labels.button,
                        "sections": [{ "title": labels.section, "rows": rows }]
                    }
                }
            })
        })
        .collect()
}

#[async_trait]
impl MessagingGateway for WhatsAppMessenger {
    async fn send_text(&self, to: &str, body: &str) -> GatewayResult<()> {
        self.post(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "text": { "body": body }
        }))
        .await?;
        debug!(to, "Text message delivered");
        Ok(())
    }

    async fn send_buttons(&self, to: &str, body: &str, buttons: &[Button]) -> GatewayResult<()> {
        for payload in menu_payloads(to, body, buttons, &self.list_labels) {
            self.post(payload).await?;
        }
        debug!(to, options = buttons.len(), "Menu delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_matching() {
        let button = Button::new("yes", "Sí");
        assert!(button.matches("yes"));
        assert!(button.matches(" YES "));
        assert!(button.matches("Sí"));
        assert!(!button.matches("no"));
        assert!(!button.matches(""));
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("Corto", 20), "Corto");
        let long = truncate_title("Mantenimiento de vehículos", 20);
        assert_eq!(long.chars().count(), 20);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_small_menu_uses_reply_buttons() {
        let buttons = vec![Button::new("yes", "Sí"), Button::new("no", "No")];
        let payloads = menu_payloads("549", "¿Continuar?", &buttons, &ListLabels::localized(None));
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["interactive"]["type"], "button");
        assert_eq!(payloads[0]["interactive"]["action"]["buttons"][1]["reply"]["id"], "no");
    }

    #[test]
    fn test_large_menu_is_split_into_lists() {
        let buttons: Vec<_> = (0..12)
            .map(|i| Button::new(format!("cat{i}"), format!("Categoría {i}")))
            .collect();
        let payloads = menu_payloads("549", "Elegí", &buttons, &ListLabels::localized(None));
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["interactive"]["type"], "list");
        assert_eq!(payloads[0]["interactive"]["action"]["button"], "Ver opciones");
        let rows = payloads[1]["interactive"]["action"]["sections"][0]["rows"]
            .as_array()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], "cat11");
    }

    #[test]
    fn test_list_labels_follow_language() {
        let buttons: Vec<_> = (0..4).map(|i| Button::new(format!("c{i}"), "x")).collect();
        let payloads = menu_payloads("549", "Pick", &buttons, &ListLabels::localized(Some("en")));
        let action = &payloads[0]["interactive"]["action"];
        assert_eq!(action["button"], "See options");
        assert_eq!(action["sections"][0]["title"], "Options");
    }
}
