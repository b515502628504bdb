//! Conversation state for the ledger dialogue.
//!
//! A user without a session is implicitly at the initial step; every other
//! position in the conversation is one of the `Step` variants below.

use serde::{Deserialize, Serialize};

/// Which kind of ledger entry is being recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Income,
    Expense,
}

impl Flow {
    /// Folder name used for receipt uploads
    pub fn folder(self) -> &'static str {
        match self {
            Flow::Income => "income",
            Flow::Expense => "expense",
        }
    }
}

/// Steps shared by the income and expense flows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStep {
    Description,
    Amount,
    ImageChoice,
    ImageWait,
    Date,
    CustomDate,
}

/// Represents the position of a user in the conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    AuthChoice,
    AuthVendor,
    AuthId,
    AdminMenu,
    UserIncomeConfirm,
    ExpenseCategory,
    ExpenseSubcategory,
    Entry(Flow, EntryStep),
    RepeatPrompt,
}

impl Step {
    /// Steps that can only be reached after a successful credential check
    pub fn requires_auth(self) -> bool {
        !matches!(self, Step::AuthChoice | Step::AuthVendor | Step::AuthId)
    }

    /// Steps only an administrator can reach
    pub fn requires_admin(self) -> bool {
        matches!(
            self,
            Step::AdminMenu
                | Step::ExpenseCategory
                | Step::ExpenseSubcategory
                | Step::Entry(Flow::Expense, _)
        )
    }
}

/// Per-user conversational memory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub step: Step,
    pub vendor_code: Option<String>,
    pub identification: Option<String>,
    /// Set once, right after a successful credential check
    pub is_admin: Option<bool>,
    pub description: Option<String>,
    /// Raw amount exactly as typed; the ledger owns its interpretation
    pub amount: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub image_url: Option<String>,
    pub date: Option<String>,
}

impl Session {
    /// A fresh session at the given step
    pub fn new(id: impl Into<String>, step: Step) -> Self {
        Self {
            id: id.into(),
            step,
            ..Default::default()
        }
    }

    /// A fresh session for a user whose credentials were just validated
    pub fn authenticated(
        id: impl Into<String>,
        vendor_code: String,
        identification: String,
        is_admin: bool,
        step: Step,
    ) -> Self {
        Self {
            id: id.into(),
            step,
            vendor_code: Some(vendor_code),
            identification: Some(identification),
            is_admin: Some(is_admin),
            ..Default::default()
        }
    }

    /// Whether the stored data can support the current step
    pub fn is_consistent(&self) -> bool {
        if !self.step.requires_auth() {
            return true;
        }
        if self.vendor_code.is_none() || self.is_admin.is_none() {
            return false;
        }
        if self.step.requires_admin() && self.is_admin != Some(true) {
            return false;
        }
        true
    }
}
