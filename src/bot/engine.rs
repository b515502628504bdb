//! Conversation engine: the per-user state machine.
//!
//! `ConversationEngine::handle` takes one inbound event, holds the user's
//! session lock for the whole transition, performs the ledger and media
//! calls the step needs, commits the new session state and then delivers
//! the queued replies in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::category::CategoryResolver;
use crate::clock::Clock;
use crate::dialogue::{EntryStep, Flow, Session, Step};
use crate::errors::{GatewayError, GatewayResult};
use crate::ledger::{ExpenseRow, IncomeRow, LedgerStore};
use crate::localization::{t_args_lang, t_lang, DEFAULT_LANGUAGE};
use crate::media::MediaStore;
use crate::messaging::{Button, MessagingGateway};
use crate::session_store::SessionStore;
use crate::validation::{
    format_date, is_cancel, is_member, is_non_empty, is_valid_date, validate_free_text,
};

use super::ui_builder::{
    admin_menu, auth_choice_menu, date_menu, format_expense_summary, format_income_summary,
    image_choice_menu, income_confirm_menu, option_menu, yes_no_menu, ADD_EXPENSE_ID,
    ADD_INCOME_ID, CUSTOM_DATE_ID, HAS_ACCOUNT_ID, NO_ACCOUNT_ID, NO_ID, TODAY_ID, YESTERDAY_ID,
    YES_ID,
};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One inbound message, already stripped of transport details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub from: String,
    pub text: Option<String>,
    pub button_id: Option<String>,
    pub image_id: Option<String>,
}

impl InboundEvent {
    pub fn text(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            text: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn button(from: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            button_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn image(from: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            image_id: Some(image_id.into()),
            ..Default::default()
        }
    }

    /// Pressed button id, or the typed text when no button was pressed
    pub fn choice(&self) -> &str {
        self.button_id
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or("")
            .trim()
    }

    fn selects(&self, buttons: &[Button], id: &str) -> bool {
        let choice = self.choice();
        buttons.iter().any(|b| b.id == id && b.matches(choice))
    }

    fn is_cancel(&self) -> bool {
        match self.button_id.as_deref() {
            Some(id) => is_cancel(id),
            None => self.text.as_deref().is_some_and(is_cancel),
        }
    }
}

/// What the engine did while handling one event, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    SendText { to: String, body: String },
    SendButtons { to: String, body: String, buttons: Vec<Button> },
    AppendIncome(IncomeRow),
    AppendExpense(ExpenseRow),
    UploadMedia { folder: String, url: String },
}

/// Collects the actions of one transition
struct Turn {
    to: String,
    actions: Vec<Action>,
}

impl Turn {
    fn new(to: &str) -> Self {
        Self {
            to: to.to_string(),
            actions: Vec::new(),
        }
    }

    fn text(&mut self, body: String) {
        self.actions.push(Action::SendText {
            to: self.to.clone(),
            body,
        });
    }

    fn menu(&mut self, body: String, buttons: Vec<Button>) {
        self.actions.push(Action::SendButtons {
            to: self.to.clone(),
            body,
            buttons,
        });
    }

    fn record(&mut self, action: Action) {
        self.actions.push(action);
    }
}

/// Session outcome of a transition
enum Next {
    Keep(Session),
    Delete,
}

/// Runtime settings of the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub language: String,
    pub call_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// The conversation state machine
pub struct ConversationEngine {
    sessions: Arc<SessionStore>,
    messenger: Arc<dyn MessagingGateway>,
    ledger: Arc<dyn LedgerStore>,
    media: Arc<dyn MediaStore>,
    categories: CategoryResolver,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        messenger: Arc<dyn MessagingGateway>,
        ledger: Arc<dyn LedgerStore>,
        media: Arc<dyn MediaStore>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            sessions,
            messenger,
            categories: CategoryResolver::new(Arc::clone(&ledger)),
            ledger,
            media,
            clock,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn lang(&self) -> Option<&str> {
        Some(self.settings.language.as_str())
    }

    /// Handle one inbound event for its sender and return what was done
    pub async fn handle(&self, event: InboundEvent) -> Vec<Action> {
        let mut turn = Turn::new(&event.from);
        let deleted = {
            let mut slot = self.sessions.lock(&event.from).await;

            let next = match slot.get().cloned() {
                None => self.start(&event, &mut turn),
                Some(session) if !session.is_consistent() => self.reset(&session, &mut turn),
                Some(session) => {
                    debug!(user_id = %event.from, step = ?session.step, "Handling event");
                    self.transition(session, &event, &mut turn).await
                }
            };

            let deleted = match next {
                Next::Keep(session) => {
                    debug!(user_id = %event.from, step = ?session.step, "Session updated");
                    slot.put(session);
                    false
                }
                Next::Delete => {
                    slot.delete();
                    debug!(user_id = %event.from, "Session deleted");
                    true
                }
            };

            // Deliver while still holding the lock so replies to one user keep their order
            self.deliver(&turn.actions).await;
            deleted
        };

        if deleted {
            self.sessions.prune();
        }
        turn.actions
    }

    async fn deliver(&self, actions: &[Action]) {
        for action in actions {
            let result = match action {
                Action::SendText { to, body } => {
                    self.call("send_text", self.messenger.send_text(to, body)).await
                }
                Action::SendButtons { to, body, buttons } => {
                    self.call("send_buttons", self.messenger.send_buttons(to, body, buttons))
                        .await
                }
                _ => continue,
            };
            if let Err(e) = result {
                error!(error = %e, "Failed to deliver message");
            }
        }
    }

    /// Run an external call under the configured timeout
    async fn call<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = GatewayResult<T>>,
    ) -> GatewayResult<T> {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!(
                "{operation} exceeded {:?}",
                self.settings.call_timeout
            ))),
        }
    }

    fn start(&self, event: &InboundEvent, turn: &mut Turn) -> Next {
        info!(user_id = %event.from, "New conversation");
        turn.text(t_lang("greeting", self.lang()));
        turn.menu(t_lang("auth-choice-prompt", self.lang()), auth_choice_menu(self.lang()));
        Next::Keep(Session::new(&event.from, Step::AuthChoice))
    }

    /// Self-healing branch for a session whose data cannot support its step
    fn reset(&self, session: &Session, turn: &mut Turn) -> Next {
        warn!(user_id = %session.id, step = ?session.step, "Inconsistent session, resetting");
        turn.text(t_lang("reset-notice", self.lang()));
        turn.text(t_lang("greeting", self.lang()));
        Next::Delete
    }

    fn not_understood(&self, session: Session, turn: &mut Turn) -> Next {
        turn.text(t_lang("not-understood", self.lang()));
        Next::Keep(session)
    }

    fn service_error(&self, turn: &mut Turn, operation: &str, user_id: &str, error: &GatewayError) {
        warn!(user_id, operation, error = %error, "External call failed");
        turn.text(t_lang("service-error", self.lang()));
    }

    fn repeat_prompt(&self, mut session: Session, turn: &mut Turn) -> Next {
        session.step = Step::RepeatPrompt;
        turn.menu(t_lang("repeat-prompt", self.lang()), yes_no_menu(self.lang()));
        Next::Keep(session)
    }

    /// Validated free text, or the matching re-prompt
    fn free_text(&self, event: &InboundEvent, turn: &mut Turn) -> Option<String> {
        match validate_free_text(event.text.as_deref().unwrap_or("")) {
            Ok(text) => Some(text),
            Err("too_long") => {
                turn.text(t_lang("text-too-long", self.lang()));
                None
            }
            Err(_) => {
                turn.text(t_lang("text-empty", self.lang()));
                None
            }
        }
    }

    async fn transition(&self, session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        if session.step.requires_auth() && event.is_cancel() {
            info!(user_id = %session.id, step = ?session.step, "Operation cancelled");
            if session.step != Step::RepeatPrompt {
                turn.text(t_lang("operation-cancelled", self.lang()));
            }
            return self.repeat_prompt(session, turn);
        }

        match session.step {
            Step::AuthChoice => self.on_auth_choice(session, event, turn),
            Step::AuthVendor => self.on_vendor_code(session, event, turn),
            Step::AuthId => self.on_identification(session, event, turn).await,
            Step::AdminMenu => self.on_admin_menu(session, event, turn).await,
            Step::UserIncomeConfirm => self.on_income_confirm(session, event, turn),
            Step::ExpenseCategory => self.on_category(session, event, turn).await,
            Step::ExpenseSubcategory => self.on_subcategory(session, event, turn).await,
            Step::Entry(flow, EntryStep::Description) => self.on_description(session, flow, event, turn),
            Step::Entry(flow, EntryStep::Amount) => self.on_amount(session, flow, event, turn),
            Step::Entry(flow, EntryStep::ImageChoice) => {
                self.on_image_choice(session, flow, event, turn)
            }
            Step::Entry(flow, EntryStep::ImageWait) => {
                self.on_image(session, flow, event, turn).await
            }
            Step::Entry(flow, EntryStep::Date) => self.on_date(session, flow, event, turn).await,
            Step::Entry(flow, EntryStep::CustomDate) => {
                self.on_custom_date(session, flow, event, turn).await
            }
            Step::RepeatPrompt => self.on_repeat(session, event, turn),
        }
    }

    fn on_auth_choice(&self, mut session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        let menu = auth_choice_menu(self.lang());
        if event.selects(&menu, NO_ACCOUNT_ID) {
            info!(user_id = %session.id, "User without account");
            turn.text(t_lang("contact-admin", self.lang()));
            Next::Delete
        } else if event.selects(&menu, HAS_ACCOUNT_ID) {
            session.step = Step::AuthVendor;
            turn.text(t_lang("vendor-prompt", self.lang()));
            Next::Keep(session)
        } else {
            self.not_understood(session, turn)
        }
    }

    fn on_vendor_code(&self, mut session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        let Some(vendor_code) = self.free_text(event, turn) else {
            return Next::Keep(session);
        };
        session.vendor_code = Some(vendor_code);
        session.step = Step::AuthId;
        turn.text(t_lang("passcode-prompt", self.lang()));
        Next::Keep(session)
    }

    async fn on_identification(
        &self,
        mut session: Session,
        event: &InboundEvent,
        turn: &mut Turn,
    ) -> Next {
        let Some(identification) = self.free_text(event, turn) else {
            return Next::Keep(session);
        };
        let vendor_code = session.vendor_code.clone().unwrap_or_default();
        session.identification = Some(identification.clone());

        let lookup = self
            .call(
                "find_credential",
                self.ledger.find_credential(&vendor_code, &identification),
            )
            .await;

        match lookup {
            Ok(Some(credential)) => {
                info!(
                    user_id = %session.id,
                    vendor_code = %vendor_code,
                    is_admin = credential.is_admin,
                    "Credentials accepted"
                );
                turn.text(t_args_lang(
                    "welcome-user",
                    &[("name", credential.display_name.as_str())],
                    self.lang(),
                ));
                let step = if credential.is_admin {
                    turn.menu(t_lang("admin-menu-prompt", self.lang()), admin_menu(self.lang()));
                    Step::AdminMenu
                } else {
                    turn.menu(
                        t_lang("income-confirm-prompt", self.lang()),
                        income_confirm_menu(self.lang()),
                    );
                    Step::UserIncomeConfirm
                };
                Next::Keep(Session::authenticated(
                    &session.id,
                    vendor_code,
                    identification,
                    credential.is_admin,
                    step,
                ))
            }
            Ok(None) => {
                info!(user_id = %session.id, vendor_code = %vendor_code, "Credentials rejected");
                turn.text(t_lang("auth-failed", self.lang()));
                turn.text(t_lang("vendor-prompt", self.lang()));
                Next::Keep(Session::new(&session.id, Step::AuthVendor))
            }
            Err(e) => {
                self.service_error(turn, "find_credential", &session.id, &e);
                turn.text(t_lang("passcode-prompt", self.lang()));
                Next::Keep(session)
            }
        }
    }

    async fn on_admin_menu(&self, session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        let menu = admin_menu(self.lang());
        if event.selects(&menu, ADD_INCOME_ID) {
            self.start_entry(session, Flow::Income, turn)
        } else if event.selects(&menu, ADD_EXPENSE_ID) {
            self.offer_categories(session, turn).await
        } else {
            self.not_understood(session, turn)
        }
    }

    fn on_income_confirm(&self, session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        let menu = income_confirm_menu(self.lang());
        if event.selects(&menu, YES_ID) {
            self.start_entry(session, Flow::Income, turn)
        } else if event.selects(&menu, NO_ID) {
            self.repeat_prompt(session, turn)
        } else {
            self.not_understood(session, turn)
        }
    }

    fn start_entry(&self, mut session: Session, flow: Flow, turn: &mut Turn) -> Next {
        session.step = Step::Entry(flow, EntryStep::Description);
        turn.text(t_lang("description-prompt", self.lang()));
        Next::Keep(session)
    }

    async fn offer_categories(&self, mut session: Session, turn: &mut Turn) -> Next {
        match self.call("list_categories", self.categories.list_categories()).await {
            Ok(categories) if categories.is_empty() => {
                info!(user_id = %session.id, "No expense categories available");
                session.step = Step::ExpenseCategory;
                turn.menu(
                    t_lang("no-categories", self.lang()),
                    option_menu(&[], self.lang()),
                );
                Next::Keep(session)
            }
            Ok(categories) => {
                session.step = Step::ExpenseCategory;
                turn.menu(
                    t_lang("category-prompt", self.lang()),
                    option_menu(&categories, self.lang()),
                );
                Next::Keep(session)
            }
            Err(e) => {
                self.service_error(turn, "list_categories", &session.id, &e);
                turn.menu(t_lang("admin-menu-prompt", self.lang()), admin_menu(self.lang()));
                Next::Keep(session)
            }
        }
    }

    async fn on_category(&self, mut session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        let choice = event.choice();
        if !is_non_empty(choice) {
            turn.text(t_lang("text-empty", self.lang()));
            return Next::Keep(session);
        }
        let category = choice.trim().to_string();

        let subcategories = match self
            .call("list_subcategories", self.categories.list_subcategories(&category))
            .await
        {
            Ok(subcategories) => subcategories,
            Err(e) => {
                self.service_error(turn, "list_subcategories", &session.id, &e);
                self.resend_categories(turn).await;
                return Next::Keep(session);
            }
        };

        session.category = Some(category.clone());
        if subcategories.is_empty() {
            debug!(user_id = %session.id, category = %category, "No subcategories, skipping step");
            session.subcategory = Some(String::new());
            return self.start_entry(session, Flow::Expense, turn);
        }

        session.step = Step::ExpenseSubcategory;
        turn.menu(
            t_args_lang("subcategory-prompt", &[("category", category.as_str())], self.lang()),
            option_menu(&subcategories, self.lang()),
        );
        Next::Keep(session)
    }

    async fn on_subcategory(
        &self,
        mut session: Session,
        event: &InboundEvent,
        turn: &mut Turn,
    ) -> Next {
        let choice = event.choice();
        if !is_non_empty(choice) {
            turn.text(t_lang("text-empty", self.lang()));
            return Next::Keep(session);
        }

        let category = session.category.clone().unwrap_or_default();
        match self
            .call("list_subcategories", self.categories.list_subcategories(&category))
            .await
        {
            Ok(subcategories) if is_member(choice, &subcategories) => {
                session.subcategory = Some(choice.trim().to_string());
                self.start_entry(session, Flow::Expense, turn)
            }
            Ok(_) => self.not_understood(session, turn),
            Err(e) => {
                self.service_error(turn, "list_subcategories", &session.id, &e);
                // Options are unknown; a typed subcategory is still checked on the next try
                turn.menu(
                    t_args_lang("subcategory-prompt", &[("category", category.as_str())], self.lang()),
                    option_menu(&[], self.lang()),
                );
                Next::Keep(session)
            }
        }
    }

    /// Re-offer the category menu after a failed lookup at the category step
    async fn resend_categories(&self, turn: &mut Turn) {
        let categories = self
            .call("list_categories", self.categories.list_categories())
            .await
            .unwrap_or_default();
        turn.menu(
            t_lang("category-prompt", self.lang()),
            option_menu(&categories, self.lang()),
        );
    }

    fn on_description(
        &self,
        mut session: Session,
        flow: Flow,
        event: &InboundEvent,
        turn: &mut Turn,
    ) -> Next {
        let Some(description) = self.free_text(event, turn) else {
            return Next::Keep(session);
        };
        session.description = Some(description);
        session.step = Step::Entry(flow, EntryStep::Amount);
        turn.text(t_lang("amount-prompt", self.lang()));
        Next::Keep(session)
    }

    fn on_amount(&self, mut session: Session, flow: Flow, event: &InboundEvent, turn: &mut Turn) -> Next {
        let Some(amount) = self.free_text(event, turn) else {
            return Next::Keep(session);
        };
        session.amount = Some(amount);
        session.step = Step::Entry(flow, EntryStep::ImageChoice);
        turn.menu(
            t_lang("image-choice-prompt", self.lang()),
            image_choice_menu(flow, self.lang()),
        );
        Next::Keep(session)
    }

    fn on_image_choice(
        &self,
        mut session: Session,
        flow: Flow,
        event: &InboundEvent,
        turn: &mut Turn,
    ) -> Next {
        let menu = image_choice_menu(flow, self.lang());
        if event.selects(&menu, YES_ID) {
            session.step = Step::Entry(flow, EntryStep::ImageWait);
            turn.text(t_lang("image-prompt", self.lang()));
            Next::Keep(session)
        } else if event.selects(&menu, NO_ID) {
            self.ask_date(session, flow, turn)
        } else {
            self.not_understood(session, turn)
        }
    }

    fn ask_date(&self, mut session: Session, flow: Flow, turn: &mut Turn) -> Next {
        session.step = Step::Entry(flow, EntryStep::Date);
        turn.menu(t_lang("date-prompt", self.lang()), date_menu(self.lang()));
        Next::Keep(session)
    }

    async fn on_image(&self, mut session: Session, flow: Flow, event: &InboundEvent, turn: &mut Turn) -> Next {
        let Some(image_id) = event.image_id.as_deref() else {
            turn.text(t_lang("image-invalid", self.lang()));
            return Next::Keep(session);
        };

        match self.store_image(image_id, flow).await {
            Ok(url) => {
                turn.record(Action::UploadMedia {
                    folder: flow.folder().to_string(),
                    url: url.clone(),
                });
                session.image_url = Some(url);
                self.ask_date(session, flow, turn)
            }
            Err(GatewayError::UnsupportedMedia(reason)) => {
                info!(user_id = %session.id, reason = %reason, "Rejected receipt photo");
                turn.text(t_lang("image-invalid", self.lang()));
                Next::Keep(session)
            }
            Err(e) => {
                warn!(user_id = %session.id, error = %e, "Receipt photo could not be stored");
                turn.text(t_lang("image-upload-failed", self.lang()));
                Next::Keep(session)
            }
        }
    }

    async fn store_image(&self, image_id: &str, flow: Flow) -> GatewayResult<String> {
        let bytes = self
            .call("fetch_inbound_image", self.media.fetch_inbound_image(image_id))
            .await?;
        self.call("upload", self.media.upload(&bytes, flow.folder()))
            .await
    }

    async fn on_date(&self, mut session: Session, flow: Flow, event: &InboundEvent, turn: &mut Turn) -> Next {
        let menu = date_menu(self.lang());
        let date = if event.selects(&menu, TODAY_ID) {
            self.clock.today()
        } else if event.selects(&menu, YESTERDAY_ID) {
            self.clock.yesterday()
        } else if event.selects(&menu, CUSTOM_DATE_ID) {
            session.step = Step::Entry(flow, EntryStep::CustomDate);
            turn.text(t_lang("custom-date-prompt", self.lang()));
            return Next::Keep(session);
        } else {
            return self.not_understood(session, turn);
        };

        self.commit(session, flow, format_date(date), turn).await
    }

    async fn on_custom_date(
        &self,
        session: Session,
        flow: Flow,
        event: &InboundEvent,
        turn: &mut Turn,
    ) -> Next {
        let input = event.text.as_deref().unwrap_or("").trim();
        if !is_valid_date(input) {
            turn.text(t_lang("custom-date-invalid", self.lang()));
            return Next::Keep(session);
        }
        self.commit(session, flow, input.to_string(), turn).await
    }

    /// Append the finished entry, confirm it and offer another operation
    async fn commit(&self, mut session: Session, flow: Flow, date: String, turn: &mut Turn) -> Next {
        session.date = Some(date.clone());
        let description = session.description.clone().unwrap_or_default();
        let vendor_code = session.vendor_code.clone().unwrap_or_default();
        let amount = session.amount.clone().unwrap_or_default();
        let image_url = session.image_url.clone().unwrap_or_default();

        let (result, action, summary) = match flow {
            Flow::Income => {
                let row = IncomeRow {
                    date,
                    description,
                    vendor_code,
                    amount,
                    image_url,
                };
                let result = self.call("append_income", self.ledger.append_income(&row)).await;
                let summary = format_income_summary(&row, self.lang());
                (result, Action::AppendIncome(row), summary)
            }
            Flow::Expense => {
                let row = ExpenseRow {
                    date,
                    description,
                    vendor_code,
                    category: session.category.clone().unwrap_or_default(),
                    subcategory: session.subcategory.clone().unwrap_or_default(),
                    amount,
                    image_url,
                };
                let result = self.call("append_expense", self.ledger.append_expense(&row)).await;
                let summary = format_expense_summary(&row, self.lang());
                (result, Action::AppendExpense(row), summary)
            }
        };

        if let Err(e) = result {
            self.service_error(turn, "append", &session.id, &e);
            match session.step {
                Step::Entry(_, EntryStep::CustomDate) => {
                    turn.text(t_lang("custom-date-prompt", self.lang()))
                }
                _ => turn.menu(t_lang("date-prompt", self.lang()), date_menu(self.lang())),
            }
            return Next::Keep(session);
        }

        info!(user_id = %session.id, flow = ?flow, "Entry committed");
        turn.record(action);
        turn.text(summary);
        self.repeat_prompt(session, turn)
    }

    fn on_repeat(&self, mut session: Session, event: &InboundEvent, turn: &mut Turn) -> Next {
        let menu = yes_no_menu(self.lang());
        if event.selects(&menu, YES_ID) {
            session.step = Step::AuthVendor;
            turn.text(t_lang("vendor-prompt", self.lang()));
            Next::Keep(session)
        } else if event.selects(&menu, NO_ID) {
            info!(user_id = %session.id, "Conversation finished");
            turn.text(t_lang("farewell", self.lang()));
            Next::Delete
        } else {
            self.not_understood(session, turn)
        }
    }
}
