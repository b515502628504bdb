//! In-memory gateways and a harness shared by the engine tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use ledger_bot::bot::{Action, ConversationEngine, EngineSettings, InboundEvent};
use ledger_bot::clock::FixedClock;
use ledger_bot::dialogue::Session;
use ledger_bot::errors::{GatewayError, GatewayResult};
use ledger_bot::ledger::{
    match_credential, Credential, ExpenseRow, IncomeRow, LedgerStore, SubcategoryRow,
};
use ledger_bot::media::{sniff_mime, MediaStore};
use ledger_bot::messaging::{Button, MessagingGateway};
use ledger_bot::session_store::SessionStore;

pub const ADMIN_PHONE: &str = "5491100000001";
pub const USER_PHONE: &str = "5491100000002";

pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

#[derive(Default)]
pub struct InMemoryLedger {
    pub credentials: Vec<Vec<String>>,
    pub categories: Mutex<Vec<String>>,
    pub subcategories: Vec<SubcategoryRow>,
    pub income: Mutex<Vec<IncomeRow>>,
    pub expenses: Mutex<Vec<ExpenseRow>>,
    pub fail_reads: AtomicBool,
    pub fail_subcategory_reads: AtomicBool,
    pub fail_appends: AtomicBool,
}

impl InMemoryLedger {
    pub fn sample() -> Self {
        let row = |cells: &[&str]| cells.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        let sub = |category: &str, subcategory: &str| SubcategoryRow {
            category: category.into(),
            subcategory: subcategory.into(),
        };
        Self {
            credentials: vec![
                row(&["Administrador", "ADM", "9999"]),
                row(&["Lucia Perez", "V1", "1234"]),
            ],
            categories: Mutex::new(vec!["Transporte".into(), "Servicios".into()]),
            subcategories: vec![
                sub("Transporte", "Taxi"),
                sub("Transporte", "Peaje"),
                sub("Comida", "Almuerzo"),
            ],
            ..Default::default()
        }
    }

    pub fn incomes(&self) -> Vec<IncomeRow> {
        self.income.lock().unwrap().clone()
    }

    pub fn expense_rows(&self) -> Vec<ExpenseRow> {
        self.expenses.lock().unwrap().clone()
    }

    fn check_reads(&self) -> GatewayResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                code: 503,
                body: "ledger unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn find_credential(
        &self,
        vendor_code: &str,
        identification: &str,
    ) -> GatewayResult<Option<Credential>> {
        self.check_reads()?;
        Ok(match_credential(&self.credentials, vendor_code, identification, "Administrador"))
    }

    async fn list_categories(&self) -> GatewayResult<Vec<String>> {
        self.check_reads()?;
        Ok(self.categories.lock().unwrap().clone())
    }

    async fn list_subcategory_rows(&self) -> GatewayResult<Vec<SubcategoryRow>> {
        self.check_reads()?;
        if self.fail_subcategory_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout("list_subcategories".into()));
        }
        Ok(self.subcategories.clone())
    }

    async fn append_income(&self, row: &IncomeRow) -> GatewayResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(GatewayError::Http("connection reset".into()));
        }
        self.income.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn append_expense(&self, row: &ExpenseRow) -> GatewayResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(GatewayError::Http("connection reset".into()));
        }
        self.expenses.lock().unwrap().push(row.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { to: String, body: String },
    Buttons { to: String, body: String, buttons: Vec<Button> },
}

impl Sent {
    pub fn body(&self) -> &str {
        match self {
            Sent::Text { body, .. } | Sent::Buttons { body, .. } => body,
        }
    }

    pub fn button_ids(&self) -> Vec<String> {
        match self {
            Sent::Buttons { buttons, .. } => buttons.iter().map(|b| b.id.clone()).collect(),
            Sent::Text { .. } => Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<Sent>>,
    pub fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl MessagingGateway for RecordingMessenger {
    async fn send_text(&self, to: &str, body: &str) -> GatewayResult<()> {
        self.sent.lock().unwrap().push(Sent::Text {
            to: to.into(),
            body: body.into(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Status { code: 500, body: "boom".into() });
        }
        Ok(())
    }

    async fn send_buttons(&self, to: &str, body: &str, buttons: &[Button]) -> GatewayResult<()> {
        self.sent.lock().unwrap().push(Sent::Buttons {
            to: to.into(),
            body: body.into(),
            buttons: buttons.to_vec(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Status { code: 500, body: "boom".into() });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub images: HashMap<String, Vec<u8>>,
    pub uploads: Mutex<Vec<String>>,
    pub fail_upload: AtomicBool,
}

impl FakeMedia {
    pub fn with_images() -> Self {
        Self {
            images: HashMap::from([
                ("photo-1".to_string(), PNG_BYTES.to_vec()),
                ("document-1".to_string(), b"%PDF-1.7 not an image".to_vec()),
            ]),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn fetch_inbound_image(&self, image_ref: &str) -> GatewayResult<Vec<u8>> {
        self.images
            .get(image_ref)
            .cloned()
            .ok_or_else(|| GatewayError::Status { code: 404, body: image_ref.into() })
    }

    async fn upload(&self, bytes: &[u8], folder: &str) -> GatewayResult<String> {
        sniff_mime(bytes)?;
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout("upload".into()));
        }
        let mut uploads = self.uploads.lock().unwrap();
        let url = format!("https://media.test/{folder}/{}.png", uploads.len() + 1);
        uploads.push(url.clone());
        Ok(url)
    }
}

/// Engine wired to in-memory gateways, with "today" fixed at 02/01/2024
pub struct Harness {
    pub engine: Arc<ConversationEngine>,
    pub sessions: Arc<SessionStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub messenger: Arc<RecordingMessenger>,
    pub media: Arc<FakeMedia>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ledger(InMemoryLedger::sample())
    }

    pub fn with_ledger(ledger: InMemoryLedger) -> Self {
        let sessions = Arc::new(SessionStore::new());
        let ledger = Arc::new(ledger);
        let messenger = Arc::new(RecordingMessenger::default());
        let media = Arc::new(FakeMedia::with_images());
        let engine = Arc::new(ConversationEngine::new(
            Arc::clone(&sessions),
            Arc::clone(&messenger) as Arc<dyn MessagingGateway>,
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&media) as Arc<dyn MediaStore>,
            Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())),
            EngineSettings {
                language: "es".into(),
                call_timeout: Duration::from_secs(2),
            },
        ));
        Self {
            engine,
            sessions,
            ledger,
            messenger,
            media,
        }
    }

    pub async fn text(&self, from: &str, body: &str) -> Vec<Sent> {
        self.engine.handle(InboundEvent::text(from, body)).await;
        self.messenger.take()
    }

    pub async fn press(&self, from: &str, id: &str) -> Vec<Sent> {
        self.engine.handle(InboundEvent::button(from, id)).await;
        self.messenger.take()
    }

    pub async fn photo(&self, from: &str, image_id: &str) -> Vec<Sent> {
        self.engine.handle(InboundEvent::image(from, image_id)).await;
        self.messenger.take()
    }

    pub async fn handle(&self, event: InboundEvent) -> Vec<Action> {
        let actions = self.engine.handle(event).await;
        self.messenger.take();
        actions
    }

    pub async fn session(&self, user: &str) -> Option<Session> {
        self.sessions.get(user).await
    }

    /// Walk a user through greeting and credential entry
    pub async fn login(&self, user: &str, vendor_code: &str, identification: &str) -> Vec<Sent> {
        self.text(user, "hola").await;
        self.press(user, "has_account").await;
        self.text(user, vendor_code).await;
        self.text(user, identification).await
    }

    pub async fn login_admin(&self) {
        self.login(ADMIN_PHONE, "ADM", "9999").await;
    }

    pub async fn login_user(&self) {
        self.login(USER_PHONE, "V1", "1234").await;
    }
}
