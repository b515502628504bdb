//! Google Sheets ledger backend.
//!
//! Talks to the Sheets REST API v4 with reqwest. Access tokens come from a
//! service-account key (RS256 JWT bearer grant) and are cached until shortly
//! before they expire.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    match_credential, Credential, ExpenseRow, IncomeRow, LedgerLayout, LedgerStore, SubcategoryRow,
};
use crate::errors::{check_status, GatewayError, GatewayResult};
use crate::retry::{with_retry, RecoveryConfig};

pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a Google service-account key file we use
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account file {}", path.display()))?;
        serde_json::from_str(&raw).context("Failed to parse service account file")
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

enum TokenSource {
    ServiceAccount {
        client_email: String,
        token_uri: String,
        encoding_key: EncodingKey,
        cached: Mutex<Option<CachedToken>>,
    },
    Static(String),
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    values: [&'a [String]; 1],
}

/// Ledger stored in a Google spreadsheet
pub struct SheetsLedger {
    client: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    layout: LedgerLayout,
    recovery: RecoveryConfig,
    tokens: TokenSource,
}

impl SheetsLedger {
    /// Create a ledger authenticated with a service-account key
    pub fn with_service_account(
        client: reqwest::Client,
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        key: ServiceAccountKey,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Service account private key is not a valid RSA PEM")?;
        Ok(Self::build(
            client,
            api_base,
            spreadsheet_id,
            TokenSource::ServiceAccount {
                client_email: key.client_email,
                token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                encoding_key,
                cached: Mutex::new(None),
            },
        ))
    }

    /// Create a ledger with a pre-issued access token
    pub fn with_access_token(
        client: reqwest::Client,
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self::build(client, api_base, spreadsheet_id, TokenSource::Static(token.into()))
    }

    fn build(
        client: reqwest::Client,
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        tokens: TokenSource,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            spreadsheet_id: spreadsheet_id.into(),
            layout: LedgerLayout::default(),
            recovery: RecoveryConfig::default(),
            tokens,
        }
    }

    pub fn layout(mut self, layout: LedgerLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    async fn access_token(&self) -> GatewayResult<String> {
        let (client_email, token_uri, encoding_key, cached) = match &self.tokens {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount {
                client_email,
                token_uri,
                encoding_key,
                cached,
            } => (client_email, token_uri, encoding_key, cached),
        };

        let mut cached = cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: client_email,
            scope: SPREADSHEETS_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, encoding_key)
            .map_err(|e| GatewayError::Auth(format!("Failed to sign assertion: {e}")))?;

        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = check_status(response).await.map_err(|e| match e {
            GatewayError::Status { code, body } if code == 400 || code == 401 => {
                GatewayError::Auth(format!("Token exchange rejected ({code}): {body}"))
            }
            other => other,
        })?;
        let token: TokenResponse = response.json().await?;

        info!(expires_in = token.expires_in, "Obtained Sheets access token");
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn values_url(&self, range: &str, suffix: &str) -> GatewayResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| GatewayError::Config(format!("Invalid Sheets API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config("Sheets API base cannot be a base URL".into()))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    /// Read a range as rows of strings; rows may be ragged
    async fn read_range(&self, range: &str) -> GatewayResult<Vec<Vec<String>>> {
        let url = &self.values_url(range, "")?;
        let ledger = self;
        with_retry(&self.recovery, "sheets.read", move || async move {
            let token = ledger.access_token().await?;
            let response = ledger
                .client
                .get(url.clone())
                .bearer_auth(token)
                .send()
                .await?;
            let body: ValueRange = check_status(response).await?.json().await?;
            Ok(body
                .values
                .into_iter()
                .map(|row| row.into_iter().map(cell_to_string).collect())
                .collect())
        })
        .await
    }

    async fn append_cells(&self, sheet: &str, cells: &[String]) -> GatewayResult<()> {
        let mut url = self.values_url(&format!("{sheet}!A1"), ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let token = self.access_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&AppendBody { values: [cells] })
            .send()
            .await?;
        check_status(response).await?;
        debug!(sheet, columns = cells.len(), "Row appended");
        Ok(())
    }
}

/// Appends are `USER_ENTERED`, so typed text that starts like a formula is
/// stored as a literal by prefixing an apostrophe.
fn escape_formula(cell: &str) -> String {
    if cell.starts_with(['=', '+', '-', '@']) {
        format!("'{cell}")
    } else {
        cell.to_string()
    }
}

/// Signed numbers keep their sign so the sheet still reads them as amounts
fn escape_amount(cell: &str) -> String {
    let numeric = cell
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '+' | '-' | ' '));
    if numeric {
        cell.to_string()
    } else {
        escape_formula(cell)
    }
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl LedgerStore for SheetsLedger {
    async fn find_credential(
        &self,
        vendor_code: &str,
        identification: &str,
    ) -> GatewayResult<Option<Credential>> {
        let rows = self
            .read_range(&format!("{}!A2:C", self.layout.credentials))
            .await?;
        Ok(match_credential(
            &rows,
            vendor_code,
            identification,
            &self.layout.admin_name,
        ))
    }

    async fn list_categories(&self) -> GatewayResult<Vec<String>> {
        let rows = self
            .read_range(&format!("{}!A2:A", self.layout.categories))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    async fn list_subcategory_rows(&self) -> GatewayResult<Vec<SubcategoryRow>> {
        let rows = self
            .read_range(&format!("{}!A2:B", self.layout.subcategories))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                let category = cells.next()?;
                let subcategory = cells.next()?;
                Some(SubcategoryRow {
                    category,
                    subcategory,
                })
            })
            .collect())
    }

    async fn append_income(&self, row: &IncomeRow) -> GatewayResult<()> {
        let cells = vec![
            row.date.clone(),
            escape_formula(&row.description),
            escape_formula(&row.vendor_code),
            escape_amount(&row.amount),
            row.image_url.clone(),
        ];
        self.append_cells(&self.layout.income, &cells).await
    }

    async fn append_expense(&self, row: &ExpenseRow) -> GatewayResult<()> {
        let cells = vec![
            row.date.clone(),
            escape_formula(&row.description),
            escape_formula(&row.vendor_code),
            escape_formula(&row.category),
            escape_formula(&row.subcategory),
            escape_amount(&row.amount),
            row.image_url.clone(),
        ];
        self.append_cells(&self.layout.expense, &cells).await
    }
}
