//! # Configuration Module
//!
//! Environment-driven settings for the ledger bot. `Config::from_env` reads
//! the process environment; `Config::from_lookup` takes any key lookup so
//! tests can supply their own values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::ledger::sheets::DEFAULT_SHEETS_API_BASE;
use crate::ledger::LedgerLayout;
use crate::localization::DEFAULT_LANGUAGE;
use crate::media::{DEFAULT_CLOUDINARY_API_BASE, MAX_MEDIA_BYTES};
use crate::messaging::DEFAULT_GRAPH_API_BASE;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

/// Which ledger backend stores credentials, categories and entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackend {
    Sheets {
        spreadsheet_id: String,
        service_account_file: PathBuf,
        api_base: String,
    },
    Postgres {
        database_url: String,
    },
}

/// Receipt photo hosting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    pub cloud_name: String,
    pub upload_preset: String,
    pub api_base: String,
    pub max_bytes: usize,
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub verify_token: String,
    pub whatsapp_token: String,
    pub phone_number_id: String,
    pub whatsapp_api_base: String,
    pub ledger: LedgerBackend,
    pub layout: LedgerLayout,
    pub media: MediaConfig,
    pub language: String,
    pub call_timeout: Duration,
    pub session_idle_timeout: Duration,
    pub utc_offset_minutes: i32,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).with_context(|| format!("{key} must be set"));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let ledger = match or("LEDGER_BACKEND", "sheets").to_lowercase().as_str() {
            "sheets" => LedgerBackend::Sheets {
                spreadsheet_id: require("GOOGLE_SHEET_ID")?,
                service_account_file: PathBuf::from(require("GOOGLE_SERVICE_ACCOUNT_FILE")?),
                api_base: or("SHEETS_API_BASE", DEFAULT_SHEETS_API_BASE),
            },
            "postgres" => LedgerBackend::Postgres {
                database_url: require("DATABASE_URL")?,
            },
            other => bail!("Unknown LEDGER_BACKEND '{other}', expected 'sheets' or 'postgres'"),
        };

        let defaults = LedgerLayout::default();
        let layout = LedgerLayout {
            credentials: or("SHEET_CREDENTIALS", &defaults.credentials),
            categories: or("SHEET_CATEGORIES", &defaults.categories),
            subcategories: or("SHEET_SUBCATEGORIES", &defaults.subcategories),
            income: or("SHEET_INCOME", &defaults.income),
            expense: or("SHEET_EXPENSE", &defaults.expense),
            admin_name: or("ADMIN_NAME", &defaults.admin_name),
        };

        let media = MediaConfig {
            cloud_name: require("CLOUDINARY_CLOUD_NAME")?,
            upload_preset: require("CLOUDINARY_UPLOAD_PRESET")?,
            api_base: or("CLOUDINARY_API_BASE", DEFAULT_CLOUDINARY_API_BASE),
            max_bytes: parse_or(get("MEDIA_MAX_BYTES"), "MEDIA_MAX_BYTES", MAX_MEDIA_BYTES)?,
        };

        let language = or("BOT_LANGUAGE", DEFAULT_LANGUAGE).to_lowercase();
        let call_timeout_secs: u64 = parse_or(
            get("CALL_TIMEOUT_SECS"),
            "CALL_TIMEOUT_SECS",
            DEFAULT_CALL_TIMEOUT_SECS,
        )?;
        if call_timeout_secs == 0 {
            bail!("CALL_TIMEOUT_SECS must be greater than zero");
        }
        let session_idle_secs: u64 = parse_or(
            get("SESSION_IDLE_TIMEOUT_SECS"),
            "SESSION_IDLE_TIMEOUT_SECS",
            DEFAULT_SESSION_IDLE_SECS,
        )?;
        if session_idle_secs == 0 {
            bail!("SESSION_IDLE_TIMEOUT_SECS must be greater than zero");
        }

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            verify_token: require("WEBHOOK_VERIFY_TOKEN")?,
            whatsapp_token: require("WHATSAPP_TOKEN")?,
            phone_number_id: require("WHATSAPP_PHONE_NUMBER_ID")?,
            whatsapp_api_base: or("WHATSAPP_API_BASE", DEFAULT_GRAPH_API_BASE),
            ledger,
            layout,
            media,
            language,
            call_timeout: Duration::from_secs(call_timeout_secs),
            session_idle_timeout: Duration::from_secs(session_idle_secs),
            utc_offset_minutes: parse_or(get("UTC_OFFSET_MINUTES"), "UTC_OFFSET_MINUTES", 0)?,
            json_logs: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {key} '{raw}': {e}")),
        None => Ok(default),
    }
}
