//! PostgreSQL ledger backend.
//!
//! Mirrors the spreadsheet layout in tables. Amounts and identifications are
//! stored as TEXT exactly as entered.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{debug, info};

use super::{Credential, ExpenseRow, IncomeRow, LedgerLayout, LedgerStore, SubcategoryRow};
use crate::errors::{GatewayError, GatewayResult};

/// Initialize the database schema
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing ledger schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS credentials (
            id BIGSERIAL PRIMARY KEY,
            display_name TEXT NOT NULL,
            vendor_code TEXT NOT NULL,
            identification TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create credentials table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS categories (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create categories table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS subcategories (
            id BIGSERIAL PRIMARY KEY,
            category TEXT NOT NULL,
            name TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create subcategories table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS income_entries (
            id BIGSERIAL PRIMARY KEY,
            entry_date TEXT NOT NULL,
            description TEXT NOT NULL,
            vendor_code TEXT NOT NULL,
            amount TEXT NOT NULL,
            image_url TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create income_entries table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS expense_entries (
            id BIGSERIAL PRIMARY KEY,
            entry_date TEXT NOT NULL,
            description TEXT NOT NULL,
            vendor_code TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL,
            amount TEXT NOT NULL,
            image_url TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create expense_entries table")?;

    info!("Ledger schema initialized successfully");
    Ok(())
}

/// Ledger stored in PostgreSQL
pub struct PgLedger {
    pool: PgPool,
    admin_name: String,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            admin_name: LedgerLayout::default().admin_name,
        }
    }

    pub fn admin_name(mut self, admin_name: impl Into<String>) -> Self {
        self.admin_name = admin_name.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn find_credential(
        &self,
        vendor_code: &str,
        identification: &str,
    ) -> GatewayResult<Option<Credential>> {
        // First row with this vendor code decides, like the spreadsheet lookup
        let row = sqlx::query(
            "SELECT display_name, identification FROM credentials
             WHERE vendor_code = $1 ORDER BY id LIMIT 1",
        )
        .bind(vendor_code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let stored_identification: String = row.try_get("identification")?;
        if stored_identification != identification {
            return Ok(None);
        }

        let display_name: String = row.try_get("display_name")?;
        Ok(Some(Credential {
            is_admin: display_name == self.admin_name,
            display_name,
        }))
    }

    async fn list_categories(&self) -> GatewayResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(GatewayError::from))
            .collect()
    }

    async fn list_subcategory_rows(&self) -> GatewayResult<Vec<SubcategoryRow>> {
        let rows = sqlx::query("SELECT category, name FROM subcategories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> GatewayResult<SubcategoryRow> {
                Ok(SubcategoryRow {
                    category: row.try_get("category")?,
                    subcategory: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn append_income(&self, row: &IncomeRow) -> GatewayResult<()> {
        sqlx::query(
            "INSERT INTO income_entries (entry_date, description, vendor_code, amount, image_url)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&row.date)
        .bind(&row.description)
        .bind(&row.vendor_code)
        .bind(&row.amount)
        .bind(&row.image_url)
        .execute(&self.pool)
        .await?;
        debug!(vendor_code = %row.vendor_code, "Income entry stored");
        Ok(())
    }

    async fn append_expense(&self, row: &ExpenseRow) -> GatewayResult<()> {
        sqlx::query(
            "INSERT INTO expense_entries
                (entry_date, description, vendor_code, category, subcategory, amount, image_url)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&row.date)
        .bind(&row.description)
        .bind(&row.vendor_code)
        .bind(&row.category)
        .bind(&row.subcategory)
        .bind(&row.amount)
        .bind(&row.image_url)
        .execute(&self.pool)
        .await?;
        debug!(vendor_code = %row.vendor_code, "Expense entry stored");
        Ok(())
    }
}
