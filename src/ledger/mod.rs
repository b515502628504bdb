//! Ledger store gateway.
//!
//! The ledger is the external tabular store holding credentials, the
//! category reference tables and the appended income/expense rows.
//! - `sheets`: Google Sheets backend
//! - `postgres`: SQL backend

pub mod postgres;
pub mod sheets;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayResult;

pub use postgres::PgLedger;
pub use sheets::{ServiceAccountKey, SheetsLedger};

/// Names of the reference and destination tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    pub credentials: String,
    pub categories: String,
    pub subcategories: String,
    pub income: String,
    pub expense: String,
    /// Display name that marks a credential row as administrator
    pub admin_name: String,
}

impl Default for LedgerLayout {
    fn default() -> Self {
        Self {
            credentials: "Clientes".to_string(),
            categories: "Categorias".to_string(),
            subcategories: "Subcategorias".to_string(),
            income: "Ingresos".to_string(),
            expense: "Egresos".to_string(),
            admin_name: "Administrador".to_string(),
        }
    }
}

/// A validated credential row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub display_name: String,
    pub is_admin: bool,
}

/// One row of the subcategory reference table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryRow {
    pub category: String,
    pub subcategory: String,
}

/// A completed income entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeRow {
    pub date: String,
    pub description: String,
    pub vendor_code: String,
    pub amount: String,
    pub image_url: String,
}

/// A completed expense entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRow {
    pub date: String,
    pub description: String,
    pub vendor_code: String,
    pub category: String,
    pub subcategory: String,
    pub amount: String,
    pub image_url: String,
}

/// Operations the conversation needs from the ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Exact match of vendor code and identification against the credential table
    async fn find_credential(
        &self,
        vendor_code: &str,
        identification: &str,
    ) -> GatewayResult<Option<Credential>>;

    /// First column of the category table, in store order
    async fn list_categories(&self) -> GatewayResult<Vec<String>>;

    /// Every row of the subcategory table, unfiltered
    async fn list_subcategory_rows(&self) -> GatewayResult<Vec<SubcategoryRow>>;

    async fn append_income(&self, row: &IncomeRow) -> GatewayResult<()>;

    async fn append_expense(&self, row: &ExpenseRow) -> GatewayResult<()>;
}

/// Resolve a credential from raw `[name, vendor_code, identification]` rows.
///
/// The first row whose vendor code matches decides; its identification must
/// match too.
pub fn match_credential(
    rows: &[Vec<String>],
    vendor_code: &str,
    identification: &str,
    admin_name: &str,
) -> Option<Credential> {
    let row = rows
        .iter()
        .find(|row| row.get(1).map(String::as_str) == Some(vendor_code))?;

    if row.get(2).map(String::as_str) != Some(identification) {
        return None;
    }

    let display_name = row.first().cloned().unwrap_or_default();
    Some(Credential {
        is_admin: display_name == admin_name,
        display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<String>> {
        vec![
            vec!["Administrador".into(), "ADM".into(), "9999".into()],
            vec!["Lucia Perez".into(), "V1".into(), "1234".into()],
            vec!["Duplicado".into(), "V1".into(), "5678".into()],
            vec!["Sin clave".into(), "V2".into()],
        ]
    }

    #[test]
    fn test_match_credential_regular_user() {
        let credential = match_credential(&rows(), "V1", "1234", "Administrador").unwrap();
        assert_eq!(credential.display_name, "Lucia Perez");
        assert!(!credential.is_admin);
    }

    #[test]
    fn test_match_credential_admin() {
        let credential = match_credential(&rows(), "ADM", "9999", "Administrador").unwrap();
        assert!(credential.is_admin);
    }

    #[test]
    fn test_first_vendor_row_decides() {
        assert!(match_credential(&rows(), "V1", "5678", "Administrador").is_none());
    }

    #[test]
    fn test_match_is_exact() {
        assert!(match_credential(&rows(), "v1", "1234", "Administrador").is_none());
        assert!(match_credential(&rows(), "V1", "1234 ", "Administrador").is_none());
        assert!(match_credential(&rows(), "V2", "", "Administrador").is_none());
        assert!(match_credential(&rows(), "V9", "1234", "Administrador").is_none());
    }
}
