//! Category and subcategory lookup over the ledger's reference tables.

use std::sync::Arc;

use tracing::debug;

use crate::errors::GatewayResult;
use crate::ledger::LedgerStore;

/// Resolves expense categories and their subcategories
#[derive(Clone)]
pub struct CategoryResolver {
    ledger: Arc<dyn LedgerStore>,
}

impl CategoryResolver {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Category names in store order. Duplicates are kept; blank cells are
    /// skipped because they cannot be offered as options.
    pub async fn list_categories(&self) -> GatewayResult<Vec<String>> {
        let categories: Vec<String> = self
            .ledger
            .list_categories()
            .await?
            .into_iter()
            .filter(|name| !name.trim().is_empty())
            .collect();
        debug!(count = categories.len(), "Categories resolved");
        Ok(categories)
    }

    /// Subcategories whose category equals `category` after trimming both
    /// sides. An empty result is valid and means "no subcategory step".
    pub async fn list_subcategories(&self, category: &str) -> GatewayResult<Vec<String>> {
        let wanted = category.trim();
        let subcategories: Vec<String> = self
            .ledger
            .list_subcategory_rows()
            .await?
            .into_iter()
            .filter(|row| row.category.trim() == wanted)
            .map(|row| row.subcategory)
            .filter(|name| !name.trim().is_empty())
            .collect();
        debug!(category = wanted, count = subcategories.len(), "Subcategories resolved");
        Ok(subcategories)
    }
}
