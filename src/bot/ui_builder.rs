//! UI Builder module for creating menus and formatting messages

use std::collections::HashSet;

use crate::dialogue::Flow;
use crate::ledger::{ExpenseRow, IncomeRow};
use crate::localization::{t_args_lang, t_lang};
use crate::messaging::Button;
use crate::validation::CANCEL_ID;

pub const HAS_ACCOUNT_ID: &str = "has_account";
pub const NO_ACCOUNT_ID: &str = "no_account";
pub const ADD_INCOME_ID: &str = "add_income";
pub const ADD_EXPENSE_ID: &str = "add_expense";
pub const YES_ID: &str = "yes";
pub const NO_ID: &str = "no";
pub const TODAY_ID: &str = "today";
pub const YESTERDAY_ID: &str = "yesterday";
pub const CUSTOM_DATE_ID: &str = "custom_date";

fn button(id: &str, key: &str, language: Option<&str>) -> Button {
    Button::new(id, t_lang(key, language))
}

pub fn cancel_button(language: Option<&str>) -> Button {
    button(CANCEL_ID, "btn-cancel", language)
}

pub fn auth_choice_menu(language: Option<&str>) -> Vec<Button> {
    vec![
        button(HAS_ACCOUNT_ID, "btn-has-account", language),
        button(NO_ACCOUNT_ID, "btn-no-account", language),
    ]
}

pub fn admin_menu(language: Option<&str>) -> Vec<Button> {
    vec![
        button(ADD_INCOME_ID, "btn-add-income", language),
        button(ADD_EXPENSE_ID, "btn-add-expense", language),
        cancel_button(language),
    ]
}

pub fn income_confirm_menu(language: Option<&str>) -> Vec<Button> {
    let mut buttons = yes_no_menu(language);
    buttons.push(cancel_button(language));
    buttons
}

pub fn yes_no_menu(language: Option<&str>) -> Vec<Button> {
    vec![
        button(YES_ID, "btn-yes", language),
        button(NO_ID, "btn-no", language),
    ]
}

/// The expense path offers cancel next to yes/no; income keeps the plain pair
pub fn image_choice_menu(flow: Flow, language: Option<&str>) -> Vec<Button> {
    match flow {
        Flow::Income => yes_no_menu(language),
        Flow::Expense => income_confirm_menu(language),
    }
}

pub fn date_menu(language: Option<&str>) -> Vec<Button> {
    vec![
        button(TODAY_ID, "btn-today", language),
        button(YESTERDAY_ID, "btn-yesterday", language),
        button(CUSTOM_DATE_ID, "btn-custom-date", language),
        cancel_button(language),
    ]
}

/// One option per distinct trimmed name (id and title both the name) plus cancel.
/// Interactive messages reject repeated ids, so the first occurrence wins.
pub fn option_menu(names: &[String], language: Option<&str>) -> Vec<Button> {
    let mut seen: HashSet<&str> = HashSet::from([CANCEL_ID]);
    let mut buttons: Vec<Button> = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| seen.insert(*name))
        .map(|name| Button::new(name, name))
        .collect();
    buttons.push(cancel_button(language));
    buttons
}

fn receipt_label(image_url: &str, language: Option<&str>) -> String {
    if image_url.is_empty() {
        t_lang("no-receipt", language)
    } else {
        image_url.to_string()
    }
}

/// Confirmation message for a committed income entry
pub fn format_income_summary(row: &IncomeRow, language: Option<&str>) -> String {
    let receipt = receipt_label(&row.image_url, language);
    t_args_lang(
        "income-summary",
        &[
            ("date", &row.date),
            ("description", &row.description),
            ("vendor", &row.vendor_code),
            ("amount", &row.amount),
            ("receipt", &receipt),
        ],
        language,
    )
}

/// Confirmation message for a committed expense entry
pub fn format_expense_summary(row: &ExpenseRow, language: Option<&str>) -> String {
    let receipt = receipt_label(&row.image_url, language);
    let subcategory = if row.subcategory.is_empty() { "-" } else { row.subcategory.as_str() };
    t_args_lang(
        "expense-summary",
        &[
            ("date", &row.date),
            ("description", &row.description),
            ("vendor", &row.vendor_code),
            ("category", &row.category),
            ("subcategory", subcategory),
            ("amount", &row.amount),
            ("receipt", &receipt),
        ],
        language,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menus_end_with_cancel_where_required() {
        assert_eq!(admin_menu(None).last().unwrap().id, CANCEL_ID);
        assert_eq!(income_confirm_menu(None).last().unwrap().id, CANCEL_ID);
        assert_eq!(date_menu(None).last().unwrap().id, CANCEL_ID);
        assert_eq!(image_choice_menu(Flow::Expense, None).last().unwrap().id, CANCEL_ID);
        assert!(image_choice_menu(Flow::Income, None).iter().all(|b| b.id != CANCEL_ID));
        assert!(yes_no_menu(None).iter().all(|b| b.id != CANCEL_ID));
    }

    #[test]
    fn test_option_menu_uses_names_as_ids() {
        let menu = option_menu(&["Transporte".to_string(), " Comida ".to_string()], None);
        assert_eq!(menu.len(), 3);
        assert_eq!(menu[0].id, "Transporte");
        assert_eq!(menu[1].id, "Comida");
    }

    #[test]
    fn test_option_menu_ids_are_unique() {
        let names: Vec<String> = ["Transporte", "Transporte", " Comida", "Comida ", "cancel"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let menu = option_menu(&names, None);
        let ids: Vec<&str> = menu.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["Transporte", "Comida", CANCEL_ID]);
    }

    #[test]
    fn test_income_summary_contains_fields() {
        let row = IncomeRow {
            date: "01/01/2024".into(),
            description: "Venta mostrador".into(),
            vendor_code: "V1".into(),
            amount: "100".into(),
            image_url: String::new(),
        };
        let summary = format_income_summary(&row, None);
        for value in ["01/01/2024", "Venta mostrador", "V1", "100", "Sin comprobante"] {
            assert!(summary.contains(value), "missing {value} in {summary}");
        }
    }

    #[test]
    fn test_expense_summary_marks_missing_subcategory() {
        let row = ExpenseRow {
            date: "02/01/2024".into(),
            description: "Peaje".into(),
            vendor_code: "ADM".into(),
            category: "Transporte".into(),
            subcategory: String::new(),
            amount: "350".into(),
            image_url: "https://img.example.com/r.png".into(),
        };
        let summary = format_expense_summary(&row, Some("en"));
        assert!(summary.contains("Subcategory: -"));
        assert!(summary.contains("https://img.example.com/r.png"));
    }
}
