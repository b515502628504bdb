//! Input validation rules for the ledger conversation.
//!
//! Everything here is pure: no I/O, no session access.

use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

/// Button id of the universal cancel option
pub const CANCEL_ID: &str = "cancel";

lazy_static! {
    static ref DATE_PATTERN: Regex =
        Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("date pattern is a valid regex");
}

/// Checks the `DD/MM/YYYY` shape only. `31/02/2024` passes.
pub fn is_valid_date(input: &str) -> bool {
    DATE_PATTERN.is_match(input)
}

pub fn is_non_empty(input: &str) -> bool {
    !input.trim().is_empty()
}

/// Formats a calendar date as zero-padded `DD/MM/YYYY`
pub fn format_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{:04}", date.day(), date.month(), date.year())
}

/// Exact membership after trimming both sides; case is preserved.
pub fn is_member(input: &str, options: &[String]) -> bool {
    let needle = input.trim();
    options.iter().any(|option| option.trim() == needle)
}

/// Validates a free-text answer (description, vendor code, amount...)
pub fn validate_free_text(input: &str) -> Result<String, &'static str> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.len() > 255 {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}

/// The single cancellation signal, recognized the same way at every step.
pub fn is_cancel(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case(CANCEL_ID) || input.eq_ignore_ascii_case("cancelar")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_pattern() {
        assert!(is_valid_date("01/01/2024"));
        assert!(is_valid_date("31/02/2024"));
        assert!(!is_valid_date("1/2/2024"));
        assert!(!is_valid_date("01/01/24"));
        assert!(!is_valid_date(" 01/01/2024"));
        assert!(!is_valid_date("01-01-2024"));
        assert!(!is_valid_date(""));
    }

    #[test]
    fn test_format_date_zero_pads() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_date(date), "07/03/2024");

        let date = NaiveDate::from_ymd_opt(2023, 12, 25).unwrap();
        assert_eq!(format_date(date), "25/12/2023");
    }

    #[test]
    fn test_non_empty() {
        assert!(is_non_empty("Food"));
        assert!(is_non_empty("  x "));
        assert!(!is_non_empty(""));
        assert!(!is_non_empty(" \t\n"));
    }

    #[test]
    fn test_membership_is_case_sensitive() {
        let options = vec!["Transporte".to_string(), " Comida ".to_string()];
        assert!(is_member("Transporte", &options));
        assert!(is_member("  Comida", &options));
        assert!(!is_member("transporte", &options));
        assert!(!is_member("Otros", &options));
    }

    #[test]
    fn test_free_text_validation() {
        assert_eq!(validate_free_text("  Taxi al aeropuerto ").unwrap(), "Taxi al aeropuerto");
        assert_eq!(validate_free_text("   "), Err("empty"));
        assert_eq!(validate_free_text(&"a".repeat(256)), Err("too_long"));
    }

    #[test]
    fn test_cancel_signal() {
        assert!(is_cancel("cancel"));
        assert!(is_cancel(" Cancelar "));
        assert!(is_cancel("CANCEL"));
        assert!(!is_cancel("❌ Cancelar"));
        assert!(!is_cancel("no"));
    }
}
