//! Validation utilities

use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that an amount is not negative
pub fn validate_non_negative_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount < BigDecimal::from(0) {
        Err(LedgerError::Validation(
            "Amount must not be negative".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an account code is usable as a path segment
pub fn validate_account_code(code: &str) -> LedgerResult<()> {
    if code.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account code cannot be empty".to_string(),
        ));
    }

    if code.len() > 50 {
        return Err(LedgerError::Validation(
            "Account code cannot exceed 50 characters".to_string(),
        ));
    }

    // Path separator must never appear inside a segment
    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LedgerError::Validation(
            "Account code can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    if name.contains('/') {
        return Err(LedgerError::Validation(
            "Account name cannot contain '/'".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a journal reference is valid
pub fn validate_reference(reference: &str) -> LedgerResult<()> {
    if reference.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Journal reference cannot be empty".to_string(),
        ));
    }

    if reference.len() > 50 {
        return Err(LedgerError::Validation(
            "Journal reference cannot exceed 50 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate the table name a code counter is keyed on
pub fn validate_table_name(table_name: &str) -> LedgerResult<()> {
    if table_name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Table name cannot be empty".to_string(),
        ));
    }

    if !table_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(LedgerError::Validation(format!(
            "Table name '{}' can only contain alphanumeric characters and underscores",
            table_name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_code_rules() {
        assert!(validate_account_code("CUS-1-dr").is_ok());
        assert!(validate_account_code("1110").is_ok());
        assert!(validate_account_code("").is_err());
        assert!(validate_account_code("11/10").is_err());
        assert!(validate_account_code(&"x".repeat(51)).is_err());
    }

    #[test]
    fn test_amount_and_names() {
        assert!(validate_non_negative_amount(&BigDecimal::from(0)).is_ok());
        assert!(validate_non_negative_amount(&BigDecimal::from(-1)).is_err());
        assert!(validate_account_name("Trade Receivables").is_ok());
        assert!(validate_account_name("a/b").is_err());
        assert!(validate_table_name("inventory").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_reference("JOU-1").is_ok());
        assert!(validate_reference("  ").is_err());
    }
}
