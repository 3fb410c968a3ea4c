/// Input validation for user-submitted data
///
/// Order numbers and withdrawal amounts arrive from end users and are checked
/// here before any storage access.
use crate::domain::OrderNumber;
use crate::error::{LoyaltyError, Result};
use rust_decimal::Decimal;

/// Maximum accepted order number length (matches the storage column)
pub const MAX_ORDER_NUMBER_LEN: usize = 64;

/// Luhn checksum over a string of ASCII digits
///
/// Returns `false` for an empty string or any non-digit character.
pub fn luhn(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// Validate an order number: non-empty, digits only, bounded length, Luhn-valid
///
/// # Returns
/// * `Ok(OrderNumber)` with surrounding whitespace trimmed
/// * `Err(LoyaltyError::InvalidOrderNumber)` otherwise
pub fn validate_order_number(raw: &str) -> Result<OrderNumber> {
    let number = raw.trim();

    if number.is_empty() {
        return Err(LoyaltyError::InvalidOrderNumber(
            "order number cannot be empty".to_string(),
        ));
    }

    if number.len() > MAX_ORDER_NUMBER_LEN {
        return Err(LoyaltyError::InvalidOrderNumber(format!(
            "order number exceeds {} characters",
            MAX_ORDER_NUMBER_LEN
        )));
    }

    if !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(LoyaltyError::InvalidOrderNumber(format!(
            "order number must contain digits only: {}",
            number
        )));
    }

    if !luhn(number) {
        return Err(LoyaltyError::InvalidOrderNumber(format!(
            "checksum mismatch: {}",
            number
        )));
    }

    Ok(OrderNumber::new(number))
}

/// Validate a withdrawal amount (positive, at most two decimal places)
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LoyaltyError::Validation(format!(
            "withdrawal amount must be positive: {}",
            amount
        )));
    }

    if amount.normalize().scale() > 2 {
        return Err(LoyaltyError::Validation(format!(
            "withdrawal amount has more than two decimal places: {}",
            amount
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_luhn() {
        assert!(luhn("79927398713"));
        assert!(luhn("4561261212345467"));
        assert!(luhn("0"));

        assert!(!luhn("79927398710"));
        assert!(!luhn("4561261212345464"));
        assert!(!luhn(""));
        assert!(!luhn("7992739871a"));
    }

    #[test]
    fn test_validate_order_number() {
        assert_eq!(
            validate_order_number(" 12345678903\n").unwrap().as_str(),
            "12345678903"
        );

        assert!(matches!(
            validate_order_number(""),
            Err(LoyaltyError::InvalidOrderNumber(_))
        ));
        assert!(matches!(
            validate_order_number("12345678904"),
            Err(LoyaltyError::InvalidOrderNumber(_))
        ));
        assert!(matches!(
            validate_order_number("1234-5678"),
            Err(LoyaltyError::InvalidOrderNumber(_))
        ));
        assert!(validate_order_number(&"0".repeat(MAX_ORDER_NUMBER_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec!(0.01)).is_ok());
        assert!(validate_amount(dec!(751)).is_ok());
        assert!(validate_amount(dec!(10.500)).is_ok());

        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-5)).is_err());
        assert!(validate_amount(dec!(1.001)).is_err());
    }
}
