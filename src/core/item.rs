//! Purpose: Define the inventory record and the quantity-text parsing rules.
//! Exports: `Item`, `QuantityPolicy`, `parse_quantity`, `validate_name`, `DEFAULT_QUANTITY`.
//! Role: Leaf module shared by stores, the controller, and the CLI.
//! Invariants: Item names are non-empty and compared exactly (case-preserving).
//! Invariants: Absent or digit-less quantity text always means `DEFAULT_QUANTITY`.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_QUANTITY: i64 = 1;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub quantity: i64,
}

impl Item {
    pub fn new(name: impl Into<String>, quantity: i64) -> Self {
        Self {
            name: name.into(),
            quantity,
        }
    }
}

/// How explicit quantity text is interpreted on add and edit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum QuantityPolicy {
    /// Lenient integer prefix parse; zero and negative values pass through.
    #[default]
    Permissive,
    /// Text must be a whole positive integer; otherwise the action is rejected.
    Strict,
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("item name must not be empty")
            .with_hint("Provide a non-empty item name."));
    }
    Ok(())
}

/// Leading-prefix integer parse: skips leading whitespace, accepts one sign,
/// reads the digit run, ignores whatever follows. `None` when no digit is found.
fn parse_integer_prefix(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let mut value: i64 = 0;
    for byte in rest[..digits].bytes() {
        let digit = i64::from(byte - b'0');
        value = value.saturating_mul(10);
        value = if negative {
            value.saturating_sub(digit)
        } else {
            value.saturating_add(digit)
        };
    }
    Some(value)
}

pub fn parse_quantity(text: Option<&str>) -> i64 {
    text.and_then(parse_integer_prefix)
        .unwrap_or(DEFAULT_QUANTITY)
}

pub fn parse_quantity_with(text: Option<&str>, policy: QuantityPolicy) -> Result<i64, Error> {
    match policy {
        QuantityPolicy::Permissive => Ok(parse_quantity(text)),
        QuantityPolicy::Strict => {
            let Some(raw) = text.filter(|raw| !raw.is_empty()) else {
                return Ok(DEFAULT_QUANTITY);
            };
            let value = raw.trim().parse::<i64>().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("quantity {raw:?} is not a whole number"))
                    .with_hint("Use a positive integer like 3.")
                    .with_source(err)
            })?;
            if value <= 0 {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("quantity must be positive, got {value}"))
                    .with_hint("Use a positive integer like 3."));
            }
            Ok(value)
        }
    }
}
