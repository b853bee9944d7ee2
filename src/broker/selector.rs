//! Lexical checks applied to message selectors before a consumer is
//! registered.
//!
//! Full selector parsing belongs to the broker; this only catches input that
//! can never be a valid selector so the link can be refused eagerly.

use super::{BrokerException, ExceptionKind};

/// Reject selectors that are blank or have unbalanced quotes or parentheses.
///
/// # Errors
///
/// Returns an [`ExceptionKind::InvalidSelector`] exception describing the
/// first problem found.
pub fn validate(selector: &str) -> Result<(), BrokerException> {
    if selector.trim().is_empty() {
        return Err(invalid("selector is empty"));
    }
    let mut depth = 0usize;
    let mut in_string = false;
    for ch in selector.chars() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(format!("unexpected ')' in selector: {selector}")))?;
            }
            _ => {}
        }
    }
    if in_string {
        return Err(invalid(format!("unterminated string literal in selector: {selector}")));
    }
    if depth > 0 {
        return Err(invalid(format!("unclosed '(' in selector: {selector}")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> BrokerException {
    BrokerException::new(ExceptionKind::InvalidSelector, message)
}
