//! Normalization of phone-shaped customer identifiers into the payout
//! rail's required international format. Malformed identifiers are
//! rejected here, before any network call, as a permanent per-item error.

use feedback_core::error::{RewardError, RewardResult};

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Normalize a raw identifier to E.164 (`+` followed by 8-15 digits).
///
/// Accepted inputs: already-international (`+254712345678`), international
/// with `00` prefix (`00254712345678`), national format with a leading zero
/// (`0712 345 678`, converted using `default_country_code`), or bare
/// international digits without the plus. Separators (spaces, dashes, dots,
/// parentheses) are stripped first.
pub fn normalize_msisdn(raw: &str, default_country_code: &str) -> RewardResult<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if cleaned.is_empty() {
        return Err(RewardError::Validation(
            "empty customer identifier".to_string(),
        ));
    }

    let digits = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("{default_country_code}{rest}")
    } else {
        cleaned
    };

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(RewardError::Validation(format!(
            "identifier contains non-digit characters: {raw}"
        )));
    }
    if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return Err(RewardError::Validation(format!(
            "identifier has {} digits, expected {MIN_DIGITS}-{MAX_DIGITS}",
            digits.len()
        )));
    }
    if digits.starts_with('0') {
        return Err(RewardError::Validation(format!(
            "identifier cannot start with zero after normalization: {raw}"
        )));
    }

    Ok(format!("+{digits}"))
}
