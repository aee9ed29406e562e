//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Minimum password length the platform accepts
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Upper bound that keeps hashing cost predictable
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Password complexity policy applied to every password set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
        }
    }
}

impl PasswordPolicy {
    /// Policy with a stricter minimum; values below the platform floor are raised to it
    pub fn with_min_length(min_length: usize) -> Self {
        Self {
            min_length: min_length.max(MIN_PASSWORD_LENGTH),
        }
    }

    /// Validate password
    pub fn validate(&self, password: &str) -> Result<(), String> {
        if password.is_empty() {
            return Err("Password is required".to_string());
        }

        let length = password.chars().count();
        if length < self.min_length {
            return Err(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }

        if length > MAX_PASSWORD_LENGTH {
            return Err(format!(
                "Password must be at most {} characters long",
                MAX_PASSWORD_LENGTH
            ));
        }

        let mut has_upper = false;
        let mut has_lower = false;
        let mut has_digit = false;
        let mut has_special = false;

        for c in password.chars() {
            if c.is_ascii_uppercase() {
                has_upper = true;
            } else if c.is_ascii_lowercase() {
                has_lower = true;
            } else if c.is_ascii_digit() {
                has_digit = true;
            } else if !c.is_alphanumeric() {
                has_special = true;
            }
        }

        if !has_upper {
            return Err("Password must contain at least one uppercase letter".to_string());
        }

        if !has_lower {
            return Err("Password must contain at least one lowercase letter".to_string());
        }

        if !has_digit {
            return Err("Password must contain at least one digit".to_string());
        }

        if !has_special {
            return Err("Password must contain at least one special character".to_string());
        }

        Ok(())
    }
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Normalize a phone number to international form
///
/// Spaces, dashes and parentheses are dropped. Domestic Russian formats are
/// rewritten to `+7XXXXXXXXXX`:
/// - `79001234567` becomes `+79001234567`
/// - `89001234567` becomes `+79001234567`
/// - `9001234567` becomes `+79001234567`
///
/// Anything else is returned stripped but otherwise untouched.
pub fn normalize_phone(phone: &str) -> String {
    let phone: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    let digits_only = phone.chars().all(|c| c.is_ascii_digit());
    match phone.len() {
        11 if digits_only && phone.starts_with('7') => format!("+{}", phone),
        11 if digits_only && phone.starts_with('8') => format!("+7{}", &phone[1..]),
        10 if digits_only && phone.starts_with('9') => format!("+7{}", phone),
        _ => phone,
    }
}

/// Validate an already normalized phone number (E.164)
pub fn validate_phone(phone: &str) -> Result<(), String> {
    if phone.is_empty() {
        return Err("Phone is required".to_string());
    }

    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX
        .get_or_init(|| Regex::new(r"^\+[1-9]\d{9,14}$").expect("Failed to compile phone regex"));

    if !regex.is_match(phone) {
        return Err("Invalid phone format".to_string());
    }

    Ok(())
}
