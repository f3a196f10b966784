//! Client-side form checks run before anything is sent.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_RESET_PASSWORD_LEN: usize = 6;

/// Field name to the first problem found with it.
pub type FieldErrors = BTreeMap<&'static str, String>;

fn email_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
}

fn username_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.]{3,30}$").ok())
        .as_ref()
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if !email_re().is_some_and(|re| re.is_match(email)) {
        return Err("Please enter a valid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str, min_len: usize) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.chars().count() < min_len {
        return Err(format!("Password must be at least {min_len} characters"));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    let username = username.trim();
    if username.is_empty() {
        return Err("Username is required".to_string());
    }
    if !username_re().is_some_and(|re| re.is_match(username)) {
        return Err(
            "Username must be 3-30 characters and contain only letters, numbers, underscores and periods"
                .to_string(),
        );
    }
    Ok(())
}

pub fn validate_password_confirmation(password: &str, confirm: &str) -> Result<(), String> {
    if confirm.is_empty() {
        return Err("Please confirm your password".to_string());
    }
    if password != confirm {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

pub fn validate_login(email: &str, password: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    record(&mut errors, "email", validate_email(email));
    if password.is_empty() {
        errors.insert("password", "Password is required".to_string());
    }
    errors
}

pub fn validate_registration(username: &str, email: &str, password: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    record(&mut errors, "username", validate_username(username));
    record(&mut errors, "email", validate_email(email));
    record(&mut errors, "password", validate_password(password, MIN_PASSWORD_LEN));
    errors
}

pub fn validate_forgot_password(email: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    record(&mut errors, "email", validate_email(email));
    errors
}

/// Field order in which reset form errors are reported.
pub const RESET_FIELDS: [&str; 2] = ["password", "confirm"];

pub fn validate_reset(password: &str, confirm: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    record(&mut errors, "password", validate_password(password, MIN_RESET_PASSWORD_LEN));
    record(&mut errors, "confirm", validate_password_confirmation(password, confirm));
    errors
}

fn record(errors: &mut FieldErrors, field: &'static str, outcome: Result<(), String>) {
    if let Err(message) = outcome {
        errors.insert(field, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("  ada@example.com ").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("ada example@x.io").is_err());
    }

    #[test]
    fn username_shape() {
        assert!(validate_username("ada.l_99").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(31)).is_err());
    }

    #[test]
    fn registration_collects_every_field() {
        let errors = validate_registration("a", "bad", "short");
        assert_eq!(
            errors.keys().copied().collect::<Vec<_>>(),
            vec!["email", "password", "username"]
        );
        assert!(validate_registration("ada", "ada@example.com", "longenough").is_empty());
    }

    #[test]
    fn reset_requires_matching_confirmation() {
        assert!(validate_reset("secret", "secret").is_empty());
        let errors = validate_reset("secret", "secreT");
        assert_eq!(errors.get("confirm").map(String::as_str), Some("Passwords do not match"));
        assert!(validate_reset("five5", "five5").contains_key("password"));
    }

    #[test]
    fn reset_reports_empty_confirmation_separately() {
        let errors = validate_reset("secret", "");
        assert_eq!(
            errors.get("confirm").map(String::as_str),
            Some("Please confirm your password")
        );
        assert!(!errors.contains_key("password"));

        let both = validate_reset("abc", "abd");
        assert_eq!(
            both.get("password").map(String::as_str),
            Some("Password must be at least 6 characters")
        );
        assert!(both.contains_key("confirm"));
    }

    #[test]
    fn login_only_requires_a_password() {
        assert!(validate_login("ada@example.com", "x").is_empty());
        assert!(validate_login("ada@example.com", "").contains_key("password"));
    }
}
