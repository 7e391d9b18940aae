use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;

/// Path segments arrive as strings so a malformed id is a 400, not a
/// framework rejection.
pub fn parse_id(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request(format!("Invalid {what} ID")))
}

#[derive(Debug, PartialEq, Eq)]
pub enum UsernameCheck {
    TooShort,
    TooLong,
    InvalidCharacters,
    Ok,
}

pub fn check_username(username: &str) -> UsernameCheck {
    let len = username.chars().count();
    if len < USERNAME_MIN_LEN {
        UsernameCheck::TooShort
    } else if len > USERNAME_MAX_LEN {
        UsernameCheck::TooLong
    } else if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        UsernameCheck::InvalidCharacters
    } else {
        UsernameCheck::Ok
    }
}

pub fn validate_username(username: &str) -> AppResult<()> {
    match check_username(username) {
        UsernameCheck::Ok => Ok(()),
        UsernameCheck::TooShort => Err(AppError::bad_request(format!(
            "Username must be at least {USERNAME_MIN_LEN} characters"
        ))),
        UsernameCheck::TooLong => Err(AppError::bad_request(format!(
            "Username must be at most {USERNAME_MAX_LEN} characters"
        ))),
        UsernameCheck::InvalidCharacters => Err(AppError::bad_request(
            "Username can only contain letters, numbers, and underscores",
        )),
    }
}

/// Trims a required free-text field, rejecting blanks.
pub fn require_text(value: Option<&str>, field: &str) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("{field} is required")))
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> AppResult<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::bad_request("Latitude must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::bad_request("Longitude must be between -180 and 180"));
    }
    Ok(())
}
