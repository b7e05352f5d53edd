//! Boundary checks shared by the request payloads.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ApiError, ApiResult, FieldIssue};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").expect("username pattern compiles"));

static TENANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("tenant pattern compiles"));

pub const MIN_PASSWORD_LEN: usize = 8;

/// Collects field issues and turns them into a single 400.
#[derive(Debug, Default)]
pub struct Issues(Vec<FieldIssue>);

impl Issues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.0.push(FieldIssue::new(field, message));
        }
        self
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.0.push(FieldIssue::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn finish(self) -> ApiResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.0))
        }
    }
}

pub fn is_email(value: &str) -> bool {
    value.len() <= 254 && EMAIL_RE.is_match(value)
}

/// Tenant ids are plain identifiers so they can never be read as a query
/// operator or field path.
pub fn is_tenant_id(value: &str) -> bool {
    TENANT_RE.is_match(value)
}

pub fn is_username(value: &str) -> bool {
    USERNAME_RE.is_match(value)
}

pub fn is_password(value: &str) -> bool {
    value.chars().count() >= MIN_PASSWORD_LEN
}

/// Trimmed length within `min..=max` characters.
pub fn len_between(value: &str, min: usize, max: usize) -> bool {
    let len = value.trim().chars().count();
    len >= min && len <= max
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Lowercase, ASCII alphanumerics separated by single dashes.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
