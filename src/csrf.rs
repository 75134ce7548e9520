//! Double-submit CSRF protection.
//!
//! A state-changing request passes when its `Origin` is the canonical origin,
//! or when the `csrftoken` cookie and the `csrftoken` form field carry the same
//! value of at least [`MIN_TOKEN_LEN`] bytes. Only a site that can set our
//! cookie can produce the pair, and a cross-site attacker cannot.

use axum::http::{HeaderMap, header};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use crate::{error::AppError, request::find_cookie};

/// Name of both the cookie and the form field.
pub const CSRF_COOKIE: &str = "csrftoken";

/// Submitted tokens shorter than this are never compared.
pub const MIN_TOKEN_LEN: usize = 32;

/// validate
///
/// Returns whether a state-changing request may proceed. Pure predicate:
/// the caller produces the 403.
pub fn validate(origin: &str, headers: &HeaderMap, form: &HashMap<String, String>) -> bool {
    let request_origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if request_origin == Some(origin) {
        return true;
    }

    let Some(cookie) = cookie_value(headers, CSRF_COOKIE) else {
        return false;
    };
    let Some(submitted) = form.get(CSRF_COOKIE) else {
        return false;
    };

    submitted.len() >= MIN_TOKEN_LEN && tokens_match(&cookie, submitted)
}

/// Constant-time equality for token strings. The length check leaks only the
/// length, never how many leading bytes matched.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    expected.len() == provided.len() && expected.ct_eq(provided).into()
}

/// new_token
///
/// 32 random bytes, hex encoded (64 characters).
pub fn new_token() -> Result<String, AppError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AppError::Internal(format!("could not generate csrf token: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Readable value of the named cookie, if any.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    find_cookie(headers, name).and_then(Result::ok)
}
