use axum::{
    body::to_bytes,
    extract::Request,
    http::{HeaderMap, Method, Uri, header},
};
use cookie::Cookie;
use std::collections::HashMap;

use crate::error::AppError;

/// Request bodies larger than this are refused.
const MAX_FORM_BYTES: usize = 1024 * 1024;

/// A cookie was sent under the expected name but could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedCookie;

/// RequestContext
///
/// Everything the pipeline looks at, read once per request. The form is
/// parsed up front because the CSRF check needs it before routing.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub form: HashMap<String, String>,
}

impl RequestContext {
    pub async fn from_request(request: Request) -> Result<Self, AppError> {
        let (parts, body) = request.into_parts();

        let is_form = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

        let mut form = HashMap::new();
        if is_form && parts.method == Method::POST {
            // Fails only on the size limit or a broken client connection.
            let bytes = to_bytes(body, MAX_FORM_BYTES)
                .await
                .map_err(|e| AppError::PayloadTooLarge(e.to_string()))?;
            // Repeated fields keep their first value.
            for (key, value) in url::form_urlencoded::parse(&bytes) {
                form.entry(key.into_owned()).or_insert_with(|| value.into_owned());
            }
        }

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            form,
        })
    }

    /// Value of a form field, or `""` when absent.
    pub fn form_value(&self, name: &str) -> &str {
        self.form.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query string, as used for `Location` headers.
    pub fn path_and_query(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| self.uri.path().to_string())
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// cookie
    ///
    /// `None` when no cookie of that name was sent. `Some(Err(_))` when one
    /// was sent but its value is empty or unreadable.
    pub fn cookie(&self, name: &str) -> Option<Result<String, MalformedCookie>> {
        find_cookie(&self.headers, name)
    }
}

/// find_cookie
///
/// First cookie called `name` across all `Cookie` headers. Each header is
/// decoded lossily and split into pairs, so a foreign cookie with a
/// non-UTF-8 value cannot hide or spoil the one asked for.
pub(crate) fn find_cookie(
    headers: &HeaderMap,
    name: &str,
) -> Option<Result<String, MalformedCookie>> {
    headers.get_all(header::COOKIE).iter().find_map(|value| {
        let raw = String::from_utf8_lossy(value.as_bytes());
        Cookie::split_parse(raw.as_ref())
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| match cookie.value() {
                "" => Err(MalformedCookie),
                v if v.contains(char::REPLACEMENT_CHARACTER) => Err(MalformedCookie),
                v => Ok(v.to_string()),
            })
    })
}
