//! Conditional response builder.
//!
//! Every rendered page goes through [`View::output`], which merges the
//! handler's freshness with the template files and the navigation menu,
//! answers `If-Modified-Since` with a 304 where it can, and otherwise renders,
//! compresses and sends the page.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use flate2::{Compression, write::GzEncoder};
use minijinja::Value;
use serde::Serialize;
use std::{collections::BTreeMap, io::Write};

use crate::{
    AppState,
    clock::{self, Freshness},
    config::AppConfig,
    csrf::{self, CSRF_COOKIE, MIN_TOKEN_LEN},
    error::AppError,
    models::{self, User},
    repository::PageQuery,
    request::RequestContext,
};

pub const HTML: &str = "text/html; charset=utf-8";
pub const ATOM: &str = "application/atom+xml; charset=utf-8";

const PUBLIC_CACHE: &str = "max-age=60,s-maxage=5";
const PRIVATE_CACHE: &str = "private";

/// View
///
/// A page about to be rendered: template name, template data, and the bits
/// of response state the builder needs.
pub struct View {
    template: String,
    data: BTreeMap<String, Value>,
    error_code: Option<StatusCode>,
    cookie_authenticated: bool,
    content_type: &'static str,
    cookies: Vec<String>,
}

impl View {
    /// A view carrying the data every template receives.
    pub fn new(state: &AppState) -> Result<Self, AppError> {
        let config = &state.config;
        let skin = state.skins.get()?;

        let view = Self {
            template: String::new(),
            data: BTreeMap::new(),
            error_code: None,
            cookie_authenticated: false,
            content_type: HTML,
            cookies: Vec::new(),
        };
        Ok(view
            .with("base", &config.url_prefix)
            .with("siteTitle", &config.site_title)
            .with("logo", &config.logo)
            .with("assets", format!("{}{}", config.url_prefix, config.assets_prefix))
            .with("admin", config.admin_url())
            .with("extraCSS", &skin.extra_css)
            .with("extraJS", &skin.extra_js)
            .with("icons", &skin.icons))
    }

    pub fn template(mut self, name: &str) -> Self {
        self.template = name.to_string();
        self
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.data
            .insert(key.to_string(), Value::from_serialize(&value));
        self
    }

    /// Marks the response as an error page. Error pages are never answered
    /// with a 304.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    /// Binds the view to a signed-in user. Such responses are private to
    /// that user's cookie.
    pub fn authenticated(mut self, user: &User) -> Self {
        self.cookie_authenticated = true;
        self.with("user", user)
    }

    /// with_csrf
    ///
    /// Exposes a CSRF token to the template as `csrftoken`. The request's
    /// token is reused when it is long enough, otherwise a new one is set.
    pub fn with_csrf(mut self, config: &AppConfig, req: &RequestContext) -> Result<Self, AppError> {
        let existing = csrf::cookie_value(&req.headers, CSRF_COOKIE)
            .filter(|token| token.len() >= MIN_TOKEN_LEN);

        let token = match existing {
            Some(token) => token,
            None => {
                let token = csrf::new_token()?;
                let cookie = Cookie::build((CSRF_COOKIE, token.clone()))
                    .path(format!("{}/", config.url_prefix))
                    .http_only(true)
                    .same_site(SameSite::Strict)
                    .secure(config.secure)
                    .build();
                self.cookies.push(cookie.to_string());
                token
            }
        };
        Ok(self.with(CSRF_COOKIE, token))
    }

    /// output
    ///
    /// Turns the view into a response. `candidate` is the freshness of the
    /// data the handler put into the view; `None` disables conditional GET
    /// and `Last-Modified` entirely.
    pub async fn output(
        mut self,
        state: &AppState,
        req: &RequestContext,
        candidate: Freshness,
    ) -> Result<Response, AppError> {
        let menu = state.repo.pages(&PageQuery::menu()).await?;
        let menu_modified = models::last_modified(&menu);
        self.data
            .insert("menu".to_string(), Value::from_serialize(&menu));

        let skin = state.skins.get()?;
        let freshness = match candidate {
            Some(_) => merge_freshness(
                candidate,
                skin.template_modified(&self.template)?,
                menu_modified,
            ),
            None => None,
        };

        let mut headers = HeaderMap::new();
        for cookie in &self.cookies {
            headers.append(header::SET_COOKIE, header_value(cookie)?);
        }

        if let Some(last_modified) = freshness {
            cache_headers(&mut headers, self.cookie_authenticated);
            if self.error_code.is_none() && not_modified(&req.headers, last_modified) {
                return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
            }
        }

        let body = gzip(skin.render(&self.template, &self.data)?.as_bytes())?;

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        if let Some(last_modified) = freshness {
            headers.insert(
                header::LAST_MODIFIED,
                header_value(&clock::http_date(last_modified))?,
            );
        }

        let status = self.error_code.unwrap_or(StatusCode::OK);
        let body = if req.is_head() {
            Body::empty()
        } else {
            Body::from(body)
        };
        Ok((status, headers, body).into_response())
    }
}

/// merge_freshness
///
/// The most recent of the handler's candidate, the template files and the
/// menu, at one-second resolution. `None` only when all three are `None`.
pub fn merge_freshness(candidate: Freshness, template: Freshness, menu: Freshness) -> Freshness {
    clock::last_time([candidate, template, menu]).map(clock::truncate_to_seconds)
}

/// Sets the caching headers that must appear on both the 200 and the 304.
pub fn cache_headers(headers: &mut HeaderMap, cookie_authenticated: bool) {
    if cookie_authenticated {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(PRIVATE_CACHE));
        headers.insert(header::VARY, HeaderValue::from_static("Cookie"));
    } else {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(PUBLIC_CACHE));
    }
}

/// not_modified
///
/// Whether the request's `If-Modified-Since` names exactly `last_modified`.
/// Missing or unparsable headers never match.
pub fn not_modified(headers: &HeaderMap, last_modified: DateTime<Utc>) -> bool {
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(clock::parse_http_date)
        .is_some_and(|since| since == last_modified)
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, AppError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| AppError::io("could not compress response", e))?;
    encoder
        .finish()
        .map_err(|e| AppError::io("could not compress response", e))
}

/// 303 See Other with an empty body.
pub fn see_other(location: &str) -> Result<Response, AppError> {
    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();
    headers.insert(header::LOCATION, header_value(location)?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok(response)
}

/// 301 Moved Permanently with an empty body.
pub fn moved_permanently(location: &str) -> Result<Response, AppError> {
    let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
    response
        .headers_mut()
        .insert(header::LOCATION, header_value(location)?);
    Ok(response)
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|_| AppError::Internal(format!("invalid header value {value:?}")))
}
