use base64::{Engine, engine::general_purpose::STANDARD};
use std::{env, path::PathBuf};
use url::Url;

/// Session keys shorter than this (after base64 decoding) are rejected.
pub const MIN_SESSION_KEY_LEN: usize = 32;

/// One week.
pub const DEFAULT_TOKEN_MAX_AGE: i64 = 60 * 60 * 24 * 7;

/// 180 days.
pub const DEFAULT_HSTS_MAX_AGE: u64 = 15_552_000;

const LOCAL_SESSION_KEY: &[u8] = b"local-development-session-key-do-not-deploy";

/// AppConfig
///
/// Everything the server needs to know about its deployment. Loaded once at
/// startup and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Runtime environment marker (logging format, secret fallbacks).
    pub env: Env,
    // sqlx connection string, e.g. `sqlite://data/blog.sqlite3?mode=rwc`.
    pub db_url: String,
    pub bind_addr: String,
    /// Canonical origin (scheme + host + port), e.g. `https://example.com`.
    pub origin: String,
    /// Mount point of the blog below the origin: `""` or e.g. `/blog`.
    pub url_prefix: String,
    /// When set, cookies are marked `Secure` and HSTS is sent.
    pub secure: bool,
    pub hsts_max_age: u64,
    // Raw HMAC key used to sign session tokens.
    pub session_key: Vec<u8>,
    /// Session token lifetime in seconds.
    pub token_max_age: i64,
    /// Directory that contains `skins/`.
    pub blog_path: PathBuf,
    pub skin: String,
    pub site_title: String,
    pub logo: String,
    pub assets_prefix: String,
}

/// Env
///
/// Runtime context: local development or production.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Non-panicking configuration for tests and local scaffolding.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: "sqlite::memory:".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            origin: "http://localhost:3000".to_string(),
            url_prefix: String::new(),
            secure: false,
            hsts_max_age: DEFAULT_HSTS_MAX_AGE,
            session_key: LOCAL_SESSION_KEY.to_vec(),
            token_max_age: DEFAULT_TOKEN_MAX_AGE,
            blog_path: PathBuf::from("."),
            skin: "base".to_string(),
            site_title: "Blog".to_string(),
            logo: String::new(),
            assets_prefix: "/assets/".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables.
    ///
    /// # Panics
    /// Panics when a value is unusable (unparsable origin, malformed session
    /// key) or when `BLOG_SESSION_KEY` is missing in production. The server
    /// must not start half-configured.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };
        let defaults = Self::default();

        let session_key = match (env::var("BLOG_SESSION_KEY"), &env) {
            (Ok(encoded), _) => decode_session_key(&encoded)
                .unwrap_or_else(|e| panic!("FATAL: BLOG_SESSION_KEY is invalid: {e}")),
            (Err(_), Env::Production) => {
                panic!("FATAL: BLOG_SESSION_KEY must be set in production.")
            }
            (Err(_), Env::Local) => defaults.session_key.clone(),
        };

        let origin = var_or("BLOG_ORIGIN", &defaults.origin)
            .trim_end_matches('/')
            .to_string();
        if let Err(e) = Url::parse(&origin) {
            panic!("FATAL: BLOG_ORIGIN {origin:?} is not a valid URL: {e}");
        }

        let secure = match env::var("BLOG_SECURE") {
            Ok(value) => parse_bool(&value),
            Err(_) => env == Env::Production,
        };

        Self {
            db_url: var_or("DATABASE_URL", "sqlite://data/blog.sqlite3?mode=rwc"),
            bind_addr: var_or("BLOG_BIND_ADDR", "0.0.0.0:3000"),
            origin,
            url_prefix: var_or("BLOG_URL_PREFIX", ""),
            secure,
            hsts_max_age: parse_or("BLOG_HSTS_MAX_AGE", defaults.hsts_max_age),
            session_key,
            token_max_age: parse_or("BLOG_TOKEN_MAX_AGE", defaults.token_max_age),
            blog_path: PathBuf::from(var_or("BLOG_PATH", ".")),
            skin: var_or("BLOG_SKIN", &defaults.skin),
            site_title: var_or("BLOG_TITLE", &defaults.site_title),
            logo: var_or("BLOG_LOGO", ""),
            assets_prefix: var_or("BLOG_ASSETS_PREFIX", &defaults.assets_prefix),
            env,
        }
    }

    /// `host[:port]` of the canonical origin, as it appears in a `Host` header.
    pub fn origin_authority(&self) -> Option<String> {
        let url = Url::parse(&self.origin).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Absolute URL of the admin dashboard.
    pub fn admin_url(&self) -> String {
        format!("{}{}/admin", self.origin, self.url_prefix)
    }
}

/// decode_session_key
///
/// Decodes a base64 session key and checks its length.
pub fn decode_session_key(encoded: &str) -> Result<Vec<u8>, String> {
    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("not valid base64: {e}"))?;
    if key.len() < MIN_SESSION_KEY_LEN {
        return Err(format!(
            "key is {} bytes, need at least {MIN_SESSION_KEY_LEN}",
            key.len()
        ));
    }
    Ok(key)
}

/// Encodes a raw key the way `BLOG_SESSION_KEY` expects it.
pub fn encode_session_key(key: &[u8]) -> String {
    STANDARD.encode(key)
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("FATAL: {name} has an invalid value {value:?}")),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_authority_includes_explicit_ports() {
        let mut config = AppConfig::default();
        config.origin = "http://localhost:3000".into();
        assert_eq!(config.origin_authority().as_deref(), Some("localhost:3000"));

        config.origin = "https://example.com".into();
        assert_eq!(config.origin_authority().as_deref(), Some("example.com"));
    }

    #[test]
    fn session_keys_must_be_long_enough() {
        assert!(decode_session_key(&encode_session_key(&[7u8; 32])).is_ok());
        assert!(decode_session_key(&encode_session_key(&[7u8; 16])).is_err());
        assert!(decode_session_key("%%%").is_err());
    }
}
