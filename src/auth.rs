use axum::{
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use cookie::{Cookie, SameSite, time::Duration};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    config::AppConfig,
    error::AppError,
    models::User,
    password::verify_password,
    repository::Repository,
    request::RequestContext,
    response::View,
};

/// Name of the cookie carrying the signed session token.
pub const SESSION_COOKIE: &str = "session";

/// Claims
///
/// Payload of a session token. The subject is the user's email address; the
/// token is bound to nothing else, so it stays valid until `exp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// LoginError
///
/// Outcomes of the authentication state machine other than "user" and
/// "anonymous".
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("unknown email address or wrong password")]
    InvalidUser,
    #[error("session token could not be verified")]
    InvalidToken,
    #[error("session token has expired")]
    ExpiredToken,
    /// Login succeeded. The 303 is fully decided; nothing else may be rendered.
    #[error("login succeeded, redirecting")]
    Redirect(LoginRedirect),
}

impl LoginError {
    /// The `loginerror` value shown by the login template.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::InvalidUser => Some("user"),
            Self::InvalidToken => Some("token"),
            Self::ExpiredToken => Some("expired"),
            Self::Redirect(_) => None,
        }
    }
}

/// LoginRedirect
///
/// The response to a successful login: back to the page the form was posted
/// to, now with a session cookie.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub location: String,
    pub set_cookie: String,
}

impl IntoResponse for LoginRedirect {
    fn into_response(self) -> Response {
        let mut response = StatusCode::SEE_OTHER.into_response();
        let headers = response.headers_mut();
        match (
            HeaderValue::from_str(&self.location),
            HeaderValue::from_str(&self.set_cookie),
        ) {
            (Ok(location), Ok(cookie)) => {
                headers.insert(header::LOCATION, location);
                headers.insert(header::SET_COOKIE, cookie);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                response
            }
            _ => AppError::Internal("login redirect is not a valid header".into()).into_response(),
        }
    }
}

/// SessionStore
///
/// Issues and verifies HS256-signed session tokens. Built once from the
/// configured key and shared by every request.
pub struct SessionStore {
    encoding: EncodingKey,
    decoding: DecodingKey,
    max_age: i64,
    cookie_path: String,
    secure: bool,
}

impl SessionStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(&config.session_key),
            decoding: DecodingKey::from_secret(&config.session_key),
            max_age: config.token_max_age,
            cookie_path: format!("{}/admin/", config.url_prefix),
            secure: config.secure,
        }
    }

    /// issue
    ///
    /// A fresh token for `email`, valid for the configured lifetime.
    pub fn issue(&self, email: &str) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        self.sign(&Claims {
            sub: email.to_string(),
            iat: now,
            exp: now + self.max_age,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("could not sign session token: {e}")))
    }

    /// verify
    ///
    /// Checks signature and expiry. An expired token with a good signature is
    /// `ExpiredToken`; everything else that fails is `InvalidToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, LoginError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => LoginError::ExpiredToken,
                _ => LoginError::InvalidToken,
            })
    }

    /// The `Set-Cookie` form of a freshly issued token.
    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path(self.cookie_path.clone())
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(Duration::seconds(self.max_age))
            .build()
    }
}

/// authenticate
///
/// Resolves the caller of one request:
///
/// 1. A POST with a non-empty `login` field is a login attempt. Unknown
///    email or wrong password is `InvalidUser`; success issues a token and
///    ends in `LoginError::Redirect`.
/// 2. Otherwise a session cookie, when present, must verify and must name an
///    existing user. A verified token without a user row is an internal error.
/// 3. No attempt and no cookie is the anonymous case, `Ok(None)`.
pub async fn authenticate(
    repo: &dyn Repository,
    sessions: &SessionStore,
    req: &RequestContext,
) -> Result<Option<User>, AppError> {
    if req.method == Method::POST && !req.form_value("login").is_empty() {
        let email = req.form_value("email");
        let Some(credential) = repo.credential(email).await? else {
            tracing::debug!("login attempt for unknown email");
            return Err(LoginError::InvalidUser.into());
        };

        if !verify_password(req.form_value("password"), &credential.password_hash)? {
            tracing::debug!(email = %credential.email, "login attempt with wrong password");
            return Err(LoginError::InvalidUser.into());
        }

        let token = sessions.issue(&credential.email)?;
        tracing::info!(email = %credential.email, "login succeeded");
        return Err(LoginError::Redirect(LoginRedirect {
            location: req.path_and_query(),
            set_cookie: sessions.session_cookie(token).to_string(),
        })
        .into());
    }

    let token = match req.cookie(SESSION_COOKIE) {
        None => return Ok(None),
        Some(Err(_)) => return Err(LoginError::InvalidToken.into()),
        Some(Ok(token)) => token,
    };

    let claims = sessions.verify(&token)?;
    match repo.user(&claims.sub).await? {
        Some(user) => Ok(Some(user)),
        None => Err(AppError::MissingUser(claims.sub)),
    }
}

/// Gate
///
/// Result of [`require_user`]: either a view bound to the signed-in user, or
/// a response that already answers the request.
pub enum Gate {
    Admitted(View),
    Answered(Response),
}

/// require_user
///
/// Entry point of every authenticated view. Enforces the canonical origin,
/// then authenticates. Anonymous and rejected callers get the login form,
/// annotated with the reason; a successful login gets its 303.
pub async fn require_user(state: &AppState, req: &RequestContext) -> Result<Gate, AppError> {
    if let Some(response) = canonical_redirect(&state.config, req) {
        return Ok(Gate::Answered(response));
    }

    let reason = match authenticate(state.repo.as_ref(), &state.sessions, req).await {
        Ok(Some(user)) => {
            let view = View::new(state)?
                .authenticated(&user)
                .with_csrf(&state.config, req)?;
            return Ok(Gate::Admitted(view));
        }
        Ok(None) => None,
        Err(AppError::Login(LoginError::Redirect(redirect))) => {
            return Ok(Gate::Answered(redirect.into_response()));
        }
        Err(AppError::Login(e)) => {
            tracing::debug!(reason = %e, "authentication rejected");
            e.reason()
        }
        Err(e) => return Err(e),
    };

    let mut view = View::new(state)?.template("login");
    if let Some(reason) = reason {
        view = view.with("loginerror", reason);
    }
    let response = view
        .with_csrf(&state.config, req)?
        .output(state, req, None)
        .await?;
    Ok(Gate::Answered(response))
}

/// 303 to the same path on the canonical origin when the request arrived
/// under another host name.
fn canonical_redirect(config: &AppConfig, req: &RequestContext) -> Option<Response> {
    let expected = config.origin_authority()?;
    let host = req
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri.authority().map(|a| a.as_str()));
    if host == Some(expected.as_str()) {
        return None;
    }

    let location = format!("{}{}", config.origin, req.path_and_query());
    tracing::debug!(?host, %location, "redirecting to canonical origin");
    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();
    headers.insert(header::LOCATION, HeaderValue::from_str(&location).ok()?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Some(response)
}
