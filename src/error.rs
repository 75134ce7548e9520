use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::auth::LoginError;

const INTERNAL_ERROR_PAGE: &str = "<h1>500 Internal Server Error</h1>\n";
const FORBIDDEN_PAGE: &str = "<h1>403 Forbidden</h1><p>CSRF validation failed.</p>\n";

/// ErrorClass
///
/// The three kinds of failure a request can end in. Client-correctable
/// failures become ordinary responses, internal failures end the request with
/// a 500 page, and security-sensitive failures are answered without saying
/// which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientCorrectable,
    Internal,
    SecuritySensitive,
}

/// AppError
///
/// Every fallible operation in the request pipeline returns this type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    /// The request body could not be read within the size limit.
    #[error("request body rejected: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error("csrf validation failed")]
    CsrfRejected,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored password hash could not be parsed. This is data corruption,
    /// not a wrong password.
    #[error("malformed password hash: {0}")]
    MalformedHash(String),

    /// A session token verified but its subject has no user row.
    #[error("no user for verified session subject {0}")]
    MissingUser(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound | Self::PayloadTooLarge(_) | Self::Login(_) => {
                ErrorClass::ClientCorrectable
            }
            Self::CsrfRejected => ErrorClass::SecuritySensitive,
            Self::Database(_)
            | Self::Template(_)
            | Self::Io { .. }
            | Self::MalformedHash(_)
            | Self::MissingUser(_)
            | Self::Internal(_) => ErrorClass::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.class() {
            ErrorClass::SecuritySensitive => {
                tracing::warn!("rejected state-changing request");
                html(StatusCode::FORBIDDEN, FORBIDDEN_PAGE)
            }
            ErrorClass::ClientCorrectable => match self {
                Self::Login(LoginError::Redirect(redirect)) => redirect.into_response(),
                Self::Login(_) => StatusCode::UNAUTHORIZED.into_response(),
                Self::PayloadTooLarge(reason) => {
                    tracing::debug!(%reason, "request body rejected");
                    StatusCode::PAYLOAD_TOO_LARGE.into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            },
            ErrorClass::Internal => {
                tracing::error!(error = %self, "request failed");
                html(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_PAGE)
            }
        }
    }
}

fn html(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}
