//! Error taxonomy for zaver. Call sites match on `ZaverError`'s kind instead
//! of string-inspecting a boxed `dyn Error` — the same generalization the
//! request parser's own `ParseError` enum already applies to parsing,
//! extended here to cover CGI, path mapping and startup.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ZaverError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] zv_config::ConfigError),
}

impl ZaverError {
    /// The HTTP status this error maps to when it terminates request
    /// handling directly (outside the connection state machine's own
    /// stat()-driven 404/403 path, which builds responses without
    /// constructing this enum).
    pub fn status_code(&self) -> u16 {
        match self {
            ZaverError::BadRequest(_) => 400,
            ZaverError::Forbidden(_) => 403,
            ZaverError::NotFound => 404,
            ZaverError::MethodNotAllowed => 405,
            ZaverError::Internal(_) | ZaverError::Io(_) | ZaverError::Config(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ZaverError>;
