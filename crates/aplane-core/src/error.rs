use thiserror::Error;

/// The service-surface error. Every fallible operation behind the request
/// API or the control channel maps into one of these kinds; the HTTP layer
/// turns the kind into a status code and the control channel into an
/// `error` message.
#[derive(Debug, Error)]
pub enum Error {
    // ── Request shape ────────────────────────────────────────────────────────
    #[error("{0}")]
    BadRequest(String),

    // ── Auth ─────────────────────────────────────────────────────────────────
    #[error("{0}")]
    Unauthorized(String),

    /// Locked signer, policy rejection, or operator rejection.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Another control client is mid-authentication.
    #[error("{0}")]
    Conflict(String),

    /// No control client, approval timeout, or node unreachable.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP-style status code for this kind.
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Unavailable(_) => 503,
            Error::Internal(_) => 500,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("i/o error: {e}"))
    }
}

impl From<crate::codec::CodecError> for Error {
    fn from(e: crate::codec::CodecError) -> Self {
        Error::BadRequest(e.to_string())
    }
}
