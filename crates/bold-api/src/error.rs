use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized")]
    Unauthorized,

    #[error("too many requests")]
    TooManyRequests,

    #[error("no gateway available for device")]
    GatewayNotFound,

    #[error("device firmware does not support this action")]
    DeviceFirmwareOutdated,

    #[error("invalid email")]
    InvalidEmail,

    #[error("email or phone not specified")]
    EmailOrPhoneNotSpecified,

    #[error("verification not found")]
    VerificationNotFound,

    #[error("authentication failed")]
    AuthenticateFailed,

    #[error("current token is missing")]
    TokenMissing,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("activation time of {0} s is out of range")]
    InvalidActivationTime(u64),
}

impl ApiError {
    /// Connection problems, timeouts and server-side failures.
    ///
    /// These are worth retrying later; everything else needs different
    /// input or a new login.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
