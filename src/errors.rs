//! # Gateway Error Types Module
//!
//! Error types shared by the external collaborators of the bot: the ledger
//! store, the media store and the messaging API. The conversation engine
//! never shows these to the user; it maps every variant to a re-prompt of
//! the current step.

/// Errors raised by calls to external services
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Transport-level failure (connection refused, TLS, DNS...)
    Http(String),
    /// The service answered with a non-success status
    Status { code: u16, body: String },
    /// The response body could not be decoded
    Decode(String),
    /// Credentials for the service could not be obtained
    Auth(String),
    /// The call did not complete in time
    Timeout(String),
    /// The inbound media is not an image we can store
    UnsupportedMedia(String),
    /// The gateway is missing a required setting
    Config(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Http(msg) => write!(f, "HTTP error: {msg}"),
            GatewayError::Status { code, body } => {
                write!(f, "Unexpected status {code}: {body}")
            }
            GatewayError::Decode(msg) => write!(f, "Decode error: {msg}"),
            GatewayError::Auth(msg) => write!(f, "Authentication error: {msg}"),
            GatewayError::Timeout(msg) => write!(f, "Timeout error: {msg}"),
            GatewayError::UnsupportedMedia(msg) => write!(f, "Unsupported media: {msg}"),
            GatewayError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Whether retrying the same idempotent call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::Timeout(_) => true,
            GatewayError::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Http(err.to_string())
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => GatewayError::Timeout(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                GatewayError::Decode(err.to_string())
            }
            other => GatewayError::Http(other.to_string()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Turn a non-success HTTP response into a `GatewayError::Status`
pub async fn check_status(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        code: status.as_u16(),
        body,
    })
}
