use thiserror::Error;

/// All errors produced by the connector.
///
/// Transport failures from the HTTP layer are always classified into one of
/// these variants before they leave the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote store unreachable, credentials rejected, or request timed out.
    #[error("connection to remote store failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The requested key does not exist in the remote store.
    #[error("key `{key}` not found")]
    NotFound { key: String },

    /// Revision mismatch on write, still failing after the configured attempts.
    #[error("revision conflict while writing key `{key}`")]
    Conflict { key: String },

    /// Configuration rejected. The message is safe to show to end users.
    #[error("{0}")]
    Validation(String),

    /// Any other non-2xx answer from the remote store.
    #[error("remote store answered {status}: {message}")]
    Remote { status: u16, message: String },

    /// The remote store answered with a body we could not understand.
    #[error("malformed response from remote store: {0}")]
    Decode(#[from] serde_json::Error),

    /// Link registry backend failed.
    #[error("link registry: {0}")]
    Registry(String),

    /// Settings could not be loaded.
    #[error("settings: {0}")]
    Config(#[from] config::ConfigError),

    /// Task or annotation collaborator returned an error.
    #[error("collaborator: {0:#}")]
    Collaborator(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Error::Registry(message.into())
    }

    pub fn collaborator(err: impl Into<anyhow::Error>) -> Self {
        Error::Collaborator(err.into())
    }

    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } | Error::Conflict { .. } => true,
            Error::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Classify a transport-level failure.
///
/// Timeouts, refused connections and auth failures become `Connection`;
/// other status errors become `Remote`.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Error::Validation(format!("invalid remote store address: {err}"));
        }
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Error::Connection {
                    message: format!("credentials rejected ({status})"),
                    source: Some(err),
                };
            }
            return Error::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "could not connect".to_string()
        } else {
            "transport error".to_string()
        };
        Error::Connection {
            message,
            source: Some(err),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Registry(err.to_string())
    }
}
