use thiserror::Error;

/// Failure taxonomy for calls made through [`crate::transport::ApiClient`].
///
/// Every variant that originates from a server response keeps the
/// `message` field of the response body when one was present, so callers
/// can surface it verbatim and fall back to their own text otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("not authorized")]
    Unauthorized { message: Option<String> },

    #[error("request rejected with status {status}")]
    Validation {
        status: u16,
        message: Option<String>,
    },

    #[error("{message}")]
    InvalidInput { message: String },

    #[error("resource not found")]
    NotFound { message: Option<String> },

    #[error("request conflicts with current state")]
    Conflict { message: Option<String> },

    #[error("server failure with status {status}")]
    Server {
        status: u16,
        message: Option<String>,
    },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        match status {
            401 => ApiError::Unauthorized { message },
            404 => ApiError::NotFound { message },
            409 => ApiError::Conflict { message },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Validation { status, message },
        }
    }

    /// The message the server put in the response body, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::NotFound { message }
            | ApiError::Conflict { message }
            | ApiError::Validation { message, .. }
            | ApiError::Server { message, .. } => message.as_deref(),
            ApiError::InvalidInput { message } => Some(message.as_str()),
            ApiError::Network(_) | ApiError::Malformed(_) => None,
        }
    }

    pub fn user_message(&self, fallback: &str) -> String {
        self.server_message()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(fallback)
            .to_string()
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Conflict { .. } => Some(409),
            ApiError::Validation { status, .. } | ApiError::Server { status, .. } => Some(*status),
            ApiError::Network(_) | ApiError::InvalidInput { .. } | ApiError::Malformed(_) => None,
        }
    }
}
