//! Errors returned by the remote API client

use thiserror::Error;

/// Error returned by any remote API call
#[derive(Debug, Error)]
pub enum CloudError {
    /// The requested resource does not exist (HTTP 404)
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind (e.g. "placement group", "vpc", "subnet")
        resource: String,
        /// Identifier that was looked up
        id: String,
    },

    /// The API answered with a non-success status
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Reasons reported by the API, joined
        message: String,
    },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded
    #[error("failed to decode {what}: {message}")]
    Decode {
        /// What was being decoded
        what: String,
        /// Decoder message
        message: String,
    },

    /// The client could not be constructed (bad URL, bad token)
    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl CloudError {
    /// Create a not-found error for the given resource kind and id
    pub fn not_found(resource: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create an API error with the given status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether the remote resource is already absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
