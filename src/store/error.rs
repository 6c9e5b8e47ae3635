use thiserror::Error;

/// Failure of a single call against the document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// True when the store rejected a create because the resource is already there.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Status { status, body, .. } => {
                *status == 400 && body.contains("resource_already_exists_exception")
            }
            _ => false,
        }
    }

    /// Errors a step may reasonably retry: network trouble and overloaded nodes.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } | Self::Unavailable(_) => true,
            Self::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::Decode { .. } => false,
        }
    }
}
