//! Error types for the deploy notifier

use std::fmt;

pub type Result<T> = std::result::Result<T, NotifierError>;

#[derive(Debug)]
pub enum NotifierError {
    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Search backend rejected a request or returned something we could not read
    Search(String),

    /// Search backend refused the connection
    BackendDown(String),

    /// Operation did not finish before its deadline
    Timeout(String),

    /// Webhook delivery failed
    Delivery(String),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for NotifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifierError::Http(err) => write!(f, "HTTP error: {}", err),
            NotifierError::Json(err) => write!(f, "JSON error: {}", err),
            NotifierError::Config(msg) => write!(f, "Configuration error: {}", msg),
            NotifierError::Search(msg) => write!(f, "Search error: {}", msg),
            NotifierError::BackendDown(msg) => {
                write!(f, "Search backend or network down: {}", msg)
            }
            NotifierError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            NotifierError::Delivery(msg) => write!(f, "Delivery error: {}", msg),
            NotifierError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for NotifierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifierError::Http(err) => Some(err),
            NotifierError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NotifierError {
    fn from(err: reqwest::Error) -> Self {
        NotifierError::Http(err)
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(err: serde_json::Error) -> Self {
        NotifierError::Json(err)
    }
}
