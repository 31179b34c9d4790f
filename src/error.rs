use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed record at position {position}{}: {reason}", id_suffix(.id))]
    MalformedRecord {
        position: usize,
        id: Option<String>,
        reason: String,
    },

    #[error("Sample not found: {0}")]
    NotFound(String),

    #[error("Detector unavailable ({detector}): {message}")]
    DetectorUnavailable { detector: String, message: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({endpoint}): {message}")]
    Api {
        endpoint: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited by {endpoint}")]
    RateLimit {
        endpoint: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed(position: usize, id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            position,
            id: id.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn unavailable(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DetectorUnavailable {
            detector: detector.into(),
            message: message.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    pub fn api_with_status(
        endpoint: impl Into<String>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Infrastructure failures worth another attempt. Bad detector output and
    /// bad input data are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DetectorUnavailable { .. } | Self::Http(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => status_code.is_none_or(|s| s >= 500),
            Self::Io(_) => true,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

fn id_suffix(id: &Option<String>) -> String {
    id.as_deref().map(|i| format!(" (id {i})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;
