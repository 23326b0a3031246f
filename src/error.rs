//! Error types for the ESB smart meter forwarder.
//!
//! Each component gets its own error enum so callers can tell a rejected login apart
//! from a broken CSV download or an unreachable statistics store.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required configuration value is missing
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// Configuration value is invalid
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },

    /// A meter with the same unique id is already registered
    #[error("meter '{unique_id}' is already configured")]
    AlreadyConfigured { unique_id: String },
}

/// ESB Networks portal errors.
#[derive(Error, Debug)]
pub enum EsbError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The portal did not answer in time
    #[error("request timed out - server not responding")]
    Timeout,

    /// Server returned an error status
    #[error("server error (status {status}) at step '{step}'")]
    ServerError { step: &'static str, status: u16 },

    /// The identity provider rejected the credentials
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The login walk ended somewhere unexpected
    #[error("login failed - {0}")]
    LoginFailed(String),

    /// A page in the walk could not be understood
    #[error("failed to parse portal response")]
    Parse(#[from] ParseError),

    /// The download did not look like the usage CSV
    #[error("invalid CSV format received: {0}")]
    InvalidCsv(String),

    /// Scraping is suspended after repeated failures
    #[error("scraping for meter '{mprn}' suspended after repeated failures")]
    Suspended { mprn: String },
}

/// HTML, JSON and CSV parsing errors.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Element not found in HTML
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// Invalid CSS selector
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    /// Element exists but lacks an attribute
    #[error("element '{selector}' has no '{attribute}' attribute")]
    MissingAttribute { selector: String, attribute: String },

    /// Embedded or returned JSON could not be decoded
    #[error("invalid JSON in {context}: {message}")]
    Json { context: String, message: String },

    /// Failed to parse numeric value
    #[error("failed to parse number from '{text}': {message}")]
    NumberParse { text: String, message: String },

    /// Failed to parse date/time
    #[error("failed to parse date/time from '{text}': {message}")]
    DateTimeParse { text: String, message: String },

    /// A CSV record could not be read
    #[error("CSV error: {0}")]
    Csv(String),

    /// Unexpected page structure
    #[error("unexpected page structure: {0}")]
    UnexpectedStructure(String),
}

/// Scheduled update errors.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Fetching usage data failed
    #[error("Error communicating with ESB API: {0}")]
    Failed(#[from] EsbError),

    /// The refresh did not finish in time
    #[error("update for meter '{mprn}' timed out after {timeout} seconds")]
    Timeout { mprn: String, timeout: u64 },
}

/// Statistics store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// HTTP request to the store failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket transport failed
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The store rejected our credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Write operation failed
    #[error("failed to write {count} statistics: {message}")]
    WriteFailed { count: usize, message: String },

    /// Query for existing statistics failed
    #[error("failed to query statistics: {0}")]
    QueryFailed(String),

    /// Connection failed
    #[error("failed to connect to statistics store at {url}")]
    ConnectionFailed { url: String },

    /// Peer sent something we did not expect
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConfigError {
    /// Creates a new missing configuration error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Creates a new invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn already_configured(unique_id: impl Into<String>) -> Self {
        Self::AlreadyConfigured {
            unique_id: unique_id.into(),
        }
    }
}

impl EsbError {
    /// Maps a transport error, singling out timeouts.
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }

    pub fn login_failed(reason: impl Into<String>) -> Self {
        Self::LoginFailed(reason.into())
    }

    pub fn invalid_csv(reason: impl Into<String>) -> Self {
        Self::InvalidCsv(reason.into())
    }
}

impl ParseError {
    /// Creates an element not found error.
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Creates an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            message: err.to_string(),
        }
    }

    pub fn missing_attribute(selector: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            selector: selector.into(),
            attribute: attribute.into(),
        }
    }

    pub fn json(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Json {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Creates a number parse error.
    pub fn number_parse(text: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::NumberParse {
            text: text.into(),
            message: err.to_string(),
        }
    }

    pub fn csv(err: impl std::fmt::Display) -> Self {
        Self::Csv(err.to_string())
    }

    /// Creates a datetime parse error.
    pub fn datetime_parse(text: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DateTimeParse {
            text: text.into(),
            message: err.to_string(),
        }
    }
}

impl StorageError {
    /// Creates a write failed error.
    pub fn write_failed(count: usize, err: impl std::fmt::Display) -> Self {
        Self::WriteFailed {
            count,
            message: err.to_string(),
        }
    }

    /// Creates a connection failed error.
    pub fn connection_failed(url: impl Into<String>) -> Self {
        Self::ConnectionFailed { url: url.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
