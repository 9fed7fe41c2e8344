use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum TimefreeError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed during {step}: {reason}")]
    Auth { step: &'static str, reason: String },

    #[error("program not found: station `{station_id}` at {start_at}")]
    ProgramNotFound { station_id: String, start_at: String },

    #[error("invalid program reference `{input}`: {reason}")]
    InvalidReference { input: String, reason: String },

    #[error("segment `{key}` download failed: {reason}")]
    SegmentDownload { key: String, reason: String },

    #[error("failed to parse {document}: {reason}")]
    Parse {
        document: &'static str,
        reason: String,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("assembly failed: {reason}")]
    Assemble { reason: String },
}

impl TimefreeError {
    pub fn auth(step: &'static str, reason: impl Into<String>) -> Self {
        Self::Auth {
            step,
            reason: reason.into(),
        }
    }

    pub fn invalid_reference(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(document: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            document,
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn assemble(reason: impl Into<String>) -> Self {
        Self::Assemble {
            reason: reason.into(),
        }
    }

    /// Transient failures worth another attempt: network errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => {
                source.is_connect() || source.is_timeout() || source.is_request() || source.is_body()
            }
            Self::Io { .. } | Self::SegmentDownload { .. } => true,
            Self::Cancelled
            | Self::Auth { .. }
            | Self::ProgramNotFound { .. }
            | Self::InvalidReference { .. }
            | Self::Parse { .. }
            | Self::Config { .. }
            | Self::Assemble { .. } => false,
        }
    }
}

pub type Result<T, E = TimefreeError> = std::result::Result<T, E>;
