use thiserror::Error;
use timefree_engine::TimefreeError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] TimefreeError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Download incomplete: {failed_segments} segment(s) and {failed_sessions} session(s) failed"
    )]
    Incomplete {
        failed_segments: usize,
        failed_sessions: usize,
    },

    #[error("Interrupted")]
    Interrupted,
}

impl From<toml::de::Error> for AppError {
    fn from(error: toml::de::Error) -> Self {
        AppError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
