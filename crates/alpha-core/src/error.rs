//! Unified error model
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlphaError {
    #[error("PARSE/{0}")]
    ParseError(String),

    #[error("POLICY/MALFORMED: {0}")]
    MalformedPolicy(String),

    #[error("INPUT/{0}")]
    InvalidInput(String),

    #[error("CONFIG/{0}")]
    ConfigError(String),
}

pub type AlphaResult<T> = Result<T, AlphaError>;
