//! Error taxonomy shared across Steward crates.

/// Every fallible Steward operation reports one of these.
///
/// Lock contention, illegal work-item transitions and dedup skips are not
/// errors and never show up here; they are ordinary return values.
#[derive(Debug, thiserror::Error)]
pub enum StewardError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(String),
    #[error("Unknown handler '{handler}' referenced by job '{job}'")]
    UnknownHandler { job: String, handler: String },
    #[error("Handler '{0}' registered twice")]
    DuplicateHandler(String),
    #[error("Invalid job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },
    #[error("Handler error: {0}")]
    Handler(String),
    #[error("Alert delivery failed: {0}")]
    Alert(String),
    #[error("Store handle poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StewardError>;

impl From<toml::de::Error> for StewardError {
    fn from(e: toml::de::Error) -> Self {
        StewardError::Toml(e.to_string())
    }
}

impl From<toml::ser::Error> for StewardError {
    fn from(e: toml::ser::Error) -> Self {
        StewardError::Toml(e.to_string())
    }
}
