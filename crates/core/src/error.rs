use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("invalid config value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },
}
