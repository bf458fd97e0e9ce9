use thiserror::Error;

use crate::validate::ValidationErrors;

/// Ошибки синхронизации настроек
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed:\n{0}")]
    Validation(ValidationErrors),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ValidationErrors> for SyncError {
    fn from(errors: ValidationErrors) -> Self {
        SyncError::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
