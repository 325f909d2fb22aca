//! Error types for the construction-finance bot core

use thiserror::Error;

/// Result type alias for bot operations
pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {

    // =============================
    // Recoverable user-facing errors
    // =============================

    /// Bad step input; the current step is re-prompted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The external extraction service failed or timed out.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Speech transcription failed (distinct from extraction).
    #[error("Transcription error: {0}")]
    Transcription(String),

    // =============================
    // Terminal-for-this-request errors
    // =============================

    /// Role or access denial; surfaced to the user, no retry.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Storage failure after bounded retries.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Duplicate confirm or concurrent flow start.
    #[error("Conflict: {0}")]
    Conflict(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Message safe to show to the user; diagnostics stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Validation(msg) => msg.clone(),
            BotError::Extraction(_) => {
                "Не удалось разобрать запись. Попробуйте еще раз или введите данные вручную.".to_string()
            }
            BotError::Transcription(_) => {
                "Не удалось распознать голос. Попробуйте ввести текстом.".to_string()
            }
            BotError::Authorization(_) => "Доступ запрещен.".to_string(),
            BotError::Persistence(_) => {
                "Не удалось сохранить запись. Она НЕ записана, попробуйте подтвердить еще раз.".to_string()
            }
            BotError::Conflict(msg) => msg.clone(),
            _ => "Внутренняя ошибка. Попробуйте позже.".to_string(),
        }
    }
}
