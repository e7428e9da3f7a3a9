use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Sheet error: {0}")]
    Sheet(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, non-200 answers and malformed bodies are transient.
    /// A symbol the upstream does not know and bad configuration are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::ExternalApi(_)
            | AppError::Reqwest(_)
            | AppError::SerdeJson(_)
            | AppError::Sheet(_)
            | AppError::Notification(_)
            | AppError::Exchange(_) => true,
            AppError::Config(_)
            | AppError::SymbolNotFound(_)
            | AppError::Anyhow(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// First 200 characters of an upstream error body, for log and error text.
pub fn snippet(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
