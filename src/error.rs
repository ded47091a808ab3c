use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("All AI providers failed: {0}")]
    AllProvidersFailed(String),

    #[error("Stream error: {0}")]
    Stream(String),

    /// Classifier output that could not be understood. Callers recover by
    /// falling back to chitchat.
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Unsafe query rejected: {0}")]
    UnsafeQuery(String),

    #[error("Execution error: {0}")]
    Execution(String),

    /// Failure message from the analytics cascade, already labelled.
    #[error("{0}")]
    Analytics(String),

    #[error("Template render error: {0}")]
    TemplateRender(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl From<sqlx::Error> for AssistantError {
    fn from(err: sqlx::Error) -> Self {
        AssistantError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        AssistantError::Llm(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
