use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerchatError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Completion error: {0}")]
    Completion(#[from] crate::completion::CompletionError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn component_errors_convert_into_the_top_level_error() {
        let e: LedgerchatError = StoreError::Unavailable("pool closed".to_string()).into();
        assert!(e.to_string().contains("pool closed"));

        let e: LedgerchatError = crate::completion::CompletionError::RateLimited.into();
        assert!(matches!(e, LedgerchatError::Completion(_)));
    }
}
