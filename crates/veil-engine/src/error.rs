use veil_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("recognition conflict: {0}")]
    RecognitionConflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Conflict(what) => EngineError::RecognitionConflict(what),
            StoreError::Forbidden(what) => EngineError::Forbidden(what),
            other => EngineError::Store(other.to_string()),
        }
    }
}
