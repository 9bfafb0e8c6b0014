/// Observational memory errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory record already exists: {0}")]
    DuplicateId(String),

    #[error("memory backend failure: {0}")]
    Backend(String),
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
