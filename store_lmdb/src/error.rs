use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(String),

    #[error("unknown store: {0}")]
    UnknownStore(String),
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Heed(e.to_string())
    }
}

impl From<LmdbError> for veil_store::StoreError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::UnknownStore(name) => veil_store::StoreError::UnknownStore(name),
            other => veil_store::StoreError::Backend(other.to_string()),
        }
    }
}
