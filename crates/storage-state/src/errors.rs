use thiserror::Error;
use vstream_crypto_envelope::CryptoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage-state record not found: {record_id}")]
    NotFound { record_id: String },
    #[error("record {record_id} is not owned by the caller")]
    OwnershipDenied { record_id: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("storage backend failure: {0}")]
    Backend(String),
}
