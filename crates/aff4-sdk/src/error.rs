use aff4_types::Urn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("no readable stream in {0}")]
    NoStream(String),

    #[error("unknown handle: {0}")]
    UnknownHandle(u64),

    #[error("{0} is not a volume")]
    NotAVolume(Urn),

    #[error("aff4 error: {0}")]
    Aff4(#[from] aff4_resolver::Aff4Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
