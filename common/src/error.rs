use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Path already exists: {0}")]
    PathAlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid open mode: {0}")]
    InvalidMode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid directory handle")]
    InvalidDirHandle,

    #[error("Object is in 'zombie' state: {0}")]
    Zombie(String),

    #[error("The remote file is not open: {0}")]
    NotOpen(String),

    #[error("File is offline: {0}")]
    Offline(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of failures, used by callers deciding whether a
/// handle is still worth talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The handle is unusable; nothing was sent.
    Connection,
    /// The endpoint answered with a failure status.
    Transfer,
    /// The endpoint's configuration or reply could not be used.
    Protocol,
    /// Rejected locally before contacting the endpoint.
    Validation,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Zombie(_) | Error::NotOpen(_) => ErrorCategory::Connection,
            Error::Protocol(_) => ErrorCategory::Protocol,
            Error::InvalidPath(_)
            | Error::InvalidUrl(_)
            | Error::InvalidMode(_)
            | Error::InvalidArgument(_)
            | Error::InvalidDirHandle => ErrorCategory::Validation,
            _ => ErrorCategory::Transfer,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category() {
        assert_eq!(
            Error::Zombie("root://h//f".into()).category(),
            ErrorCategory::Connection
        );
        assert_eq!(Error::InvalidDirHandle.category(), ErrorCategory::Validation);
        assert_eq!(
            Error::Protocol("readv_ior_max".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            Error::PathNotFound("/tmp/x".into()).category(),
            ErrorCategory::Transfer
        );
    }
}
