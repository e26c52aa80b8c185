use std::convert::Infallible;

#[derive(thiserror::Error, Debug)]
pub enum RemoteStoreError {
    /// The entry's current revision is not the one the writer expected to create.
    #[error("revision conflict")]
    RevisionConflict,
    #[error("remote store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("remote store returned unexpected status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}

/// Outcome of a cache read that did not produce an entry.
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// Absent, deleted, or discarded as corrupt.
    #[error("entry not found")]
    NotFound,
    #[error(transparent)]
    Remote(#[from] RemoteStoreError),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("revision conflict")]
    RevisionConflict,
    #[error("could not encode entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Remote(RemoteStoreError),
}

impl From<RemoteStoreError> for WriteError {
    fn from(err: RemoteStoreError) -> Self {
        match err {
            RemoteStoreError::RevisionConflict => WriteError::RevisionConflict,
            other => WriteError::Remote(other),
        }
    }
}

/// Result of a bounded read-modify-write. `E` is the error the caller's update
/// function may reject the change with.
#[derive(thiserror::Error, Debug)]
pub enum UpdateError<E = Infallible> {
    #[error("{0}")]
    Rejected(E),
    #[error("gave up after {attempts} conflicting writes")]
    RetriesExhausted { attempts: u32 },
    #[error("could not encode entry: {0}")]
    Encode(serde_json::Error),
    #[error(transparent)]
    Remote(RemoteStoreError),
}

impl<E> UpdateError<E> {
    /// Everything except a domain rejection is reported to users as a generic failure.
    pub fn is_unknown(&self) -> bool {
        !matches!(self, UpdateError::Rejected(_))
    }
}

impl<E> From<RemoteStoreError> for UpdateError<E> {
    fn from(err: RemoteStoreError) -> Self {
        UpdateError::Remote(err)
    }
}

impl<E> From<WriteError> for UpdateError<E> {
    fn from(err: WriteError) -> Self {
        match err {
            // Only reachable when a caller converts a conflict outside the retry loop.
            WriteError::RevisionConflict => UpdateError::RetriesExhausted { attempts: 1 },
            WriteError::Encode(e) => UpdateError::Encode(e),
            WriteError::Remote(e) => UpdateError::Remote(e),
        }
    }
}

/// Treats `NotFound` as a valid "not configured yet" state.
pub trait ReadResultExt<T> {
    fn found(self) -> Result<Option<T>, RemoteStoreError>;
}

impl<T> ReadResultExt<T> for Result<T, ReadError> {
    fn found(self) -> Result<Option<T>, RemoteStoreError> {
        match self {
            Ok(entry) => Ok(Some(entry)),
            Err(ReadError::NotFound) => Ok(None),
            Err(ReadError::Remote(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found() {
        let hit: Result<u32, ReadError> = Ok(3);
        assert_eq!(hit.found().unwrap(), Some(3));

        let miss: Result<u32, ReadError> = Err(ReadError::NotFound);
        assert_eq!(miss.found().unwrap(), None);

        let failed: Result<u32, ReadError> = Err(ReadError::Remote(
            RemoteStoreError::InvalidUrl("nope".into()),
        ));
        assert!(failed.found().is_err());
    }

    #[test]
    fn test_write_error_from_remote() {
        assert!(matches!(
            WriteError::from(RemoteStoreError::RevisionConflict),
            WriteError::RevisionConflict
        ));
        assert!(matches!(
            WriteError::from(RemoteStoreError::InvalidUrl("x".into())),
            WriteError::Remote(_)
        ));
    }

    #[test]
    fn test_update_error_classification() {
        let rejected: UpdateError<&str> = UpdateError::Rejected("unknown param");
        assert!(!rejected.is_unknown());

        let exhausted: UpdateError<&str> = UpdateError::RetriesExhausted { attempts: 2 };
        assert!(exhausted.is_unknown());
        assert_eq!(exhausted.to_string(), "gave up after 2 conflicting writes");
    }
}
