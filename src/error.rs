use crate::prelude::*;
use std::error;

/// The error type for tree operations.
///
/// Functions of this crate return [`anyhow::Result`]; errors raised by the trees themselves
/// can be recovered with `err.downcast_ref::<Error>()` and classified by [`Error::kind`].
/// Stream failures are passed through as [`std::io::Error`].
#[derive(Debug)]
pub struct Error {
    repr: Repr,
}

impl Error {
    /// Returns the corresponding `Kind` for this error.
    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.repr.0
    }

    /// Returns `Kind` of `error` if it was raised by this crate.
    #[must_use]
    pub fn kind_of(error: &anyhow::Error) -> Option<&Kind> {
        error.downcast_ref::<Self>().map(Self::kind)
    }

    /// Checks if `error` reports an absent key.
    #[must_use]
    pub fn is_key_missing(error: &anyhow::Error) -> bool {
        matches!(Self::kind_of(error), Some(Kind::KeyMissing))
    }

    pub(crate) fn new(kind: Kind, cause: impl Into<String>) -> Self {
        Self {
            repr: Repr(kind, cause.into()),
        }
    }

    pub(crate) fn structure(cause: impl Into<String>) -> Self {
        let cause = cause.into();
        error!("structure violation: {}", cause);
        Self::new(Kind::Structure, cause)
    }

    pub(crate) fn key_missing(cause: impl Into<String>) -> Self {
        Self::new(Kind::KeyMissing, cause)
    }

    pub(crate) fn bad_key_value(cause: impl Into<String>) -> Self {
        Self::new(Kind::BadKeyValue, cause)
    }

    pub(crate) fn file_locked(cause: impl Into<String>) -> Self {
        Self::new(Kind::FileLocked, cause)
    }

    pub(crate) fn config(cause: impl Into<String>) -> Self {
        Self::new(Kind::WrongConfig, cause)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}: {}", self.repr.0, self.repr.1)
    }
}

impl error::Error for Error {}

impl From<Kind> for Error {
    #[must_use]
    fn from(kind: Kind) -> Self {
        Self {
            repr: Repr(kind, String::new()),
        }
    }
}

#[derive(Debug)]
struct Repr(Kind, String);

/// A list specifying categories of tree errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// On-disk or in-memory structure is corrupted or self-contradictory:
    /// bad header magic, free list cycle, mismatched buffer tags, unordered keys,
    /// unreachable buffers.
    Structure,
    /// Lookup, update or delete of an absent key.
    KeyMissing,
    /// Key or value was rejected before any mutation: oversized key, key that cannot be
    /// decoded or bucket size limit exceeded.
    BadKeyValue,
    /// File is locked by another tree.
    FileLocked,
    /// Construction parameters are out of range.
    WrongConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> Result<()> {
        Err(Error::key_missing("no such key").into())
    }

    #[test]
    fn kind_survives_anyhow() {
        let err = failing().unwrap_err();
        assert!(Error::is_key_missing(&err));
        assert_eq!(Error::kind_of(&err), Some(&Kind::KeyMissing));
        assert!(err.to_string().contains("no such key"));
    }

    #[test]
    fn io_errors_are_not_crate_errors() {
        let err: anyhow::Error = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(Error::kind_of(&err), None);
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }
}
