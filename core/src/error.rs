//! Error handling for this crate
use thiserror::Error;

/// A Result containing an AcquisitionError with its accompanying source
pub type TypedResult<T> = Result<T, AcquisitionError>;

/// The kind of problem that occurred, independent of its underlying cause.
///
/// Each kind carries its own recovery policy at the call site: log and continue, drop the tick,
/// defer the write, or refuse to start.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("transient transport failure")]
    TransientTransport,
    #[error("streamed sentence incomplete after retry budget")]
    FramingUnderrun,
    #[error("output file append contended")]
    WriteContention,
    #[error("instrument configuration is invalid")]
    ConfigInvalid,
    #[error("instrument configuration file is missing")]
    ConfigFileMissing,
    #[error("unrecoverable startup failure")]
    FatalStartup,
}

/// Combination of an ErrorKind with an anyhow error
#[derive(Error, Debug)]
#[error("{kind}: {source:?}")]
pub struct AcquisitionError {
    kind: ErrorKind,
    source: anyhow::Error,
}

impl AcquisitionError {
    /// Creates a new AcquisitionError
    pub fn new(kind: ErrorKind, source: anyhow::Error) -> Self {
        Self { kind, source }
    }
    /// Returns the ErrorKind of this error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
    /// Returns the anyhow error of this error
    pub fn source_error(&self) -> &anyhow::Error {
        &self.source
    }
}

/// Converts a Result into one of our own Result types
pub trait ResultExt<T> {
    /// Converts a Result to a TypedResult, tagging the error with `kind`
    fn typ(self, kind: ErrorKind) -> TypedResult<T>;
}

impl<T, E: Into<anyhow::Error>> ResultExt<T> for Result<T, E> {
    fn typ(self, kind: ErrorKind) -> TypedResult<T> {
        self.map_err(|e| AcquisitionError {
            kind,
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typ_wraps_error_with_kind() {
        let res: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.typ(ErrorKind::TransientTransport).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientTransport);
        assert!(err.source_error().to_string().contains("boom"));
    }
}
