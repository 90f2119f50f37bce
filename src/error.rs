use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures shared by the identity, event and sampling APIs.
///
/// Parsing and sampling prefer returning an invalid identity or an unsampled decision over
/// any of these; they are reserved for inputs the caller got structurally wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input has the wrong shape for the operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Wire text whose framing contradicts itself, e.g. a header declaring lengths that
    /// don't match the payload.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The output would not fit the wire format.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A well formed but uninitialized (all zero) or otherwise unusable identity was used
    /// where a valid one is required.
    #[error("Invalid identity")]
    InvalidIdentity,
}

impl From<minicbor::decode::Error> for Error {
    fn from(e: minicbor::decode::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl<W: std::fmt::Display> From<minicbor::encode::Error<W>> for Error {
    fn from(e: minicbor::encode::Error<W>) -> Self {
        Error::Encoding(e.to_string())
    }
}
