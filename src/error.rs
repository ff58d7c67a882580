use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

/// The error kinds a connection core can surface to a caller.
///
/// Server-reported errors and client-side failures are kept distinct so that callers can
/// tell "the server rejected this command" from "this command never reached the server".
#[derive(Debug, Error)]
pub enum Error {
    /// The reply began with `-`; the message is the server's own error text.
    #[error("Server Error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    /// Dispatch was attempted after `close()`, or the request was drained on final
    /// disconnect.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A blocking `await`/`await_all` was interrupted before it could observe a result.
    #[error("Command interrupted")]
    CommandInterrupted,

    /// `await(timeout)` elapsed before the completion resolved; the request has been
    /// cancelled client-side.
    #[error("Timed out waiting for a reply")]
    Timeout,

    /// The wire codec needed a capability the platform doesn't provide (e.g. no SHA-1).
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    /// A script-output type was requested that isn't in the closed enumeration.
    #[error("Unsupported script output type: {0}")]
    UnsupportedScriptOutput(String),

    /// The wire bytes didn't match the expected framing for the reply we were decoding.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// `DISCARD` cancelled this command's second-phase completion before `EXEC` ran.
    #[error("Transaction discarded")]
    TransactionDiscarded,

    /// A bug in this crate: an invariant the decoder or dispatcher relies on was violated.
    #[error("A bug in zero-resp: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::LibraryBug(eyre!(format!("{:#?}", err)))
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::ServerError(s) => Error::ServerError(s.clone()),
            Error::IoError(e) => Error::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Error::BadConfigError(s) => Error::BadConfigError(s.clone()),
            Error::ConnectionClosed => Error::ConnectionClosed,
            Error::CommandInterrupted => Error::CommandInterrupted,
            Error::Timeout => Error::Timeout,
            Error::CodecUnavailable(s) => Error::CodecUnavailable(s.clone()),
            Error::UnsupportedScriptOutput(s) => Error::UnsupportedScriptOutput(s.clone()),
            Error::InvalidReply(s) => Error::InvalidReply(s.clone()),
            Error::TransactionDiscarded => Error::TransactionDiscarded,
            Error::LibraryBug(r) => Error::LibraryBug(eyre!(format!("{:#}", r))),
        }
    }
}
