//! Error types for the sync protocol.
//!
//! Protocol divergence (version or counter mismatch) is never an error: the
//! server answers with `should_reset` and the client rebuilds its view. The
//! variants here cover everything else: broken frames, transport failures and
//! writes the server refused.

use std::fmt;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Failed to decode a frame or message.
    Decode(String),

    /// The transport failed to deliver a request or response.
    Transport(String),

    /// The server refused a write (validation failure).
    Rejected(String),

    /// An edit addressed positions outside the server sequence.
    OutOfRange {
        /// First edited position.
        start: u64,
        /// One past the last edited position.
        end: u64,
        /// Length of the server sequence at the time of the edit.
        len: u64,
    },

    /// The channel or transport has been closed.
    Closed,

    /// Configuration error.
    Config(String),
}

impl Error {
    /// Whether a retry of the same request may succeed.
    ///
    /// This is the default retry decision of the write queue: transport
    /// hiccups are retried, refusals from the server are not.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Closed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(msg) => {
                write!(f, "failed to decode message: {}", msg)
            }
            Error::Transport(msg) => {
                write!(f, "transport error: {}", msg)
            }
            Error::Rejected(reason) => {
                write!(f, "write rejected by server: {}", reason)
            }
            Error::OutOfRange { start, end, len } => {
                write!(
                    f,
                    "edit range {}..{} outside of sequence of length {}",
                    start, end, len
                )
            }
            Error::Closed => {
                write!(f, "channel closed")
            }
            Error::Config(msg) => {
                write!(f, "configuration error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(_: async_channel::SendError<T>) -> Self {
        Error::Closed
    }
}

impl From<async_channel::RecvError> for Error {
    fn from(_: async_channel::RecvError) -> Self {
        Error::Closed
    }
}
