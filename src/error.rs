use std::fmt;
use std::io;

use crate::engine::ConnState;
use crate::parser::ParserError;

/// Errors the client surfaces at its API boundary.
///
/// `ServerError` is deliberately absent here: a well-formed `-ERR ...`
/// reply is carried inside a `Value::Error`, not raised as a `ClientError`
/// — only transport/timeout/protocol/state failures reach this type.
#[derive(Debug)]
pub enum ClientError {
    /// Socket-level failure: connect refused, read/write error, EOF before
    /// a reply arrived.
    Transport(io::Error),
    /// A sync operation's deadline elapsed.
    Timeout,
    /// The byte stream was not valid RESP.
    Protocol(ParserError),
    /// The call was issued in a connection state that doesn't permit it.
    State { attempted: &'static str, current: ConnState },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "transport error: {e}"),
            ClientError::Timeout => write!(f, "operation timed out"),
            ClientError::Protocol(e) => write!(f, "{e}"),
            ClientError::State { attempted, current } => {
                write!(f, "{attempted} called with invalid state {current:?}")
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(e),
            ClientError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Transport(e)
    }
}

impl From<ParserError> for ClientError {
    fn from(e: ParserError) -> Self {
        ClientError::Protocol(e)
    }
}
