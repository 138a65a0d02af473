use thiserror::Error;

use crate::proto::{MsgType, Role};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl StreamError {
    /// Whether the connection is unusable after this error.
    pub fn is_transport(&self) -> bool {
        matches!(self, StreamError::Closed | StreamError::Io(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{role:?} may not send {msg_type:?}")]
    UnexpectedSend { role: Role, msg_type: MsgType },
    #[error("{role:?} may not receive {msg_type:?}")]
    UnexpectedReceive { role: Role, msg_type: MsgType },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("number of intervals must be positive, got {0}")]
    InvalidCount(usize),
}

pub type StreamResult<T> = Result<T, StreamError>;

pub type IntervalResult<T> = Result<T, IntervalError>;
