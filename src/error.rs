use std::fmt;
use std::io;

use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug)]
pub enum ChannelError {
    EmptyLogicalPath,
    InvalidOrigin(String),
    Handshake(String),
    Transport(String),
    MalformedPayload(String),
    Io(io::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyLogicalPath => write!(f, "logical channel path is empty"),
            Self::InvalidOrigin(value) => write!(f, "invalid origin: {value}"),
            Self::Handshake(message) => write!(f, "handshake failed: {message}"),
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::MalformedPayload(message) => write!(f, "malformed payload: {message}"),
            Self::Io(error) => write!(f, "io error: {error}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<io::Error> for ChannelError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<WsError> for ChannelError {
    fn from(error: WsError) -> Self {
        match error {
            WsError::Io(io_err) => Self::Io(io_err),
            other => Self::Transport(other.to_string()),
        }
    }
}
