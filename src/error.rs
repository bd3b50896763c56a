//! Error types for the tunnel.

use thiserror::Error;

use crate::core::observability::ErrorClass;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Ways a length-prefixed frame or its message body can be malformed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingFault {
    /// Payload too short to carry the 4-byte message type tag
    #[error("message truncated: {actual} bytes, need at least {needed}")]
    Truncated { needed: usize, actual: usize },

    /// Length prefix announces more than the framer accepts
    #[error("frame of {announced} bytes exceeds limit of {limit}")]
    Oversized { announced: usize, limit: usize },

    /// Length prefix does not fit in the address space
    #[error("frame length {0} overflows")]
    LengthOverflow(u32),
}

/// Errors that terminate a relay or prevent the tunnel from starting.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("framing fault: {0}")]
    Framing(#[from] FramingFault),

    /// Message tag other than Reseed or Data
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// Reseed messages are declared on the wire but their handling is not defined.
    #[error("reseed message received; reseeding is unimplemented")]
    UnimplementedReseed,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Another connection from the same peer address held the channel too long
    #[error("channel for {0} is busy with another relay")]
    ChannelBusy(std::net::IpAddr),

    /// Relay requested on a channel that has no bound socket pair
    #[error("channel has no bound sockets")]
    NotBound,
}

impl TunnelError {
    pub fn config(msg: impl Into<String>) -> Self {
        TunnelError::Config(msg.into())
    }

    /// Counter bucket for this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            TunnelError::Framing(_) => ErrorClass::FRAMING,
            TunnelError::UnknownMessageType(_) => ErrorClass::UNKNOWN_MESSAGE,
            TunnelError::UnimplementedReseed => ErrorClass::UNIMPLEMENTED_RESEED,
            TunnelError::Io(_) | TunnelError::NotBound => ErrorClass::SOCKET_IO,
            TunnelError::Config(_) => ErrorClass::CONFIG,
            TunnelError::ChannelBusy(_) => ErrorClass::CHANNEL_BUSY,
        }
    }
}
