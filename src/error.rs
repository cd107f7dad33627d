use std::net::SocketAddr;

/// Errors surfaced by the codec, the engines, and the binaries.
///
/// Per the protocol's own error-handling design: a too-short decode buffer or
/// an invalid flag combination on encode is `InvalidSegment`; anything the
/// protocol considers a buggy peer (wrong FIN sequence number, overlapping
/// reorder-buffer segment, a non-ACK segment reaching the sender's main
/// loop, ...) is `ProtocolFatal` and is meant to be surfaced as the process's
/// exit code, never panicked on.
#[derive(Debug, thiserror::Error)]
pub enum UrpError {
    #[error("invalid segment: {reason}")]
    InvalidSegment { reason: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {detail}")]
    ProtocolFatal { detail: String },

    #[error("datagram from unexpected peer {0}")]
    UnexpectedPeer(SocketAddr),

    #[error("usage: {0}")]
    BadArgs(String),
}

pub type Result<T> = std::result::Result<T, UrpError>;

impl UrpError {
    pub fn fatal(detail: impl Into<String>) -> Self {
        UrpError::ProtocolFatal {
            detail: detail.into(),
        }
    }
}
