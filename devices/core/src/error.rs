use std::time::Duration;

use crate::transport::TransportError;
use crate::types::DeviceSignature;

/// Errors that can occur while resolving, opening or driving a device
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signature is not in the registry. Permanent, retrying will not help.
    #[error("unsupported device signature {0}")]
    UnsupportedSignature(DeviceSignature),

    /// Device was not found by the transport
    #[error("device not found")]
    DeviceNotFound,

    /// Transport failure, including flow-control timeouts on canvas dialects
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// Device never answered the probe
    #[error("no handshake reply within {0:?}")]
    HandshakeTimeout(Duration),

    /// Device answered the probe with an unknown marker or resolution code
    #[error("unexpected handshake reply (marker {marker:#04x}, code {code:#04x})")]
    HandshakeProtocolMismatch { marker: u8, code: u8 },

    /// Caller supplied data that cannot be framed for this device
    #[error("frame encoding failed: {0}")]
    FrameEncoding(String),

    /// A single frame went unacknowledged
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// Every attempt at a fixed frame went unacknowledged
    #[error("gave up after {attempts} unacknowledged attempts")]
    RetryExhausted { attempts: u32 },

    /// Session was closed
    #[error("session is closed")]
    SessionClosed,

    /// Session faulted and must be reopened
    #[error("session is faulted, reopen the device")]
    SessionFaulted,

    /// Session has not finished its handshake
    #[error("session is not ready for frames")]
    SessionNotReady,
}

impl Error {
    /// Protocol failures that always fault the session, regardless of dialect.
    ///
    /// Transport errors on the fixed-frame dialect also fault the session; that is
    /// decided by [`crate::Session`], not here.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::HandshakeTimeout(_)
                | Error::HandshakeProtocolMismatch { .. }
                | Error::RetryExhausted { .. }
        )
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound => Error::DeviceNotFound,
            err => Error::Transport(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_device_not_found() {
        assert!(matches!(
            Error::from(TransportError::NotFound),
            Error::DeviceNotFound
        ));
        assert!(matches!(
            Error::from(TransportError::Busy),
            Error::Transport(TransportError::Busy)
        ));
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::RetryExhausted { attempts: 3 }.is_session_fatal());
        assert!(Error::HandshakeTimeout(Duration::from_millis(5)).is_session_fatal());
        assert!(!Error::FrameEncoding("too long".into()).is_session_fatal());
        assert!(!Error::AckTimeout(Duration::from_millis(5)).is_session_fatal());
    }
}
