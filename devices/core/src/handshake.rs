//! Resolution discovery for HID panel dialects.
//!
//! The host sends [`abi::probe`], the device answers with a device-type marker and a
//! resolution-class code. A handshake runs at most once per session open; any failure,
//! including a close request while waiting, is terminal and the device has to be reopened.

use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::controller::{await_reply, check_cancel};
use crate::transport::Transport;
use crate::{abi, Error, ProtocolVariant, Resolution, Result};

/// Reply wait for the chunked image dialect
pub const FRAMED_IMAGE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Reply wait for the fixed-frame dialect
pub const FIXED_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Default reply wait for a dialect, `None` when the dialect has no handshake
pub const fn default_timeout(variant: ProtocolVariant) -> Option<Duration> {
    match variant {
        ProtocolVariant::HandshakeFramedImage => Some(FRAMED_IMAGE_TIMEOUT),
        ProtocolVariant::PrefixedFixedFrame => Some(FIXED_FRAME_TIMEOUT),
        ProtocolVariant::RawBlockCanvas | ProtocolVariant::FixedLightingReport => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingDeviceType,
    ResolutionBound(Resolution),
    Faulted,
}

/// Parsed handshake reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceType {
    pub marker: u8,
    pub resolution: Resolution,
}

/// Decode a reply into its device type. Pure, used by [`Handshake::run`].
pub fn parse_reply(reply: &[u8]) -> Result<DeviceType> {
    let marker = reply.first().copied().unwrap_or(0);
    let code = reply.get(abi::RESOLUTION_CODE_OFFSET).copied().unwrap_or(0);
    if !abi::REPLY_MARKERS.contains(&marker) {
        return Err(Error::HandshakeProtocolMismatch { marker, code });
    }
    let resolution =
        Resolution::from_code(code).ok_or(Error::HandshakeProtocolMismatch { marker, code })?;
    Ok(DeviceType { marker, resolution })
}

/// Single-use handshake state machine
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    device_type: Option<DeviceType>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            device_type: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.device_type
    }

    /// Probe the device and bind its resolution.
    ///
    /// Idle → AwaitingDeviceType → ResolutionBound on success, Faulted otherwise.
    /// Calling again after a bound result returns the same resolution without
    /// touching the transport; calling after a fault fails immediately.
    pub fn run(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<Resolution> {
        match self.state {
            HandshakeState::Idle => {},
            HandshakeState::ResolutionBound(res) => return Ok(res),
            HandshakeState::AwaitingDeviceType | HandshakeState::Faulted => {
                return Err(Error::SessionFaulted)
            },
        }

        self.state = HandshakeState::AwaitingDeviceType;
        match Self::exchange(transport, timeout, cancel) {
            Ok(device_type) => {
                debug!(
                    marker = device_type.marker,
                    resolution = %device_type.resolution,
                    "handshake complete"
                );
                self.device_type = Some(device_type);
                self.state = HandshakeState::ResolutionBound(device_type.resolution);
                Ok(device_type.resolution)
            },
            Err(e) => {
                warn!("handshake failed: {e}");
                self.state = HandshakeState::Faulted;
                Err(e)
            },
        }
    }

    fn exchange(
        transport: &mut dyn Transport,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<DeviceType> {
        check_cancel(cancel)?;
        transport.write_block(&abi::probe())?;
        match await_reply(transport, Instant::now() + timeout, cancel)? {
            Some(reply) => parse_reply(&reply),
            None => Err(Error::HandshakeTimeout(timeout)),
        }
    }
}
