use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::{self, StreamPolicy, StreamReport};
use crate::encoder::{self, EncodedFrame};
use crate::handshake::{self, DeviceType, Handshake};
use crate::transport::{Transport, TransportOpener};
use crate::{
    DeviceDescriptor, DeviceSignature, Error, Frame, ProtocolVariant, Registry, Resolution, Result,
};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Idle,
    Handshaking,
    Ready,
    Faulted,
}

/// Tunables for a session. Unset handshake timeout falls back to the dialect default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub handshake_timeout: Option<Duration>,
    pub stream: StreamPolicy,
}

impl SessionOptions {
    fn handshake_timeout(&self, variant: ProtocolVariant) -> Duration {
        self.handshake_timeout
            .or(handshake::default_timeout(variant))
            .unwrap_or(handshake::FRAMED_IMAGE_TIMEOUT)
    }
}

/// Cumulative counters for one open session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    /// Extra attempts spent on unacknowledged fixed frames
    pub retries: u64,
    pub errors: u64,
}

/// Exclusive, stateful connection to one device
pub struct Session {
    descriptor: DeviceDescriptor,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    handshake: Handshake,
    resolution: Option<Resolution>,
    options: SessionOptions,
    stats: SessionStats,
    cancel: Arc<AtomicBool>,
}

impl Session {
    /// Resolve, open and initialize a device. Handshake failures close the transport
    /// and are returned as errors.
    pub fn open(
        registry: &Registry,
        signature: DeviceSignature,
        opener: &dyn TransportOpener,
        options: SessionOptions,
    ) -> Result<Self> {
        let descriptor = registry.resolve(signature)?;
        let mut session = Self::connect(descriptor, opener, options)?;
        if let Err(e) = session.initialize() {
            session.close();
            return Err(e);
        }
        Ok(session)
    }

    /// Open the transport, leaving the session idle
    pub fn connect(
        descriptor: DeviceDescriptor,
        opener: &dyn TransportOpener,
        options: SessionOptions,
    ) -> Result<Self> {
        let transport = opener.open(&descriptor)?;
        info!(device = %descriptor.signature, variant = %descriptor.variant, "opened device");
        Ok(Self {
            descriptor,
            transport: Some(transport),
            state: SessionState::Idle,
            handshake: Handshake::new(),
            resolution: descriptor.resolution,
            options,
            stats: SessionStats::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run the handshake when the dialect needs one, leaving the session ready or faulted
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle => {},
            SessionState::Ready => return Ok(()),
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Handshaking | SessionState::Faulted => return Err(Error::SessionFaulted),
        }

        if !self.descriptor.variant.requires_handshake() {
            self.state = SessionState::Ready;
            return Ok(());
        }

        let timeout = self.options.handshake_timeout(self.descriptor.variant);
        let transport = self.transport.as_mut().ok_or(Error::SessionClosed)?;
        self.state = SessionState::Handshaking;
        match self.handshake.run(transport.as_mut(), timeout, &self.cancel) {
            Ok(resolution) => {
                info!(%resolution, "resolution bound");
                self.resolution = Some(resolution);
                self.state = SessionState::Ready;
                Ok(())
            },
            Err(Error::SessionClosed) => {
                self.close();
                Err(Error::SessionClosed)
            },
            Err(e) => {
                self.stats.errors += 1;
                self.state = SessionState::Faulted;
                Err(e)
            },
        }
    }

    /// Flag that, once raised, ends any wait or frame in progress on a message
    /// boundary and closes the session. Safe to raise from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.descriptor.variant
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound resolution, `None` for lighting devices and before the handshake
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Device type reported during the handshake
    pub fn device_type(&self) -> Option<DeviceType> {
        self.handshake.device_type()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Encode a frame without sending it
    pub fn encode(&self, frame: &Frame) -> Result<EncodedFrame> {
        encoder::encode(self.descriptor.variant, self.resolution, frame)
    }

    /// Encode and transmit one frame.
    ///
    /// Encoding errors leave the session untouched. Canvas and lighting failures drop
    /// the frame and keep the session ready. Fixed-frame transport failures and retry
    /// exhaustion fault the session. A raised cancel flag closes it instead.
    pub fn submit_frame(&mut self, frame: &Frame) -> Result<StreamReport> {
        match self.state {
            SessionState::Ready => {},
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Faulted => return Err(Error::SessionFaulted),
            SessionState::Idle | SessionState::Handshaking => return Err(Error::SessionNotReady),
        }

        let encoded = self.encode(frame)?;
        let transport = self.transport.as_mut().ok_or(Error::SessionClosed)?;
        let outcome = controller::transmit(
            transport.as_mut(),
            &encoded,
            &self.options.stream,
            &self.cancel,
        );
        match outcome {
            Ok(report) => {
                self.stats.frames_sent += 1;
                self.stats.retries += u64::from(report.attempts.saturating_sub(1));
                debug!(bytes = report.bytes_written, "frame sent");
                Ok(report)
            },
            Err(Error::SessionClosed) => {
                info!("frame cancelled by close request");
                self.stats.frames_dropped += 1;
                self.close();
                Err(Error::SessionClosed)
            },
            Err(e) => {
                self.stats.errors += 1;
                let fatal = e.is_session_fatal()
                    || self.descriptor.variant == ProtocolVariant::PrefixedFixedFrame;
                if let Error::RetryExhausted { attempts } = &e {
                    self.stats.retries += u64::from(attempts.saturating_sub(1));
                }
                if fatal {
                    warn!("session faulted: {e}");
                    self.state = SessionState::Faulted;
                } else {
                    warn!("frame dropped: {e}");
                    self.stats.frames_dropped += 1;
                }
                Err(e)
            },
        }
    }

    /// Release the transport. Valid from any state, always succeeds.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!(device = %self.descriptor.signature, "closed device");
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("resolution", &self.resolution)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;
    use crate::transport::mock::{MockDevice, MockOpener};
    use crate::Rgb;

    fn sig(vid: u16, pid: u16) -> DeviceSignature {
        DeviceSignature::new(vid, pid)
    }

    fn acking_device(code: u8) -> MockDevice {
        let device = MockDevice::new();
        device.respond_with(move |bytes| match bytes[0] {
            abi::PROBE => Some(vec![0xDD, code]),
            abi::FIXED_FRAME_MARKER => Some(vec![abi::FIXED_FRAME_ACK]),
            _ => None,
        });
        device
    }

    #[test]
    fn raw_canvas_is_ready_without_handshake() {
        let device = MockDevice::new();
        let session = Session::open(
            &Registry::builtin(),
            sig(0x87CD, 0x70DB),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.resolution(), Some(Resolution::R320x320));
        assert_eq!(device.write_count(), 0);
    }

    #[test]
    fn unsupported_signature_never_opens() {
        let device = MockDevice::new();
        let err = Session::open(
            &Registry::builtin(),
            sig(0xFFFF, 0x0001),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSignature(_)));
        assert_eq!(device.open_count(), 0);
    }

    #[test]
    fn missing_device_is_not_found() {
        let device = MockDevice::new();
        device.set_missing(true);
        let err = Session::open(
            &Registry::builtin(),
            sig(0x0416, 0x8001),
            &MockOpener::new(device),
            SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound));
    }

    #[test]
    fn second_session_on_same_device_is_refused() {
        let device = MockDevice::new();
        let opener = MockOpener::new(device.clone());
        let registry = Registry::builtin();
        let mut first =
            Session::open(&registry, sig(0x0416, 0x8001), &opener, SessionOptions::default())
                .unwrap();
        let err = Session::open(&registry, sig(0x0416, 0x8001), &opener, SessionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Transport(crate::TransportError::Busy)));

        first.close();
        assert!(
            Session::open(&registry, sig(0x0416, 0x8001), &opener, SessionOptions::default())
                .is_ok()
        );
    }

    #[test]
    fn handshake_failure_faults_and_rejects_frames() {
        let device = MockDevice::new();
        device.queue_reply(vec![0xDB, 0x42]);
        let descriptor = Registry::builtin().resolve(sig(0x0416, 0x5302)).unwrap();
        let mut session = Session::connect(
            descriptor,
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(
            session.submit_frame(&Frame::Color(Rgb::default())),
            Err(Error::SessionNotReady)
        ));

        assert!(matches!(
            session.initialize(),
            Err(Error::HandshakeProtocolMismatch { .. })
        ));
        assert_eq!(session.state(), SessionState::Faulted);

        let writes = device.write_count();
        assert!(matches!(
            session.submit_frame(&Frame::Color(Rgb::default())),
            Err(Error::SessionFaulted)
        ));
        assert_eq!(device.write_count(), writes);
    }

    #[test]
    fn open_closes_transport_when_handshake_times_out() {
        let device = MockDevice::new();
        let err = Session::open(
            &Registry::builtin(),
            sig(0x0418, 0x5303),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::HandshakeTimeout(t) if t == handshake::FIXED_FRAME_TIMEOUT
        ));
        assert!(!device.is_open());
    }

    #[test]
    fn retry_exhaustion_faults_fixed_frame_session() {
        let device = MockDevice::new();
        device.respond_with(|bytes| (bytes[0] == abi::PROBE).then(|| vec![0xDB, 0x01]));
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0418, 0x5303),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(session.resolution(), Some(Resolution::R240x240));

        let err = session.submit_frame(&Frame::Color(Rgb::new(1, 2, 3))).unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 3 }));
        assert_eq!(session.state(), SessionState::Faulted);
        // handshake write plus three attempts
        assert_eq!(device.write_count(), 4);
        assert_eq!(session.stats().retries, 2);

        assert!(matches!(
            session.submit_frame(&Frame::Color(Rgb::new(1, 2, 3))),
            Err(Error::SessionFaulted)
        ));
        assert_eq!(device.write_count(), 4);
    }

    #[test]
    fn write_failure_faults_fixed_frame_session() {
        let device = acking_device(0x01);
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0418, 0x5303),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        device.set_fail_writes(true);

        let err = session.submit_frame(&Frame::Color(Rgb::new(4, 5, 6))).unwrap_err();
        assert!(matches!(err, Error::Transport(crate::TransportError::Io(_))));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(session.stats().errors, 1);
        assert_eq!(session.stats().frames_dropped, 0);

        // recovering the device does not revive the session
        device.set_fail_writes(false);
        assert!(matches!(
            session.submit_frame(&Frame::Color(Rgb::new(4, 5, 6))),
            Err(Error::SessionFaulted)
        ));
    }

    #[test]
    fn write_failure_only_drops_lighting_frame() {
        let device = MockDevice::new();
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0416, 0x8001),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        device.set_fail_writes(true);
        assert!(session.submit_frame(&Frame::Color(Rgb::new(1, 1, 1))).is_err());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.stats().frames_dropped, 1);
    }

    #[test]
    fn raised_cancel_flag_closes_without_faulting() {
        let device = MockDevice::new();
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0416, 0x8001),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        session.cancel_handle().store(true, Ordering::Release);
        assert!(session.is_cancelled());

        assert!(matches!(
            session.submit_frame(&Frame::Color(Rgb::new(1, 1, 1))),
            Err(Error::SessionClosed)
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.stats().errors, 0);
        assert_eq!(device.write_count(), 0);
        assert!(!device.is_open());
    }

    #[test]
    fn acknowledged_frames_keep_session_ready() {
        let device = acking_device(0x03);
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0418, 0x5304),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(session.resolution(), Some(Resolution::R480x480));
        assert_eq!(session.device_type().map(|t| t.marker), Some(0xDD));

        for _ in 0..3 {
            session.submit_frame(&Frame::Color(Rgb::new(9, 9, 9))).unwrap();
        }
        assert_eq!(session.stats().frames_sent, 3);
        assert_eq!(session.stats().retries, 0);
        let frame = &device.writes()[1];
        assert_eq!(frame.len(), 480 * 480 * 2 + 1);
    }

    #[test]
    fn dropped_canvas_frame_keeps_session_usable() {
        let device = MockDevice::new();
        device.queue_reply(vec![0xDB, 0x01]);
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0416, 0x5302),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();

        // large enough to need a flow-control signal that never comes
        let big = Frame::Encoded(vec![0x11; 40 * 512]);
        assert!(matches!(
            session.submit_frame(&big),
            Err(Error::Transport(crate::TransportError::Timeout(_)))
        ));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.stats().frames_dropped, 1);

        // next frame retries independently
        session.submit_frame(&Frame::Encoded(vec![0x22; 100])).unwrap();
        assert_eq!(session.stats().frames_sent, 1);
    }

    #[test]
    fn encoding_error_leaves_session_untouched() {
        let device = MockDevice::new();
        let mut session = Session::open(
            &Registry::builtin(),
            sig(0x0416, 0x5406),
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        let err = session.submit_frame(&Frame::Encoded(vec![0; 3])).unwrap_err();
        assert!(matches!(err, Error::FrameEncoding(_)));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(device.write_count(), 0);
        assert_eq!(session.stats(), SessionStats::default());
    }

    #[test]
    fn close_is_valid_from_any_state() {
        let device = MockDevice::new();
        let descriptor = Registry::builtin().resolve(sig(0x0416, 0x5302)).unwrap();
        let mut session = Session::connect(
            descriptor,
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        assert!(device.is_open());
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!device.is_open());
        assert!(matches!(
            session.submit_frame(&Frame::Color(Rgb::default())),
            Err(Error::SessionClosed)
        ));
        assert!(matches!(session.initialize(), Err(Error::SessionClosed)));
    }

    #[test]
    fn drop_releases_the_device() {
        let device = MockDevice::new();
        {
            let _session = Session::open(
                &Registry::builtin(),
                sig(0x0416, 0x8001),
                &MockOpener::new(device.clone()),
                SessionOptions::default(),
            )
            .unwrap();
            assert!(device.is_open());
        }
        assert!(!device.is_open());
    }
}
