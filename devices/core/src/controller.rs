//! Streaming controller.
//!
//! Pushes one encoded frame across a transport, honouring each message's
//! [`Expect`]ation. Timeouts and the retry ceiling are passed in explicitly through
//! [`StreamPolicy`]; nothing here keeps timers or state between frames.
//!
//! Every write and every wait first checks the session's cancel flag. A raised flag
//! ends the frame with [`Error::SessionClosed`] on a message boundary, never inside
//! a write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};
use crate::{abi, EncodedFrame, Error, Expect, ProtocolVariant, Result, WireMessage};

/// Longest slice of a bounded wait, and so the longest a close request goes unnoticed
pub const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Bounds for every blocking wait while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Wait for the fixed-frame acknowledgement byte
    pub ack_timeout: Duration,
    /// Wait for a flow-control signal between image blocks
    pub flow_control_timeout: Duration,
    /// Total attempts per fixed frame, including the first
    pub max_attempts: u32,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(250),
            flow_control_timeout: Duration::from_millis(1000),
            max_attempts: 3,
        }
    }
}

/// Outcome of a transmitted frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub bytes_written: usize,
    pub messages: usize,
    /// Attempts used, only above one for retried fixed frames
    pub attempts: u32,
}

/// Fail with [`Error::SessionClosed`] once `cancel` is raised
pub(crate) fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Acquire) {
        return Err(Error::SessionClosed);
    }
    Ok(())
}

/// Read the next non-empty reply before `deadline`, in [`CANCEL_POLL`] slices.
/// `None` means the deadline passed in silence.
pub(crate) fn await_reply(
    transport: &mut dyn Transport,
    deadline: Instant,
    cancel: &AtomicBool,
) -> Result<Option<Vec<u8>>> {
    loop {
        check_cancel(cancel)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        match transport.read_block(abi::REPORT_LEN, remaining.min(CANCEL_POLL)) {
            Ok(reply) if !reply.is_empty() => return Ok(Some(reply)),
            Ok(_) | Err(TransportError::Timeout(_)) => {},
            Err(e) => return Err(e.into()),
        }
    }
}

/// Transmit one frame, dispatching on the dialect's acknowledgement rules
pub fn transmit(
    transport: &mut dyn Transport,
    frame: &EncodedFrame,
    policy: &StreamPolicy,
    cancel: &AtomicBool,
) -> Result<StreamReport> {
    match frame.variant {
        ProtocolVariant::RawBlockCanvas | ProtocolVariant::FixedLightingReport => {
            send_unacknowledged(transport, &frame.messages, cancel)
        },
        ProtocolVariant::HandshakeFramedImage => {
            send_flow_controlled(transport, &frame.messages, policy.flow_control_timeout, cancel)
        },
        ProtocolVariant::PrefixedFixedFrame => {
            send_acknowledged(transport, &frame.messages, policy, cancel)
        },
    }
}

fn send_unacknowledged(
    transport: &mut dyn Transport,
    messages: &[WireMessage],
    cancel: &AtomicBool,
) -> Result<StreamReport> {
    let mut report = StreamReport {
        attempts: 1,
        ..Default::default()
    };
    for msg in messages {
        check_cancel(cancel)?;
        transport.write_block(&msg.to_bytes())?;
        report.bytes_written += msg.len();
        report.messages += 1;
    }
    Ok(report)
}

fn send_flow_controlled(
    transport: &mut dyn Transport,
    messages: &[WireMessage],
    timeout: Duration,
    cancel: &AtomicBool,
) -> Result<StreamReport> {
    let mut report = StreamReport {
        attempts: 1,
        ..Default::default()
    };
    for (i, msg) in messages.iter().enumerate() {
        check_cancel(cancel)?;
        transport.write_block(&msg.to_bytes())?;
        report.bytes_written += msg.len();
        report.messages += 1;

        if msg.expect == Expect::FlowControl {
            // a missing signal aborts the whole frame
            if await_reply(transport, Instant::now() + timeout, cancel)?.is_none() {
                warn!(block = i, "no flow-control signal, aborting frame");
                return Err(Error::Transport(TransportError::Timeout(timeout)));
            }
        }
    }
    Ok(report)
}

fn send_acknowledged(
    transport: &mut dyn Transport,
    messages: &[WireMessage],
    policy: &StreamPolicy,
    cancel: &AtomicBool,
) -> Result<StreamReport> {
    let mut report = StreamReport::default();
    for msg in messages {
        let bytes = msg.to_bytes();
        let mut attempt = 0;
        loop {
            attempt += 1;
            check_cancel(cancel)?;
            transport.write_block(&bytes)?;
            match wait_for_ack(transport, policy.ack_timeout, cancel) {
                Ok(()) => break,
                Err(Error::AckTimeout(timeout)) => {
                    debug!(attempt, ?timeout, "frame unacknowledged");
                    if attempt >= policy.max_attempts {
                        return Err(Error::RetryExhausted { attempts: attempt });
                    }
                },
                Err(e) => return Err(e),
            }
        }
        report.attempts = report.attempts.max(attempt);
        report.bytes_written += msg.len();
        report.messages += 1;
    }
    Ok(report)
}

/// Wait for [`abi::FIXED_FRAME_ACK`], ignoring other traffic until the deadline
fn wait_for_ack(transport: &mut dyn Transport, timeout: Duration, cancel: &AtomicBool) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match await_reply(transport, deadline, cancel)? {
            Some(reply) if reply.first() == Some(&abi::FIXED_FRAME_ACK) => return Ok(()),
            Some(reply) => debug!(?reply, "ignoring non-ack reply"),
            None => return Err(Error::AckTimeout(timeout)),
        }
    }
}
