//! Transport boundary consumed by the core.
//!
//! The core only writes whole blocks and reads replies with a bounded wait. How a
//! handle is backed (SCSI passthrough, HID reports) is up to the implementation.
//! Implementations must refuse a second open of the same physical device.

use std::time::Duration;

use crate::DeviceDescriptor;

/// Transfer style implied by a protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Mass-storage style raw block transfer
    Block,
    /// HID report transfer
    Report,
}

/// Errors raised at the transport boundary
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("device not found")]
    NotFound,

    #[error("device is already open in another session")]
    Busy,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// An open, exclusively owned device handle
pub trait Transport: Send {
    /// Write one block or report sequence. Either the whole buffer is handed to the
    /// device or an error is returned.
    fn write_block(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes, waiting at most `timeout`.
    fn read_block(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Release the handle. Must be idempotent.
    fn close(&mut self);
}

/// Opens transports for resolved descriptors
pub trait TransportOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>, TransportError>;
}

pub mod mock {
    //! Scripted in-memory device for tests.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

    #[derive(Default)]
    struct MockState {
        open: bool,
        missing: bool,
        fail_writes: bool,
        opens: usize,
        writes: Vec<Vec<u8>>,
        reads: usize,
        replies: VecDeque<Vec<u8>>,
        responder: Option<Responder>,
    }

    /// Shared handle to a simulated physical device
    #[derive(Clone, Default)]
    pub struct MockDevice {
        state: Arc<Mutex<MockState>>,
    }

    impl MockDevice {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Queue a reply returned by the next read
        pub fn queue_reply(&self, reply: impl Into<Vec<u8>>) {
            self.lock().replies.push_back(reply.into());
        }

        /// Run `f` on every write; a returned buffer is queued as a reply
        pub fn respond_with(&self, f: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static) {
            self.lock().responder = Some(Box::new(f));
        }

        /// Make the device disappear from the bus
        pub fn set_missing(&self, missing: bool) {
            self.lock().missing = missing;
        }

        /// Make every write fail with an io error
        pub fn set_fail_writes(&self, fail: bool) {
            self.lock().fail_writes = fail;
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.lock().writes.clone()
        }

        pub fn write_count(&self) -> usize {
            self.lock().writes.len()
        }

        pub fn read_count(&self) -> usize {
            self.lock().reads
        }

        pub fn open_count(&self) -> usize {
            self.lock().opens
        }

        pub fn is_open(&self) -> bool {
            self.lock().open
        }
    }

    /// Transport over a [`MockDevice`]. A read with nothing queued sleeps out its timeout.
    pub struct MockTransport {
        device: MockDevice,
        closed: bool,
    }

    impl Transport for MockTransport {
        fn write_block(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            let mut state = self.device.lock();
            if self.closed {
                return Err(TransportError::NotFound);
            }
            if state.fail_writes {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write failed").into());
            }
            state.writes.push(bytes.to_vec());
            let reply = state.responder.as_mut().and_then(|f| f(bytes));
            if let Some(reply) = reply {
                state.replies.push_back(reply);
            }
            Ok(())
        }

        fn read_block(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
            let reply = {
                let mut state = self.device.lock();
                state.reads += 1;
                state.replies.pop_front()
            };
            match reply {
                Some(mut reply) => {
                    reply.truncate(max_len);
                    Ok(reply)
                },
                None => {
                    // a silent device holds the caller for the whole wait
                    std::thread::sleep(timeout);
                    Err(TransportError::Timeout(timeout))
                },
            }
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.device.lock().open = false;
            }
        }
    }

    impl Drop for MockTransport {
        fn drop(&mut self) {
            self.close();
        }
    }

    /// Opener handing out transports for a single [`MockDevice`]
    #[derive(Clone, Default)]
    pub struct MockOpener {
        pub device: MockDevice,
    }

    impl MockOpener {
        pub fn new(device: MockDevice) -> Self {
            Self { device }
        }
    }

    impl TransportOpener for MockOpener {
        fn open(&self, _descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>, TransportError> {
            let mut state = self.device.lock();
            if state.missing {
                return Err(TransportError::NotFound);
            }
            if state.open {
                return Err(TransportError::Busy);
            }
            state.open = true;
            state.opens += 1;
            Ok(Box::new(MockTransport {
                device: self.device.clone(),
                closed: false,
            }))
        }
    }
}
