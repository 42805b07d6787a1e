//! Protocol core for USB LCD panels and RGB LED controllers.
//!
//! This crate provides:
//! - The static device signature [`Registry`] mapping VID:PID pairs to a [`ProtocolVariant`]
//! - The [`Transport`] boundary consumed by the core, plus a scripted mock for tests
//! - The handshake state machine discovering a device's native [`Resolution`]
//! - Pure frame encoders producing [`WireMessage`] sequences
//! - The streaming controller enforcing per-dialect acknowledgement and retry rules
//! - [`Session`] and [`SessionWorker`] tying the above together

pub mod abi;
pub mod controller;
pub mod encoder;
mod error;
pub mod handshake;
pub mod registry;
mod session;
pub mod transport;
mod types;
mod worker;

pub use controller::{StreamPolicy, StreamReport};
pub use encoder::{EncodedFrame, Expect, WireMessage};
pub use error::{Error, Result};
pub use handshake::{Handshake, HandshakeState};
pub use registry::{Registry, RegistryEntry};
pub use session::{Session, SessionOptions, SessionState, SessionStats};
pub use transport::{Granularity, Transport, TransportError, TransportOpener};
pub use types::{
    DeviceDescriptor, DeviceSignature, Frame, PixelBuffer, PixelFormat, ProtocolVariant,
    Resolution, Rgb,
};
pub use worker::SessionWorker;
