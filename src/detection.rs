//! Device detection and selection logic.

use trcc_core::{DeviceDescriptor, DeviceSignature, Registry, Session, TransportError};
use trcc_transport::{AttachedDevice, DeviceOpener};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no supported device attached, run `trcc detect --all` to list everything")]
    NoDevice,
    #[error(transparent)]
    Core(#[from] trcc_core::Error),
    #[error("failed to enumerate devices: {0}")]
    Enumerate(#[from] TransportError),
}

/// An attached device with its resolution result
#[derive(Debug)]
pub struct Detected {
    pub device: AttachedDevice,
    pub descriptor: Result<DeviceDescriptor, trcc_core::Error>,
}

/// Resolve every attached device against the registry
pub fn detect(registry: &Registry) -> Result<Vec<Detected>, SelectError> {
    Ok(trcc_transport::enumerate()?
        .into_iter()
        .map(|device| Detected {
            descriptor: registry.resolve(device.signature),
            device,
        })
        .collect())
}

/// Pick the device to drive.
///
/// An explicit signature wins and only has to be known. A configured default is used
/// while it is attached, otherwise the first attached supported device is chosen.
pub fn choose(
    registry: &Registry,
    explicit: Option<DeviceSignature>,
    configured: Option<DeviceSignature>,
    attached: &[DeviceSignature],
) -> Result<DeviceDescriptor, SelectError> {
    if let Some(signature) = explicit {
        return Ok(registry.resolve(signature)?);
    }
    if let Some(signature) = configured.filter(|s| attached.contains(s)) {
        return Ok(registry.resolve(signature)?);
    }
    attached
        .iter()
        .find_map(|s| registry.resolve(*s).ok())
        .ok_or(SelectError::NoDevice)
}

/// Select a device and open a ready session on it
pub fn open_session(
    registry: &Registry,
    config: &Config,
    explicit: Option<DeviceSignature>,
) -> Result<Session, SelectError> {
    let attached: Vec<DeviceSignature> = trcc_transport::enumerate()?
        .iter()
        .map(|d| d.signature)
        .collect();
    let descriptor = choose(registry, explicit, config.general.device(), &attached)?;
    println!("using {} ({})", descriptor.name, descriptor.signature);
    let options = config.session_options(descriptor.variant);
    Ok(Session::open(registry, descriptor.signature, &DeviceOpener, options)?)
}
