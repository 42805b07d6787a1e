//! Concrete transports for trcc devices.
//!
//! HID dialects are driven through `hidapi`, mass-storage canvases through SCSI generic
//! passthrough. Every open takes a process-wide claim on the physical device, so a
//! second session on the same device fails with [`TransportError::Busy`].

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use trcc_core::{DeviceDescriptor, DeviceSignature, Granularity, Transport, TransportError, TransportOpener};

pub mod hid;
pub mod scsi;

/// A USB device currently on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub signature: DeviceSignature,
    /// hidraw path or `/dev/sgN` node
    pub path: String,
    pub product: Option<String>,
    pub granularity: Granularity,
}

/// List attached HID and SCSI generic devices, one entry per physical device
pub fn enumerate() -> Result<Vec<AttachedDevice>, TransportError> {
    let mut devices = hid::attached()?;
    devices.extend(scsi::attached());
    Ok(devices)
}

/// Opens the transport matching a descriptor's transfer style
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceOpener;

impl TransportOpener for DeviceOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        Ok(match descriptor.variant.granularity() {
            Granularity::Report => Box::new(hid::HidTransport::open(descriptor)?),
            Granularity::Block => Box::new(scsi::ScsiTransport::open(descriptor)?),
        })
    }
}

static CLAIMS: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

/// Exclusive hold on one device node, released on drop
#[derive(Debug)]
pub(crate) struct Claim {
    key: String,
}

impl Claim {
    pub(crate) fn acquire(key: String) -> Result<Self, TransportError> {
        let mut held = CLAIMS.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return Err(TransportError::Busy);
        }
        Ok(Self { key })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        CLAIMS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_busy() {
        let first = Claim::acquire("test:busy".into()).unwrap();
        assert!(matches!(
            Claim::acquire("test:busy".into()),
            Err(TransportError::Busy)
        ));
        // other devices are unaffected
        let _other = Claim::acquire("test:other".into()).unwrap();
        drop(first);
        Claim::acquire("test:busy".into()).unwrap();
    }
}
