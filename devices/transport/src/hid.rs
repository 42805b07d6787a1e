//! HID report transport

use std::ffi::CString;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use hidapi::{HidApi, HidDevice, HidError};
use tracing::{debug, info};
use trcc_core::{
    DeviceDescriptor, DeviceSignature, Granularity, ProtocolVariant, Transport, TransportError,
};

use crate::{AttachedDevice, Claim};

/// Report size for the LCD dialects
pub const PANEL_REPORT_LEN: usize = 512;
/// Report size for LED controllers
pub const LIGHTING_REPORT_LEN: usize = 64;

/// Lazy handle to hidapi, created on first use and refreshed on every lookup
static API: LazyLock<Mutex<Option<HidApi>>> = LazyLock::new(Default::default);

fn hid_error(err: HidError) -> TransportError {
    TransportError::Io(std::io::Error::other(err.to_string()))
}

fn with_api<T>(f: impl FnOnce(&HidApi) -> Result<T, TransportError>) -> Result<T, TransportError> {
    let mut guard = API.lock().unwrap_or_else(|e| e.into_inner());
    let api = match guard.take() {
        Some(mut api) => {
            api.refresh_devices().map_err(hid_error)?;
            api
        },
        None => HidApi::new().map_err(hid_error)?,
    };
    f(guard.insert(api))
}

/// Output report size for a dialect
pub const fn report_len(variant: ProtocolVariant) -> usize {
    match variant {
        ProtocolVariant::FixedLightingReport => LIGHTING_REPORT_LEN,
        _ => PANEL_REPORT_LEN,
    }
}

/// Split a buffer into zero-padded output reports, each prefixed with report id 0
pub fn reports(bytes: &[u8], report_len: usize) -> impl Iterator<Item = Vec<u8>> + '_ {
    bytes.chunks(report_len).map(move |chunk| {
        let mut report = Vec::with_capacity(report_len + 1);
        report.push(0);
        report.extend_from_slice(chunk);
        report.resize(report_len + 1, 0);
        report
    })
}

/// Attached HID devices, first interface per device
pub fn attached() -> Result<Vec<AttachedDevice>, TransportError> {
    with_api(|api| {
        let mut devices: Vec<AttachedDevice> = Vec::new();
        for info in api.device_list() {
            let signature = DeviceSignature::new(info.vendor_id(), info.product_id());
            if devices.iter().any(|d| d.signature == signature) {
                continue;
            }
            devices.push(AttachedDevice {
                signature,
                path: info.path().to_string_lossy().into_owned(),
                product: info.product_string().map(str::to_string),
                granularity: Granularity::Report,
            });
        }
        Ok(devices)
    })
}

/// An open hidraw handle
pub struct HidTransport {
    device: Option<HidDevice>,
    report_len: usize,
    claim: Option<Claim>,
}

impl HidTransport {
    /// Open the first interface matching the descriptor's signature
    pub fn open(descriptor: &DeviceDescriptor) -> Result<Self, TransportError> {
        let signature = descriptor.signature;
        let (device, claim) = with_api(|api| {
            let path: CString = api
                .device_list()
                .find(|d| {
                    d.vendor_id() == signature.vendor_id && d.product_id() == signature.product_id
                })
                .ok_or(TransportError::NotFound)?
                .path()
                .to_owned();
            let claim = Claim::acquire(format!("hid:{}", path.to_string_lossy()))?;
            let device = api.open_path(&path).map_err(hid_error)?;
            Ok((device, claim))
        })?;
        info!(device = %signature, "opened hid device");
        Ok(Self {
            device: Some(device),
            report_len: report_len(descriptor.variant),
            claim: Some(claim),
        })
    }

    fn device(&self) -> Result<&HidDevice, TransportError> {
        self.device.as_ref().ok_or(TransportError::NotFound)
    }
}

impl Transport for HidTransport {
    fn write_block(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let device = self.device()?;
        for report in reports(bytes, self.report_len) {
            let written = device.write(&report).map_err(hid_error)?;
            if written == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
        }
        Ok(())
    }

    fn read_block(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let len = self
            .device()?
            .read_timeout(&mut buf, millis)
            .map_err(hid_error)?;
        if len == 0 {
            return Err(TransportError::Timeout(timeout));
        }
        buf.truncate(len);
        Ok(buf)
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("released hid device");
        }
        self.claim.take();
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_prefixed_and_padded() {
        let bytes: Vec<u8> = (0..100).collect();
        let out: Vec<_> = reports(&bytes, 64).collect();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.len() == 65 && r[0] == 0));
        assert_eq!(&out[0][1..], &bytes[..64]);
        assert_eq!(&out[1][1..37], &bytes[64..]);
        assert!(out[1][37..].iter().all(|b| *b == 0));
    }

    #[test]
    fn exact_multiple_adds_no_report() {
        assert_eq!(reports(&[1; 1024], PANEL_REPORT_LEN).count(), 2);
        assert_eq!(reports(&[7; 64], LIGHTING_REPORT_LEN).count(), 1);
    }

    #[test]
    fn lighting_uses_short_reports() {
        assert_eq!(report_len(ProtocolVariant::FixedLightingReport), 64);
        assert_eq!(report_len(ProtocolVariant::PrefixedFixedFrame), 512);
        assert_eq!(report_len(ProtocolVariant::HandshakeFramedImage), 512);
    }
}
