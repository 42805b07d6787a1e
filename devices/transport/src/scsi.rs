//! SCSI generic passthrough for mass-storage panels.
//!
//! Frames are pushed with a single vendor WRITE-style command through the `SG_IO`
//! ioctl. Only available on Linux; elsewhere opening fails and nothing is enumerated.

use std::time::Duration;

use tracing::debug;
use trcc_core::{DeviceDescriptor, Transport, TransportError};

use crate::{AttachedDevice, Claim};

/// Vendor opcode for canvas transfers
pub const VENDOR_OPCODE: u8 = 0xF5;
/// Subcommand writing the canvas
pub const WRITE_CANVAS: u8 = 0x01;
pub const CDB_LEN: usize = 16;
/// Upper bound for one canvas transfer
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Command block for writing `len` bytes of canvas
pub fn cdb(len: u32) -> [u8; CDB_LEN] {
    let mut cdb = [0u8; CDB_LEN];
    cdb[0] = VENDOR_OPCODE;
    cdb[1] = WRITE_CANVAS;
    cdb[12..16].copy_from_slice(&len.to_le_bytes());
    cdb
}

/// Parse a sysfs `idVendor`/`idProduct` file
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_id(raw: &str) -> Option<u16> {
    u16::from_str_radix(raw.trim(), 16).ok()
}

#[cfg(target_os = "linux")]
mod sg {
    use std::fs::{self, File, OpenOptions};
    use std::os::fd::AsRawFd;
    use std::path::{Path, PathBuf};

    use trcc_core::{DeviceSignature, Granularity};

    use super::*;

    const SG_IO: libc::c_ulong = 0x2285;
    const SG_DXFER_TO_DEV: libc::c_int = -2;
    const SENSE_LEN: usize = 32;

    /// `struct sg_io_hdr` from `<scsi/sg.h>`
    #[repr(C)]
    struct SgIoHdr {
        interface_id: libc::c_int,
        dxfer_direction: libc::c_int,
        cmd_len: libc::c_uchar,
        mx_sb_len: libc::c_uchar,
        iovec_count: libc::c_ushort,
        dxfer_len: libc::c_uint,
        dxferp: *mut libc::c_void,
        cmdp: *mut libc::c_uchar,
        sbp: *mut libc::c_uchar,
        timeout: libc::c_uint,
        flags: libc::c_uint,
        pack_id: libc::c_int,
        usr_ptr: *mut libc::c_void,
        status: libc::c_uchar,
        masked_status: libc::c_uchar,
        msg_status: libc::c_uchar,
        sb_len_wr: libc::c_uchar,
        host_status: libc::c_ushort,
        driver_status: libc::c_ushort,
        resid: libc::c_int,
        duration: libc::c_uint,
        info: libc::c_uint,
    }

    const SYSFS: &str = "/sys/class/scsi_generic";

    /// Walk up from the sg device to the USB device carrying its ids
    fn signature_of(node: &Path) -> Option<DeviceSignature> {
        let mut dir: PathBuf = fs::canonicalize(node.join("device")).ok()?;
        loop {
            let vid = fs::read_to_string(dir.join("idVendor")).ok().and_then(|s| parse_id(&s));
            let pid = fs::read_to_string(dir.join("idProduct")).ok().and_then(|s| parse_id(&s));
            if let (Some(vid), Some(pid)) = (vid, pid) {
                return Some(DeviceSignature::new(vid, pid));
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    pub fn attached() -> Vec<AttachedDevice> {
        let Ok(entries) = fs::read_dir(SYSFS) else {
            return Vec::new();
        };
        let mut devices: Vec<AttachedDevice> = entries
            .flatten()
            .filter_map(|entry| {
                let signature = signature_of(&entry.path())?;
                Some(AttachedDevice {
                    signature,
                    path: format!("/dev/{}", entry.file_name().to_string_lossy()),
                    product: None,
                    granularity: Granularity::Block,
                })
            })
            .collect();
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        devices
    }

    pub struct ScsiTransport {
        file: Option<File>,
        claim: Option<Claim>,
    }

    impl ScsiTransport {
        pub fn open(descriptor: &DeviceDescriptor) -> Result<Self, TransportError> {
            let node = attached()
                .into_iter()
                .find(|d| d.signature == descriptor.signature)
                .ok_or(TransportError::NotFound)?;
            let claim = Claim::acquire(format!("sg:{}", node.path))?;
            let file = OpenOptions::new().read(true).write(true).open(&node.path)?;
            debug!(path = %node.path, "opened scsi generic node");
            Ok(Self {
                file: Some(file),
                claim: Some(claim),
            })
        }

        fn write_canvas(&self, bytes: &[u8]) -> Result<(), TransportError> {
            let file = self.file.as_ref().ok_or(TransportError::NotFound)?;
            let len = u32::try_from(bytes.len())
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
            let mut cdb = cdb(len);
            let mut data = bytes.to_vec();
            let mut sense = [0u8; SENSE_LEN];

            let mut hdr = SgIoHdr {
                interface_id: b'S' as libc::c_int,
                dxfer_direction: SG_DXFER_TO_DEV,
                cmd_len: CDB_LEN as libc::c_uchar,
                mx_sb_len: SENSE_LEN as libc::c_uchar,
                iovec_count: 0,
                dxfer_len: len,
                dxferp: data.as_mut_ptr().cast(),
                cmdp: cdb.as_mut_ptr(),
                sbp: sense.as_mut_ptr(),
                timeout: WRITE_TIMEOUT.as_millis() as libc::c_uint,
                flags: 0,
                pack_id: 0,
                usr_ptr: std::ptr::null_mut(),
                status: 0,
                masked_status: 0,
                msg_status: 0,
                sb_len_wr: 0,
                host_status: 0,
                driver_status: 0,
                resid: 0,
                duration: 0,
                info: 0,
            };

            // SAFETY: every pointer in `hdr` refers to a live local buffer of the declared length
            let ret = unsafe { libc::ioctl(file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoHdr) };
            if ret < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if hdr.status != 0 || hdr.host_status != 0 || hdr.driver_status != 0 {
                return Err(std::io::Error::other(format!(
                    "scsi command failed: status {:#04x}, host {:#06x}, driver {:#06x}",
                    hdr.status, hdr.host_status, hdr.driver_status
                ))
                .into());
            }
            Ok(())
        }
    }

    impl Transport for ScsiTransport {
        fn write_block(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.write_canvas(bytes)
        }

        fn read_block(&mut self, _max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
            // canvas devices never reply
            Err(TransportError::Timeout(timeout))
        }

        fn close(&mut self) {
            if self.file.take().is_some() {
                debug!("released scsi generic node");
            }
            self.claim.take();
        }
    }

    impl Drop for ScsiTransport {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sg {
    use super::*;

    pub fn attached() -> Vec<AttachedDevice> {
        Vec::new()
    }

    pub struct ScsiTransport {
        _claim: Claim,
    }

    impl ScsiTransport {
        pub fn open(_descriptor: &DeviceDescriptor) -> Result<Self, TransportError> {
            Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
        }
    }

    impl Transport for ScsiTransport {
        fn write_block(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::NotFound)
        }

        fn read_block(&mut self, _max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Timeout(timeout))
        }

        fn close(&mut self) {
            debug!("nothing to release");
        }
    }
}

pub use sg::{attached, ScsiTransport};
