//! Static device signature registry.

use crate::{DeviceDescriptor, DeviceSignature, Error, ProtocolVariant, Resolution, Result};

/// One row of the signature table
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub signature: DeviceSignature,
    pub variant: ProtocolVariant,
    pub name: &'static str,
    /// Known resolution for raw canvases, display hint for handshake dialects
    pub resolution: Option<Resolution>,
}

impl RegistryEntry {
    const fn new(
        vendor_id: u16,
        product_id: u16,
        variant: ProtocolVariant,
        name: &'static str,
        resolution: Option<Resolution>,
    ) -> Self {
        Self {
            signature: DeviceSignature::new(vendor_id, product_id),
            variant,
            name,
            resolution,
        }
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        let known = match self.variant {
            ProtocolVariant::RawBlockCanvas => self.resolution,
            _ => None,
        };
        DeviceDescriptor {
            signature: self.signature,
            variant: self.variant,
            name: self.name,
            resolution: known,
            resolution_hint: self.resolution,
        }
    }
}

/// Every supported device
pub static DEVICES: &[RegistryEntry] = &[
    RegistryEntry::new(
        0x87CD,
        0x70DB,
        ProtocolVariant::RawBlockCanvas,
        "Thermalright LCD (mass storage)",
        Some(Resolution::R320x320),
    ),
    RegistryEntry::new(
        0x0416,
        0x5406,
        ProtocolVariant::RawBlockCanvas,
        "Winbond LCD (mass storage)",
        Some(Resolution::R320x320),
    ),
    RegistryEntry::new(
        0x0402,
        0x3922,
        ProtocolVariant::RawBlockCanvas,
        "ALi LCD (mass storage)",
        Some(Resolution::R320x320),
    ),
    RegistryEntry::new(
        0x0416,
        0x5302,
        ProtocolVariant::HandshakeFramedImage,
        "Winbond LCD (HID)",
        Some(Resolution::R320x320),
    ),
    RegistryEntry::new(
        0x0418,
        0x5303,
        ProtocolVariant::PrefixedFixedFrame,
        "ALi LCD (HID)",
        Some(Resolution::R320x320),
    ),
    RegistryEntry::new(
        0x0418,
        0x5304,
        ProtocolVariant::PrefixedFixedFrame,
        "ALi LCD 480 (HID)",
        Some(Resolution::R480x480),
    ),
    RegistryEntry::new(
        0x0416,
        0x8001,
        ProtocolVariant::FixedLightingReport,
        "Winbond LED controller",
        None,
    ),
];

/// Immutable signature table, built once and passed by reference
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    entries: &'static [RegistryEntry],
}

impl Registry {
    /// Registry over the built in [`DEVICES`] table
    pub const fn builtin() -> Self {
        Self { entries: DEVICES }
    }

    pub const fn with_entries(entries: &'static [RegistryEntry]) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &'static [RegistryEntry] {
        self.entries
    }

    /// Look up a signature
    pub fn resolve(&self, signature: DeviceSignature) -> Result<DeviceDescriptor> {
        self.entries
            .iter()
            .find(|e| e.signature == signature)
            .map(RegistryEntry::descriptor)
            .ok_or(Error::UnsupportedSignature(signature))
    }

    pub fn is_supported(&self, signature: DeviceSignature) -> bool {
        self.entries.iter().any(|e| e.signature == signature)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
