use std::fmt::{self, Display};
use std::str::FromStr;

use crate::transport::Granularity;
use crate::{Error, Result};

/// USB vendor/product identifier pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSignature {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceSignature {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl Display for DeviceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceSignature {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (vid, pid) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid signature {s}, expected VID:PID"))?;
        let parse = |part: &str| {
            u16::from_str_radix(part.trim_start_matches("0x"), 16)
                .map_err(|_| format!("invalid hex id {part} in {s}"))
        };
        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Wire dialect spoken by a device. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVariant {
    /// Raw RGB565 canvas over mass-storage passthrough
    RawBlockCanvas,
    /// Handshake, then a block-aligned compressed image streamed in chunks
    HandshakeFramedImage,
    /// Handshake, then a marker-prefixed fixed-size frame with acknowledgement
    PrefixedFixedFrame,
    /// Fixed-size static colour report
    FixedLightingReport,
}

impl ProtocolVariant {
    /// Whether a session must negotiate its resolution before streaming
    pub const fn requires_handshake(&self) -> bool {
        match self {
            Self::HandshakeFramedImage | Self::PrefixedFixedFrame => true,
            Self::RawBlockCanvas | Self::FixedLightingReport => false,
        }
    }

    /// Transfer style backing this dialect
    pub const fn granularity(&self) -> Granularity {
        match self {
            Self::RawBlockCanvas => Granularity::Block,
            Self::HandshakeFramedImage | Self::PrefixedFixedFrame | Self::FixedLightingReport => {
                Granularity::Report
            },
        }
    }

    pub const fn is_canvas(&self) -> bool {
        !matches!(self, Self::FixedLightingReport)
    }
}

impl Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RawBlockCanvas => "raw block canvas",
            Self::HandshakeFramedImage => "handshake framed image",
            Self::PrefixedFixedFrame => "prefixed fixed frame",
            Self::FixedLightingReport => "fixed lighting report",
        })
    }
}

/// Native canvas sizes reported by supported panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    R240x240,
    R320x320,
    R360x360,
    R480x480,
}

impl Resolution {
    /// Map a handshake resolution-class code
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::R240x240),
            0x02 => Some(Self::R320x320),
            0x03 => Some(Self::R480x480),
            0x04 => Some(Self::R360x360),
            _ => None,
        }
    }

    pub const fn code(&self) -> u8 {
        match self {
            Self::R240x240 => 0x01,
            Self::R320x320 => 0x02,
            Self::R480x480 => 0x03,
            Self::R360x360 => 0x04,
        }
    }

    pub const fn width(&self) -> u32 {
        match self {
            Self::R240x240 => 240,
            Self::R320x320 => 320,
            Self::R360x360 => 360,
            Self::R480x480 => 480,
        }
    }

    pub const fn height(&self) -> u32 {
        // all supported panels are square
        self.width()
    }

    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub const fn pixel_count(&self) -> usize {
        (self.width() * self.height()) as usize
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width(), self.height())
    }
}

/// Result of a registry lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub signature: DeviceSignature,
    pub variant: ProtocolVariant,
    pub name: &'static str,
    /// Fixed resolution, only known up front for raw block canvases
    pub resolution: Option<Resolution>,
    /// Resolution this product usually reports, for display only
    pub resolution_hint: Option<Resolution>,
}

/// RGB colour triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

/// Memory layout of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb888,
    Rgba8888,
    /// Packed 16-bit, little-endian
    Rgb565Le,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb888 => 3,
            Self::Rgba8888 => 4,
            Self::Rgb565Le => 2,
        }
    }
}

/// Row-major pixel data with validated dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap a buffer, rejecting data whose length does not match the dimensions
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| {
                Error::FrameEncoding(format!("{width}x{height} {format:?} buffer is too large"))
            })?;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(Error::FrameEncoding(format!(
                "{width}x{height} {format:?} buffer must be {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Solid RGB888 canvas
    pub fn solid(width: u32, height: u32, color: Rgb) -> Self {
        let data = color.0.repeat(width as usize * height as usize);
        Self {
            width,
            height,
            format: PixelFormat::Rgb888,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Iterate pixels as RGB888 triples, dropping alpha
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data
            .chunks_exact(self.format.bytes_per_pixel())
            .map(move |px| match self.format {
                PixelFormat::Rgb888 | PixelFormat::Rgba8888 => [px[0], px[1], px[2]],
                PixelFormat::Rgb565Le => {
                    let v = u16::from_le_bytes([px[0], px[1]]);
                    let (r, g, b) = ((v >> 11) & 0x1F, (v >> 5) & 0x3F, v & 0x1F);
                    // expand by replicating the high bits into the low bits
                    [
                        ((r << 3) | (r >> 2)) as u8,
                        ((g << 2) | (g >> 4)) as u8,
                        ((b << 3) | (b >> 2)) as u8,
                    ]
                },
            })
    }
}

/// A unit of work submitted to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Full canvas, must match the session resolution exactly
    Canvas(PixelBuffer),
    /// Solid colour; a lighting report, or a filled canvas on LCDs
    Color(Rgb),
    /// Payload already in the device's native encoding
    Encoded(Vec<u8>),
}
