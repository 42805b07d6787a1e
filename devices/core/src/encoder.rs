//! Pure frame encoders.
//!
//! Each dialect turns a [`Frame`] into an ordered list of [`WireMessage`]s. Encoding
//! never touches the transport or the session, so a rejected frame costs nothing.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::{abi, Error, Frame, PixelBuffer, PixelFormat, ProtocolVariant, Resolution, Result, Rgb};

/// JPEG quality for framed images
pub const JPEG_QUALITY: u8 = 90;

/// What the sender must wait for after writing a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Nothing,
    /// Any report from the device before streaming continues
    FlowControl,
    /// The explicit acknowledgement byte
    Acknowledgement,
}

/// One transport write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
    pub expect: Expect,
}

impl WireMessage {
    pub fn new(header: Vec<u8>, payload: Vec<u8>, expect: Expect) -> Self {
        Self {
            header,
            payload,
            expect,
        }
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Header followed by payload, as written to the device
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Ordered messages making up one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub variant: ProtocolVariant,
    pub messages: Vec<WireMessage>,
}

impl EncodedFrame {
    /// Total bytes across every message
    pub fn len(&self) -> usize {
        self.messages.iter().map(WireMessage::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every message concatenated
    pub fn to_bytes(&self) -> Vec<u8> {
        self.messages.iter().flat_map(WireMessage::to_bytes).collect()
    }
}

/// Encode a frame for a dialect. `resolution` is the session's bound resolution.
pub fn encode(
    variant: ProtocolVariant,
    resolution: Option<Resolution>,
    frame: &Frame,
) -> Result<EncodedFrame> {
    let messages = match variant {
        ProtocolVariant::RawBlockCanvas => encode_raw_canvas(bound(resolution)?, frame)?,
        ProtocolVariant::HandshakeFramedImage => encode_framed_image(bound(resolution)?, frame)?,
        ProtocolVariant::PrefixedFixedFrame => encode_prefixed_frame(bound(resolution)?, frame)?,
        ProtocolVariant::FixedLightingReport => encode_lighting(frame)?,
    };
    Ok(EncodedFrame { variant, messages })
}

fn bound(resolution: Option<Resolution>) -> Result<Resolution> {
    resolution.ok_or(Error::SessionNotReady)
}

/// Byte count of a raw RGB565 canvas
pub const fn canvas_len(resolution: Resolution) -> usize {
    resolution.pixel_count() * 2
}

/// Pack pixels as little-endian RGB565, row-major
pub fn pack_rgb565(buffer: &PixelBuffer) -> Vec<u8> {
    if buffer.format() == PixelFormat::Rgb565Le {
        return buffer.data().to_vec();
    }
    buffer
        .rgb_pixels()
        .flat_map(|[r, g, b]| rgb565::Rgb565::from_rgb888_components(r, g, b).to_rgb565_le())
        .collect()
}

/// What a canvas dialect gets to encode
enum Source<'a> {
    Pixels(PixelBuffer),
    Encoded(&'a [u8]),
}

/// Source for `frame` at `resolution`, rejecting mismatched dimensions
fn source(resolution: Resolution, frame: &Frame) -> Result<Source<'_>> {
    match frame {
        Frame::Canvas(buf) => {
            if (buf.width(), buf.height()) != resolution.dimensions() {
                return Err(Error::FrameEncoding(format!(
                    "frame is {}x{} but the device is {resolution}",
                    buf.width(),
                    buf.height()
                )));
            }
            Ok(Source::Pixels(buf.clone()))
        },
        Frame::Color(color) => Ok(Source::Pixels(PixelBuffer::solid(
            resolution.width(),
            resolution.height(),
            *color,
        ))),
        Frame::Encoded(data) => Ok(Source::Encoded(data)),
    }
}

fn encode_raw_canvas(resolution: Resolution, frame: &Frame) -> Result<Vec<WireMessage>> {
    let payload = match source(resolution, frame)? {
        Source::Pixels(buf) => pack_rgb565(&buf),
        Source::Encoded(data) => {
            if data.len() != canvas_len(resolution) {
                return Err(Error::FrameEncoding(format!(
                    "raw canvas must be exactly {} bytes, got {}",
                    canvas_len(resolution),
                    data.len()
                )));
            }
            data.to_vec()
        },
    };
    Ok(vec![WireMessage::new(Vec::new(), payload, Expect::Nothing)])
}

/// Length after block alignment. Already aligned input still gains one zero block.
pub const fn padded_len(len: usize) -> usize {
    (len / abi::BLOCK_SIZE + 1) * abi::BLOCK_SIZE
}

/// Compress a canvas to JPEG
pub fn compress(buffer: &PixelBuffer) -> Result<Vec<u8>> {
    let rgb: Vec<u8> = buffer.rgb_pixels().flatten().collect();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(&rgb, buffer.width(), buffer.height(), ExtendedColorType::Rgb8)
        .map_err(|e| Error::FrameEncoding(format!("jpeg encoding failed: {e}")))?;
    Ok(out)
}

/// Header, image and zero padding as one block-aligned buffer
pub fn frame_image(image: &[u8]) -> Result<Vec<u8>> {
    let total = padded_len(abi::FRAME_HEADER_LEN + image.len());
    let image_len = u32::try_from(image.len())
        .map_err(|_| Error::FrameEncoding(format!("image of {} bytes is too large", image.len())))?;
    let blocks = (total / abi::BLOCK_SIZE) as u32;

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&abi::frame_header(image_len, blocks, abi::IMAGE_COMMAND));
    buf.extend_from_slice(image);
    buf.resize(total, 0);
    Ok(buf)
}

fn encode_framed_image(resolution: Resolution, frame: &Frame) -> Result<Vec<WireMessage>> {
    let image = match source(resolution, frame)? {
        Source::Pixels(buf) => compress(&buf)?,
        Source::Encoded([]) => return Err(Error::FrameEncoding("empty image payload".into())),
        Source::Encoded(data) => data.to_vec(),
    };
    let framed = frame_image(&image)?;

    let blocks = framed.len() / abi::BLOCK_SIZE;
    let messages = framed
        .chunks(abi::BLOCK_SIZE)
        .enumerate()
        .map(|(i, block)| {
            let expect = if (i + 1) % abi::FLOW_CONTROL_INTERVAL == 0 && i + 1 < blocks {
                Expect::FlowControl
            } else {
                Expect::Nothing
            };
            // the frame header travels as the first message's header
            let (header, payload) = if i == 0 {
                block.split_at(abi::FRAME_HEADER_LEN)
            } else {
                (&[][..], block)
            };
            WireMessage::new(header.to_vec(), payload.to_vec(), expect)
        })
        .collect();
    Ok(messages)
}

fn encode_prefixed_frame(resolution: Resolution, frame: &Frame) -> Result<Vec<WireMessage>> {
    let size = canvas_len(resolution);
    let mut payload = match source(resolution, frame)? {
        Source::Pixels(buf) => pack_rgb565(&buf),
        Source::Encoded(data) => {
            if data.len() > size {
                return Err(Error::FrameEncoding(format!(
                    "frame of {} bytes exceeds the device's {size} bytes",
                    data.len()
                )));
            }
            data.to_vec()
        },
    };
    payload.resize(size, 0);
    Ok(vec![WireMessage::new(
        vec![abi::FIXED_FRAME_MARKER],
        payload,
        Expect::Acknowledgement,
    )])
}

/// A lighting report is a pure function of the colour
pub fn lighting_report(color: Rgb) -> [u8; abi::REPORT_LEN] {
    abi::lighting(color)
}

fn encode_lighting(frame: &Frame) -> Result<Vec<WireMessage>> {
    match frame {
        Frame::Color(color) => Ok(vec![WireMessage::new(
            Vec::new(),
            lighting_report(*color).to_vec(),
            Expect::Nothing,
        )]),
        _ => Err(Error::FrameEncoding(
            "lighting devices only accept a colour".into(),
        )),
    }
}
