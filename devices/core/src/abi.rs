//! Wire constants and fixed-size report builders.

use crate::Rgb;

/// Size of every fixed report (probe, lighting)
pub const REPORT_LEN: usize = 64;

/// Host probe opening the handshake
pub const PROBE: u8 = 0xDA;
/// Device-type markers a handshake reply may start with
pub const REPLY_MARKERS: [u8; 3] = [0xDB, 0xDC, 0xDD];
/// Offset of the resolution-class code in a handshake reply
pub const RESOLUTION_CODE_OFFSET: usize = 1;

/// Magic opening framed image headers and lighting reports
pub const MAGIC: [u8; 4] = [0xDA, 0xDB, 0xDC, 0xDD];
/// Framed image command byte
pub const IMAGE_COMMAND: u8 = 0x02;
/// Framed image header length
pub const FRAME_HEADER_LEN: usize = 16;
/// Framed image alignment and chunk size
pub const BLOCK_SIZE: usize = 512;
/// A flow-control signal is awaited after this many blocks
pub const FLOW_CONTROL_INTERVAL: usize = 16;

/// Marker preceding a fixed frame
pub const FIXED_FRAME_MARKER: u8 = 0xF5;
/// Acknowledgement byte echoed by the device after a fixed frame
pub const FIXED_FRAME_ACK: u8 = 0xF5;

/// Lighting command byte following the magic
pub const LIGHTING_COMMAND: u8 = 0x01;
/// Offset of the RGB triple in a lighting report
pub const LIGHTING_COLOR_OFFSET: usize = 5;

pub trait Arg {
    const SIZE: usize;
    fn to_bytes(&self) -> Vec<u8>;
}

impl Arg for u8 {
    const SIZE: usize = 1;
    fn to_bytes(&self) -> Vec<u8> {
        vec![*self]
    }
}

impl Arg for u32 {
    const SIZE: usize = 4;
    fn to_bytes(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }
}

impl Arg for Rgb {
    const SIZE: usize = 3;
    #[inline(always)]
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

macro_rules! impl_report_abi {
    [$(
        $( #[doc = $( $doc:tt )* ] )*
        fn $name:ident ( [ $( $hardcode:expr ),* ] $(, $arg:ident: $type:ty )* ) -> [u8; $len:expr];
    )+] => {
        $(
            $(#[doc = concat!("Construct a packet for", $($doc)*)])*
            #[allow(unused_mut, unused_variables, unused_assignments)]
            pub fn $name( $( $arg: $type ),* ) -> [u8; $len] {
                let mut buf = [0u8; $len];
                let mut cur = 0;
                $(
                    buf[cur] = $hardcode;
                    cur += 1;
                )*
                $(
                    let start = cur;
                    cur += <$type as Arg>::SIZE;
                    buf[start..cur].copy_from_slice(&$arg.to_bytes());
                )*
                buf
            }
        )*
    };
}

impl_report_abi![
    /// probing the device type and resolution class
    fn probe([PROBE]) -> [u8; REPORT_LEN];

    /// setting a static lighting colour
    fn lighting([MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], LIGHTING_COMMAND], color: Rgb) -> [u8; REPORT_LEN];

    /// the header preceding a block-aligned image
    fn frame_header(
        [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3]],
        image_len: u32,
        block_count: u32,
        command: u8
    ) -> [u8; FRAME_HEADER_LEN];
];
