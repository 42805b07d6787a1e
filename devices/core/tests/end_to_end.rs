use trcc_core::abi;
use trcc_core::transport::mock::{MockDevice, MockOpener};
use trcc_core::{
    DeviceSignature, Frame, PixelBuffer, PixelFormat, Registry, Resolution, Rgb, Session,
    SessionOptions, SessionState,
};

#[test]
fn framed_image_session_streams_a_240_canvas() {
    let device = MockDevice::new();
    // answer the probe with the 240x240 class
    device.respond_with(|bytes| (bytes == &abi::probe()[..]).then(|| vec![0xDB, 0x01]));

    let mut session = Session::open(
        &Registry::builtin(),
        DeviceSignature::new(0x0416, 0x5302),
        &MockOpener::new(device.clone()),
        SessionOptions::default(),
    )
    .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.resolution(), Some(Resolution::R240x240));

    let data = (0..240u32 * 240)
        .flat_map(|i| [(i % 240) as u8, (i / 240) as u8, 0x80])
        .collect();
    let frame = Frame::Canvas(PixelBuffer::new(240, 240, PixelFormat::Rgb888, data).unwrap());

    let encoded = session.encode(&frame).unwrap();
    let bytes = encoded.to_bytes();
    assert_eq!(bytes.len() % 512, 0);
    assert_eq!(&bytes[..4], &abi::MAGIC);
    let image_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let blocks = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    assert_eq!(blocks * 512, bytes.len());
    assert!(abi::FRAME_HEADER_LEN + image_len < bytes.len());
    assert_eq!(bytes[12], abi::IMAGE_COMMAND);

    // one flow-control signal per full interval before the last block
    let waits = (blocks - 1) / abi::FLOW_CONTROL_INTERVAL;
    for _ in 0..waits {
        device.queue_reply(vec![0x01]);
    }
    let report = session.submit_frame(&frame).unwrap();
    assert_eq!(report.bytes_written, bytes.len());

    // the probe, then the frame in block order
    let writes = device.writes();
    assert_eq!(writes[0], abi::probe().to_vec());
    assert_eq!(writes[1..].concat(), bytes);
    assert!(writes[1..].iter().all(|w| w.len() == 512));
}

#[test]
fn lighting_session_sends_a_green_report() {
    let device = MockDevice::new();
    let mut session = Session::open(
        &Registry::builtin(),
        DeviceSignature::new(0x0416, 0x8001),
        &MockOpener::new(device.clone()),
        SessionOptions::default(),
    )
    .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.resolution(), None);

    session.submit_frame(&Frame::Color(Rgb::new(0, 255, 0))).unwrap();

    let writes = device.writes();
    assert_eq!(writes.len(), 1);
    let report = &writes[0];
    assert_eq!(report.len(), 64);
    assert_eq!(&report[..abi::LIGHTING_COLOR_OFFSET], &[0xDA, 0xDB, 0xDC, 0xDD, 0x01]);
    assert_eq!(
        &report[abi::LIGHTING_COLOR_OFFSET..abi::LIGHTING_COLOR_OFFSET + 3],
        &[0, 255, 0]
    );
    assert!(report[abi::LIGHTING_COLOR_OFFSET + 3..].iter().all(|b| *b == 0));
}

#[test]
fn reopening_after_fault_starts_a_fresh_handshake() {
    let device = MockDevice::new();
    let opener = MockOpener::new(device.clone());
    let registry = Registry::builtin();
    let signature = DeviceSignature::new(0x0418, 0x5303);

    // first open: silent device
    assert!(Session::open(&registry, signature, &opener, SessionOptions::default()).is_err());

    // second open: device answers
    device.queue_reply(vec![0xDC, 0x02]);
    let session = Session::open(&registry, signature, &opener, SessionOptions::default()).unwrap();
    assert_eq!(session.resolution(), Some(Resolution::R320x320));
    assert_eq!(device.open_count(), 2);
}
