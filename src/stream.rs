//! Timed frame streaming through a session worker

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use trcc_core::{Error, Frame, Rgb, SessionWorker};

/// Colours cycled by `trcc test`
pub const TEST_PATTERN: [(&str, Rgb); 7] = [
    ("red", Rgb::new(255, 0, 0)),
    ("green", Rgb::new(0, 255, 0)),
    ("blue", Rgb::new(0, 0, 255)),
    ("yellow", Rgb::new(255, 255, 0)),
    ("magenta", Rgb::new(255, 0, 255)),
    ("cyan", Rgb::new(0, 255, 255)),
    ("white", Rgb::new(255, 255, 255)),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub sent: u64,
    pub dropped: u64,
    pub interrupted: bool,
}

/// Submit `frames` one per `interval` until done or interrupted with ctrl-c.
///
/// Dropped frames are skipped. Errors that end the session stop the stream.
pub async fn stream(
    worker: &SessionWorker,
    frames: &[Frame],
    interval: Duration,
    repeat: bool,
) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    if frames.is_empty() {
        return Ok(summary);
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    'outer: loop {
        for frame in frames {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("interrupted, stopping stream");
                    summary.interrupted = true;
                    break 'outer;
                },
                _ = ticker.tick() => {},
            }
            match worker.submit(frame.clone()).await {
                Ok(_) => summary.sent += 1,
                Err(e @ (Error::SessionClosed | Error::SessionFaulted)) => return Err(e),
                Err(e) if e.is_session_fatal() => return Err(e),
                Err(e) => {
                    warn!("frame dropped: {e}");
                    summary.dropped += 1;
                },
            }
        }
        if !repeat {
            break;
        }
    }
    Ok(summary)
}

/// Frames for the colour test pattern
pub fn test_pattern() -> Vec<Frame> {
    TEST_PATTERN
        .iter()
        .map(|(_, color)| Frame::Color(*color))
        .collect()
}

#[cfg(test)]
mod tests {
    use trcc_core::abi;
    use trcc_core::transport::mock::{MockDevice, MockOpener};
    use trcc_core::{DeviceSignature, Registry, Session, SessionOptions};

    use super::*;

    fn worker(device: &MockDevice, signature: DeviceSignature) -> SessionWorker {
        let session = Session::open(
            &Registry::builtin(),
            signature,
            &MockOpener::new(device.clone()),
            SessionOptions::default(),
        )
        .unwrap();
        SessionWorker::spawn(session, 2).unwrap()
    }

    #[tokio::test]
    async fn pattern_reaches_the_device_in_order() {
        let device = MockDevice::new();
        let worker = worker(&device, DeviceSignature::new(0x0416, 0x8001));

        let summary = stream(&worker, &test_pattern(), Duration::from_millis(1), false)
            .await
            .unwrap();
        assert_eq!(summary.sent, 7);
        assert!(!summary.interrupted);

        let colors: Vec<_> = device
            .writes()
            .iter()
            .map(|w| w[abi::LIGHTING_COLOR_OFFSET..abi::LIGHTING_COLOR_OFFSET + 3].to_vec())
            .collect();
        let expected: Vec<_> = TEST_PATTERN.iter().map(|(_, c)| c.0.to_vec()).collect();
        assert_eq!(colors, expected);
        assert_eq!(worker.close().frames_sent, 7);
    }

    #[tokio::test]
    async fn fault_stops_the_stream() {
        let device = MockDevice::new();
        device.respond_with(|bytes| (bytes == &abi::probe()[..]).then(|| vec![0xDB, 0x01]));
        let worker = worker(&device, DeviceSignature::new(0x0418, 0x5303));

        let err = stream(&worker, &test_pattern(), Duration::from_millis(1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { .. }));
        let stats = worker.close();
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn nothing_to_stream() {
        let device = MockDevice::new();
        let worker = worker(&device, DeviceSignature::new(0x0416, 0x8001));
        let summary = stream(&worker, &[], Duration::from_millis(1), true).await.unwrap();
        assert_eq!(summary, Summary::default());
        assert_eq!(device.write_count(), 0);
    }
}
