use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bpaf::{Bpaf, Parser};
use trcc_core::{DeviceSignature, Frame, Registry, Rgb, Session, SessionWorker};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::detection::{detect, open_session};
use crate::media::{Brightness, CanvasStyle, Rotation};
use crate::stream::{stream, test_pattern};

mod config;
mod detection;
mod media;
mod stream;

#[derive(Clone, Debug, Bpaf)]
struct MediaArgs {
    /// Use nearest neighbor interpolation when resizing, otherwise uses gaussian
    #[bpaf(short('n'), long("nearest"))]
    nearest: bool,
    /// Background color for transparent images, defaults to the configured color
    #[bpaf(short, long, argument("HEX"))]
    bg: Option<Color>,
    /// Rotate clockwise by 0, 90, 180 or 270 degrees, wrapping at 360
    #[bpaf(long, argument("DEG"))]
    rotate: Option<u32>,
    /// Brightness from 0 to 100 percent, clamped
    #[bpaf(long, argument("PERCENT"))]
    brightness: Option<i64>,
    /// Path to the image to send
    #[bpaf(positional("PATH"), guard(|p| p.exists(), "file not found"))]
    path: PathBuf,
}

/// Utility for easily parsing hex colors from bpaf
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
struct Color(pub [u8; 3]);
impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&Rgb::from(*self), f)
    }
}
impl FromStr for Color {
    type Err = String;
    fn from_str(code: &str) -> Result<Self, Self::Err> {
        // parse hex string into rgb
        let mut hex = code.trim_start_matches('#').to_string();
        match hex.len() {
            3 => {
                // Extend 3 character hex colors
                hex = hex.chars().flat_map(|a| [a, a]).collect();
            },
            6 => {},
            l => return Err(format!("Invalid hex length for {code}: {l}")),
        }
        if let Ok(channel_bytes) = u32::from_str_radix(&hex, 16) {
            let r = ((channel_bytes >> 16) & 0xFF) as u8;
            let g = ((channel_bytes >> 8) & 0xFF) as u8;
            let b = (channel_bytes & 0xFF) as u8;
            Ok(Self([r, g, b]))
        } else {
            Err(format!("Invalid hex color: {code}"))
        }
    }
}
impl From<Color> for Rgb {
    fn from(color: Color) -> Self {
        Rgb(color.0)
    }
}

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version, descr(env!("CARGO_PKG_DESCRIPTION")))]
struct Cli {
    /// Increase log verbosity, repeat for more
    #[bpaf(short('v'), long("verbose"), req_flag(()), count)]
    verbose: usize,
    /// Device to drive as VID:PID, overrides the configured default
    #[bpaf(long, argument("VID:PID"))]
    device: Option<DeviceSignature>,
    #[bpaf(external(command))]
    command: Command,
}

#[derive(Clone, Debug, Bpaf)]
enum Command {
    /// List attached devices and the dialect they speak
    #[bpaf(command)]
    Detect {
        /// Also list unsupported devices
        #[bpaf(short, long)]
        all: bool,
    },
    /// Remember a device as the default
    #[bpaf(command)]
    Select {
        #[bpaf(positional("VID:PID"))]
        device: DeviceSignature,
    },
    /// Fill the screen or LEDs with a solid color
    #[bpaf(command)]
    Color {
        /// Color as hex: #RRGGBB or #RGB
        #[bpaf(positional("HEX"))]
        color: Color,
    },
    /// Send a static image
    #[bpaf(command, fallback_to_usage)]
    Send(#[bpaf(external(media_args))] MediaArgs),
    /// Stream an animated image (gif/webp/apng)
    #[bpaf(command, fallback_to_usage)]
    Play {
        /// Loop until interrupted
        #[bpaf(short, long)]
        repeat: bool,
        /// Delay between frames, defaults to the configured interval
        #[bpaf(short, long, argument("DURATION"))]
        interval: Option<humantime::Duration>,
        #[bpaf(external(media_args))]
        media: MediaArgs,
    },
    /// Cycle through solid colors, one per second
    #[bpaf(command)]
    Test,
}

fn init_logging(verbose: usize) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("trcc={level},trcc_core={level},trcc_transport={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn print_detected(registry: &Registry, all: bool) -> Result<(), Box<dyn Error>> {
    let mut supported = 0;
    for detected in detect(registry)? {
        let device = &detected.device;
        match detected.descriptor {
            Ok(descriptor) => {
                supported += 1;
                let resolution = descriptor
                    .resolution
                    .or(descriptor.resolution_hint)
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "led".into());
                println!(
                    "{} {} [{}] {resolution} at {}",
                    device.signature, descriptor.name, descriptor.variant, device.path
                );
            },
            Err(_) if all => println!(
                "{} {} (unsupported) at {}",
                device.signature,
                device.product.as_deref().unwrap_or("unknown"),
                device.path
            ),
            Err(_) => {},
        }
    }
    if supported == 0 {
        return Err("no supported devices found".into());
    }
    Ok(())
}

/// Media options merged with the configured defaults
fn media_options(args: &MediaArgs, config: &Config) -> Result<CanvasStyle, Box<dyn Error>> {
    let bg: Color = match args.bg {
        Some(bg) => bg,
        None => config.media.background_color.parse()?,
    };
    let brightness = args
        .brightness
        .unwrap_or(config.media.brightness.into());
    Ok(CanvasStyle {
        background: bg.into(),
        nearest: args.nearest || config.media.use_nearest_neighbor,
        rotation: Rotation::from_degrees(args.rotate.unwrap_or(config.media.rotation)),
        brightness: Brightness::new(brightness),
    })
}

/// Move the session onto a worker and stream frames until done
fn run_stream(
    session: Session,
    config: &Config,
    frames: Vec<Frame>,
    interval: Duration,
    repeat: bool,
) -> Result<(), Box<dyn Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    let worker = SessionWorker::spawn(session, config.timing.queue_depth)?;
    let result = rt.block_on(stream(&worker, &frames, interval, repeat));
    let stats = worker.close();
    let summary = result?;
    println!(
        "{} after {} frames, skipped {}, {} retries",
        if summary.interrupted { "interrupted" } else { "finished" },
        summary.sent,
        summary.dropped,
        stats.retries
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli().run();
    init_logging(cli.verbose);
    let mut config = Config::load_or_create()?;
    let registry = Registry::builtin();

    match cli.command {
        Command::Detect { all } => print_detected(&registry, all),
        Command::Select { device } => {
            let descriptor = registry.resolve(device)?;
            config.general.device = Some(device.to_string());
            config.save()?;
            println!("selected {} ({})", descriptor.name, descriptor.signature);
            Ok(())
        },
        Command::Color { color } => {
            let mut session = open_session(&registry, &config, cli.device)?;
            session.submit_frame(&Frame::Color(color.into()))?;
            println!("set color to {color}");
            Ok(())
        },
        Command::Send(args) => {
            let style = media_options(&args, &config)?;
            let mut session = open_session(&registry, &config, cli.device)?;
            let resolution = session.resolution().ok_or("device has no screen")?;
            let image = ::image::open(&args.path)?;
            let canvas = media::to_canvas(&image, &style, resolution)?;
            let report = session.submit_frame(&Frame::Canvas(canvas))?;
            println!("sent {} bytes", report.bytes_written);
            Ok(())
        },
        Command::Play {
            repeat,
            interval,
            media,
        } => {
            let style = media_options(&media, &config)?;
            let session = open_session(&registry, &config, cli.device)?;
            let resolution = session.resolution().ok_or("device has no screen")?;

            print!("decoding animation ... ");
            let frames = media::decode_animation(&media.path)?;
            println!("{} frames", frames.len());
            let frames = media::animation_canvases(frames, &style, resolution)?
                .into_iter()
                .map(Frame::Canvas)
                .collect();

            let interval = interval.map_or(config.timing.frame_interval, Into::into);
            run_stream(session, &config, frames, interval, repeat)
        },
        Command::Test => {
            let session = open_session(&registry, &config, cli.device)?;
            run_stream(
                session,
                &config,
                test_pattern(),
                Duration::from_secs(1),
                false,
            )
        },
    }
}
