//! Image loading and canvas preparation

use std::error::Error;
use std::io::{stdout, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, DynamicImage, ImageFormat, ImageReader, RgbaImage};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use trcc_core::{PixelBuffer, PixelFormat, Resolution, Rgb};

/// Quarter-turn clockwise rotation of the source image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Upright,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    /// Degrees wrap at 360 and round down to a quarter turn
    pub fn from_degrees(degrees: u32) -> Self {
        match degrees % 360 / 90 {
            1 => Self::Quarter,
            2 => Self::Half,
            3 => Self::ThreeQuarter,
            _ => Self::Upright,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Upright => 0,
            Self::Quarter => 90,
            Self::Half => 180,
            Self::ThreeQuarter => 270,
        }
    }

    fn apply(self, image: &DynamicImage) -> Option<DynamicImage> {
        let rotated = match self {
            Self::Upright => return None,
            Self::Quarter => imageops::rotate90(image),
            Self::Half => imageops::rotate180(image),
            Self::ThreeQuarter => imageops::rotate270(image),
        };
        Some(DynamicImage::ImageRgba8(rotated))
    }
}

/// Output brightness in percent, 100 leaves pixels untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brightness(u8);

impl Brightness {
    pub const FULL: Self = Self(100);

    pub fn new(percent: i64) -> Self {
        Self(percent.clamp(0, 100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    fn scale(self, channel: u8) -> u8 {
        (channel as u16 * self.0 as u16 / 100) as u8
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::FULL
    }
}

/// How source images are fitted onto the screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanvasStyle {
    /// Shown behind transparent pixels
    pub background: Rgb,
    pub nearest: bool,
    pub rotation: Rotation,
    pub brightness: Brightness,
}

impl CanvasStyle {
    fn filter(&self) -> FilterType {
        if self.nearest {
            FilterType::Nearest
        } else {
            FilterType::Gaussian
        }
    }
}

/// Rotate, then resize to fill the screen, flattening transparency against the
/// background and dimming to the style's brightness
pub fn to_canvas(
    image: &DynamicImage,
    style: &CanvasStyle,
    resolution: Resolution,
) -> trcc_core::Result<PixelBuffer> {
    let (width, height) = resolution.dimensions();
    let [br, bg, bb] = style.background.0;
    let rotated = style.rotation.apply(image);
    let image = rotated.as_ref().unwrap_or(image);

    let data = image
        .resize_to_fill(width, height, style.filter())
        .to_rgba8()
        .pixels()
        .flat_map(|p| {
            let [r, g, b, a] = p.0;

            // Mix alpha values against the background
            let a = a as f64 / 255.0;
            let ba = 1. - a;
            [
                ((br as f64 * ba) + (r as f64 * a)) as u8,
                ((bg as f64 * ba) + (g as f64 * a)) as u8,
                ((bb as f64 * ba) + (b as f64 * a)) as u8,
            ]
            .map(|c| style.brightness.scale(c))
        })
        .collect();

    PixelBuffer::new(width, height, PixelFormat::Rgb888, data)
}

/// Decode every frame of a gif, apng or animated webp
pub fn decode_animation(path: &Path) -> Result<Vec<RgbaImage>, Box<dyn Error>> {
    let decoder = ImageReader::open(path)?.with_guessed_format()?;
    let format = decoder.format();
    // Reset reader and decode as an animation
    let mut reader = decoder.into_inner();
    reader.seek(SeekFrom::Start(0))?;

    let frames = match format {
        Some(ImageFormat::Gif) => GifDecoder::new(reader)?.into_frames(),
        Some(ImageFormat::Png) => {
            let decoder = PngDecoder::new(reader)?;
            // If the png contains an apng, decode as an animation
            if !decoder.is_apng()? {
                return Err("png is not animated".into());
            }
            decoder.apng()?.into_frames()
        },
        Some(ImageFormat::WebP) => {
            let decoder = WebPDecoder::new(reader)?;
            if !decoder.has_animation() {
                return Err("webp is not animated".into());
            }
            decoder.into_frames()
        },
        _ => return Err("unsupported animation format".into()),
    };

    Ok(frames
        .collect_frames()?
        .into_iter()
        .map(|frame| frame.into_buffer())
        .collect())
}

/// Prepare animation frames for the screen in parallel
pub fn animation_canvases(
    frames: Vec<RgbaImage>,
    style: &CanvasStyle,
    resolution: Resolution,
) -> trcc_core::Result<Vec<PixelBuffer>> {
    let len = frames.len();
    let completed = AtomicUsize::new(1);
    let canvases = frames
        .into_par_iter()
        .map(|frame| {
            let canvas = to_canvas(&DynamicImage::ImageRgba8(frame), style, resolution);
            let i = completed.fetch_add(1, Ordering::Relaxed);
            print!("\rresizing frames ({i}/{len}) ... ");
            let _ = stdout().flush();
            canvas
        })
        .collect::<trcc_core::Result<Vec<_>>>()?;
    println!("done");
    Ok(canvases)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn nearest() -> CanvasStyle {
        CanvasStyle {
            nearest: true,
            ..CanvasStyle::default()
        }
    }

    /// Left half red, right half blue
    fn split() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        }))
    }

    fn corner(canvas: &PixelBuffer, x: u32, y: u32) -> [u8; 3] {
        let mut pixels = canvas.rgb_pixels();
        pixels.nth((y * canvas.width() + x) as usize).unwrap()
    }

    #[test]
    fn rotation_wraps_and_snaps_to_quarter_turns() {
        assert_eq!(Rotation::from_degrees(0), Rotation::Upright);
        assert_eq!(Rotation::from_degrees(90), Rotation::Quarter);
        assert_eq!(Rotation::from_degrees(270), Rotation::ThreeQuarter);
        assert_eq!(Rotation::from_degrees(360), Rotation::Upright);
        assert_eq!(Rotation::from_degrees(450), Rotation::Quarter);
        assert_eq!(Rotation::from_degrees(200), Rotation::Half);
        assert_eq!(Rotation::from_degrees(630).degrees(), 270);
    }

    #[test]
    fn brightness_is_clamped_to_a_percentage() {
        assert_eq!(Brightness::new(150).percent(), 100);
        assert_eq!(Brightness::new(-20).percent(), 0);
        assert_eq!(Brightness::new(40).percent(), 40);
        assert_eq!(Brightness::default(), Brightness::FULL);
    }

    #[test]
    fn default_style_leaves_pixels_untouched() {
        let image = split();
        let canvas = to_canvas(&image, &nearest(), Resolution::R240x240).unwrap();
        assert_eq!(corner(&canvas, 0, 0), [255, 0, 0]);
        assert_eq!(corner(&canvas, 239, 0), [0, 0, 255]);
    }

    #[test]
    fn rotation_turns_the_image_clockwise() {
        let style = CanvasStyle {
            rotation: Rotation::Quarter,
            ..nearest()
        };
        let canvas = to_canvas(&split(), &style, Resolution::R240x240).unwrap();
        // the red left half is now on top
        assert_eq!(corner(&canvas, 0, 0), [255, 0, 0]);
        assert_eq!(corner(&canvas, 239, 0), [255, 0, 0]);
        assert_eq!(corner(&canvas, 0, 239), [0, 0, 255]);

        let style = CanvasStyle {
            rotation: Rotation::Half,
            ..nearest()
        };
        let canvas = to_canvas(&split(), &style, Resolution::R240x240).unwrap();
        assert_eq!(corner(&canvas, 0, 0), [0, 0, 255]);
        assert_eq!(corner(&canvas, 239, 0), [255, 0, 0]);
    }

    #[test]
    fn brightness_scales_every_channel() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([200, 100, 50, 255])));
        let style = CanvasStyle {
            brightness: Brightness::new(50),
            ..nearest()
        };
        let canvas = to_canvas(&image, &style, Resolution::R240x240).unwrap();
        assert!(canvas.rgb_pixels().all(|p| p == [100, 50, 25]));

        let style = CanvasStyle {
            brightness: Brightness::new(0),
            ..nearest()
        };
        let canvas = to_canvas(&image, &style, Resolution::R240x240).unwrap();
        assert!(canvas.rgb_pixels().all(|p| p == [0, 0, 0]));
    }

    #[test]
    fn canvas_fills_the_screen() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 10, Rgba([200, 10, 10, 255])));
        let canvas = to_canvas(&image, &nearest(), Resolution::R240x240).unwrap();
        assert_eq!((canvas.width(), canvas.height()), (240, 240));
        assert_eq!(canvas.format(), PixelFormat::Rgb888);
        assert!(canvas.rgb_pixels().all(|p| p == [200, 10, 10]));
    }

    #[test]
    fn transparency_shows_background() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 0])));
        let style = CanvasStyle {
            background: Rgb::new(0, 0, 255),
            ..nearest()
        };
        let canvas = to_canvas(&image, &style, Resolution::R320x320).unwrap();
        assert!(canvas.rgb_pixels().all(|p| p == [0, 0, 255]));
    }

    #[test]
    fn every_frame_is_prepared() {
        let frames = (0..5)
            .map(|i| RgbaImage::from_pixel(16, 16, Rgba([i * 40, 0, 0, 255])))
            .collect();
        let canvases =
            animation_canvases(frames, &nearest(), Resolution::R240x240).unwrap();
        assert_eq!(canvases.len(), 5);
        // order survives the parallel resize
        for (i, canvas) in canvases.iter().enumerate() {
            assert_eq!(canvas.rgb_pixels().next(), Some([i as u8 * 40, 0, 0]));
        }
    }
}
