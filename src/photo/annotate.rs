//! Weather text overlay.
//!
//! Three lines are stamped on the photo with an embedded 8x8 bitmap font:
//! city, detailed description and temperature. The text color is the
//! inverse of the photo's dominant color.

use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImage, GenericImageView, ImageError};
use thiserror::Error;
use tracing::debug;

use crate::color::{dominant_color, Color};
use crate::weather::WeatherSnapshot;

/// Glyph cell size of the embedded font
const GLYPH_SIZE: i64 = 8;

/// Quality used for the stored JPEG
pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not decode captured image: {0}")]
    Decode(#[source] ImageError),

    #[error("captured image is empty")]
    Empty,

    #[error("could not encode annotated image: {0}")]
    Encode(#[source] ImageError),
}

/// Where the three overlay lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLayout {
    /// Left edge of every line
    pub x: i64,
    /// Baseline of each line, top to bottom
    pub baselines: [i64; 3],
    /// Pixels per font pixel
    pub scale: u32,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self { x: 50, baselines: [50, 150, 250], scale: 5 }
    }
}

/// Result of annotating one photo.
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    pub image: DynamicImage,
    pub dominant: Color,
    pub overlay: Color,
}

impl AnnotatedImage {
    /// Encode as baseline JPEG, ready for the gallery.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>, RenderError> {
        let rgb = self.image.to_rgb8();
        let mut buf = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
            .map_err(RenderError::Encode)?;
        Ok(buf)
    }
}

/// The three lines stamped on a photo: city, description, temperature.
pub fn overlay_lines(weather: &WeatherSnapshot) -> [String; 3] {
    [
        weather.city().to_string(),
        weather.description().to_string(),
        format!("{} °C", weather.temperature_label()),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct PhotoAnnotator {
    layout: TextLayout,
}

impl PhotoAnnotator {
    pub fn new(layout: TextLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> TextLayout {
        self.layout
    }

    /// Decode `bytes` and annotate the result.
    pub fn annotate(
        &self,
        bytes: &[u8],
        weather: &WeatherSnapshot,
    ) -> Result<AnnotatedImage, RenderError> {
        let image = image::load_from_memory(bytes).map_err(RenderError::Decode)?;
        self.annotate_image(&image, weather)
    }

    /// Annotate an already decoded image. `image` is left untouched; the
    /// result keeps its dimensions and pixel format.
    pub fn annotate_image(
        &self,
        image: &DynamicImage,
        weather: &WeatherSnapshot,
    ) -> Result<AnnotatedImage, RenderError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::Empty);
        }

        let dominant = dominant_color(image);
        let overlay = dominant.invert().opaque();

        let mut canvas = image.clone();
        for (line, baseline) in overlay_lines(weather).iter().zip(self.layout.baselines) {
            draw_text(&mut canvas, line, self.layout.x, baseline, self.layout.scale, overlay);
        }

        debug!(width, height, %dominant, %overlay, city = weather.city(), "Photo annotated");
        Ok(AnnotatedImage { image: canvas, dominant, overlay })
    }
}

fn glyph(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

/// Draw `text` with its baseline at `baseline`. Pixels off the canvas are
/// dropped.
fn draw_text(canvas: &mut DynamicImage, text: &str, x: i64, baseline: i64, scale: u32, color: Color) {
    let (width, height) = canvas.dimensions();
    let (width, height) = (i64::from(width), i64::from(height));
    let scale = i64::from(scale.max(1));
    let advance = GLYPH_SIZE * scale;
    let top = baseline - advance;
    let rgba = color.to_rgba();

    for (index, c) in text.chars().enumerate() {
        let left = x + index as i64 * advance;
        if left >= width {
            break;
        }

        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let px = left + col * scale;
                let py = top + row as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px + dx, py + dy);
                        if (0..width).contains(&tx) && (0..height).contains(&ty) {
                            canvas.put_pixel(tx as u32, ty as u32, rgba);
                        }
                    }
                }
            }
        }
    }
}
