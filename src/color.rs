//! Dominant color extraction and overlay color inversion.
//!
//! The overlay text drawn on a photo uses the inverse of the photo's dominant
//! color so it stays readable against the background:
//! - `dominant_color` buckets pixels by quantized RGB and returns the average
//!   color of the most populated bucket
//! - `Color::invert` flips R, G and B and passes alpha through

use std::collections::BTreeMap;
use std::fmt;

use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};

/// Images larger than this many pixels are downscaled before bucketing.
const SAMPLE_AREA: u32 = 112 * 112;

/// Bits dropped from each channel when bucketing (8-bit -> 5-bit).
const QUANT_SHIFT: u8 = 3;

/// Buckets darker or lighter than this (HSL lightness) never win.
const MIN_LIGHTNESS: f32 = 0.05;
const MAX_LIGHTNESS: f32 = 0.95;

/// An ARGB color with 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Fallback when no dominant color can be extracted (`#00FFFF`).
    pub const CYAN: Color = Color::argb(255, 0, 255, 255);

    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::argb(255, r, g, b)
    }

    /// Channel-wise inversion: `255 - c` on R, G and B, alpha unchanged.
    pub fn invert(self) -> Self {
        Self {
            a: self.a,
            r: u8::MAX.saturating_sub(self.r),
            g: u8::MAX.saturating_sub(self.g),
            b: u8::MAX.saturating_sub(self.b),
        }
    }

    /// Same color with alpha forced to 255.
    pub fn opaque(self) -> Self {
        Self { a: 255, ..self }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }

    /// HSL lightness in [0, 1].
    pub fn lightness(self) -> f32 {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        (f32::from(max) + f32::from(min)) / (2.0 * 255.0)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.a, self.r, self.g, self.b)
    }
}

/// Running totals for one quantized color bucket
#[derive(Debug, Default)]
struct Bucket {
    population: u64,
    r: u64,
    g: u64,
    b: u64,
}

impl Bucket {
    fn add(&mut self, r: u8, g: u8, b: u8) {
        self.population += 1;
        self.r += u64::from(r);
        self.g += u64::from(g);
        self.b += u64::from(b);
    }

    fn average(&self) -> Color {
        let channel = |sum: u64| {
            let avg = (sum + self.population / 2) / self.population.max(1);
            u8::try_from(avg).unwrap_or(u8::MAX)
        };
        Color::rgb(channel(self.r), channel(self.g), channel(self.b))
    }
}

/// Find the most visually prevalent color in an image.
///
/// Returns [`Color::CYAN`] when the image is empty, fully transparent, or
/// only contains near-black / near-white content. The result depends only on
/// the pixel data.
pub fn dominant_color(image: &DynamicImage) -> Color {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Color::CYAN;
    }

    let sample = downscale(image);

    // BTreeMap keeps iteration order stable, so ties go to the lowest key
    let mut buckets: BTreeMap<u16, Bucket> = BTreeMap::new();
    for pixel in sample.pixels() {
        let [r, g, b, a] = pixel.0;
        if a == 0 {
            continue;
        }
        buckets.entry(bucket_key(r, g, b)).or_default().add(r, g, b);
    }

    let mut best: Option<(&Bucket, Color)> = None;
    for bucket in buckets.values() {
        let color = bucket.average();
        let lightness = color.lightness();
        if lightness <= MIN_LIGHTNESS || lightness >= MAX_LIGHTNESS {
            continue;
        }
        if best.map_or(true, |(b, _)| bucket.population > b.population) {
            best = Some((bucket, color));
        }
    }

    best.map_or(Color::CYAN, |(_, color)| color)
}

fn bucket_key(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r >> QUANT_SHIFT) << 10) | (u16::from(g >> QUANT_SHIFT) << 5) | u16::from(b >> QUANT_SHIFT)
}

/// Shrink large images so bucketing cost stays bounded
fn downscale(image: &DynamicImage) -> RgbaImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let area = u64::from(width) * u64::from(height);
    if area <= u64::from(SAMPLE_AREA) {
        return rgba;
    }

    let scale = (f64::from(SAMPLE_AREA) / area as f64).sqrt();
    let new_width = ((f64::from(width) * scale).round() as u32).max(1);
    let new_height = ((f64::from(height) * scale).round() as u32).max(1);
    imageops::thumbnail(&rgba, new_width, new_height)
}
