// src/capture/still.rs
use anyhow::{Result, anyhow, Context};
use chrono::{DateTime, Local};
use image::{DynamicImage, ImageFormat, ImageOutputFormat, RgbImage};
use log::info;
use std::io::Cursor;
use std::path::Path;

const CAMERA_JPEG_QUALITY: u8 = 90;

/// One still frame: the encoded bytes exactly as captured plus the decoded
/// pixel buffer used for the preview.
pub struct CapturedImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    decoded: DynamicImage,
    captured_at: DateTime<Local>,
}

impl CapturedImage {
    /// Wrap already-encoded image bytes (JPEG, PNG, ...). The bytes are kept as-is.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("Captured image is empty"));
        }
        let format = image::guess_format(&bytes).context("Unrecognized image format")?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .context("Failed to decode captured image")?;

        info!("Image decoded: {}x{} ({:?}, {} bytes)", decoded.width(), decoded.height(), format, bytes.len());

        Ok(Self {
            bytes,
            format,
            decoded,
            captured_at: Local::now(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading image from {}", path.display());
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image file {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    /// Build from a raw RGB24 camera frame. The frame is compressed to JPEG so
    /// that what gets sent upstream is an ordinary still-image encoding.
    pub fn from_rgb_frame(width: u32, height: u32, raw: Vec<u8>) -> Result<Self> {
        let rgb = RgbImage::from_raw(width, height, raw)
            .ok_or_else(|| anyhow!("Camera frame does not match {}x{} RGB", width, height))?;
        let decoded = DynamicImage::ImageRgb8(rgb);

        let mut bytes = Vec::new();
        decoded.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Jpeg(CAMERA_JPEG_QUALITY))?;

        Ok(Self {
            bytes,
            format: ImageFormat::Jpeg,
            decoded,
            captured_at: Local::now(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn decoded(&self) -> &DynamicImage {
        &self.decoded
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.decoded.width(), self.decoded.height())
    }

    /// Downscaled copy for on-screen display, aspect ratio preserved.
    pub fn preview(&self, max_side: u32) -> DynamicImage {
        let (w, h) = self.dimensions();
        if w <= max_side && h <= max_side {
            self.decoded.clone()
        } else {
            self.decoded.thumbnail(max_side, max_side)
        }
    }
}
