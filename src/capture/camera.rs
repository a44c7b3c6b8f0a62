// src/capture/camera.rs
use anyhow::Result;
use log::{info, warn};

use super::still::CapturedImage;

/// Frames thrown away after opening the stream so exposure can settle.
#[cfg(feature = "webcam")]
const WARMUP_FRAMES: usize = 5;

pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

pub struct CameraManager {
    index: u32,
}

impl CameraManager {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Open the device, grab one still frame, close the device.
    #[cfg(feature = "webcam")]
    pub fn capture_still(&self) -> Result<CapturedImage> {
        use anyhow::Context;
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
        use nokhwa::Camera;

        info!("Opening camera {}", self.index);
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = Camera::new(CameraIndex::Index(self.index), format)
            .with_context(|| format!("Failed to open camera {}", self.index))?;
        camera.open_stream().context("Failed to start camera stream")?;

        for _ in 0..WARMUP_FRAMES {
            camera.frame().context("Failed to read warm-up frame")?;
        }
        let frame = camera.frame().context("Failed to read camera frame");
        if let Err(e) = camera.stop_stream() {
            warn!("Failed to stop camera stream: {}", e);
        }

        let rgb = frame?.decode_image::<RgbFormat>().context("Failed to decode camera frame")?;
        let (width, height) = (rgb.width(), rgb.height());
        info!("Camera frame captured: {}x{}", width, height);

        CapturedImage::from_rgb_frame(width, height, rgb.into_raw())
    }

    #[cfg(not(feature = "webcam"))]
    pub fn capture_still(&self) -> Result<CapturedImage> {
        info!("Camera {} requested but webcam support is not compiled in", self.index);
        Err(anyhow::anyhow!("Webcam feature not enabled in this build. Use an image file instead."))
    }
}

#[cfg(feature = "webcam")]
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    use nokhwa::utils::{ApiBackend, CameraIndex};

    let devices = nokhwa::query(ApiBackend::Auto)?;
    info!("Found {} camera(s)", devices.len());

    Ok(devices
        .into_iter()
        .enumerate()
        .map(|(pos, device)| {
            let index = match device.index() {
                CameraIndex::Index(i) => *i,
                CameraIndex::String(_) => pos as u32,
            };
            CameraInfo {
                index,
                name: device.human_name(),
            }
        })
        .collect())
}

#[cfg(not(feature = "webcam"))]
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    Err(anyhow::anyhow!("Webcam feature not enabled in this build"))
}
