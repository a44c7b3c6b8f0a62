// src/capture/mod.rs
pub mod camera;
pub mod still;

pub use camera::{list_cameras, CameraManager};
pub use still::CapturedImage;
