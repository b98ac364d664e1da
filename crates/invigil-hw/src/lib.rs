//! invigil-hw — Hardware abstraction for camera acquisition and still capture.
//!
//! Provides V4L2-based camera access with exactly one active stream per
//! device handle, and snapshotting a single frame to an encoded JPEG still
//! at a fixed target resolution.

pub mod camera;
pub mod still;

pub use camera::{ActiveStream, Camera, CameraError, PixelFormat, StillSource};
