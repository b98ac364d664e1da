//! V4L2 camera acquisition via the `v4l` crate.
//!
//! The camera is the only exclusive hardware resource in the system. A
//! [`Camera`] hands out at most one [`ActiveStream`] at a time; the stream
//! releases the device on drop, so every exit path (success, error, cancel)
//! gives the hardware back.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use invigil_core::Still;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::still;

/// Dequeue attempts per snapshot before giving up on a lit scene.
const SNAPSHOT_MAX_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera not found: {0} — check the device path and permissions")]
    DeviceNotFound(String),
    #[error("camera is busy — another capture is already active")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported by this device")]
    StreamingNotSupported,
    #[error("scene too dark — uncover the camera or improve lighting")]
    SceneTooDark,
    #[error("still encoding failed: {0}")]
    Still(#[from] still::StillError),
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// Anything that can produce an encoded still on demand.
///
/// Seam between the engine and the hardware; tests substitute a scripted
/// source so no flow ever needs a physical device.
pub trait StillSource: Send {
    fn snapshot(&mut self) -> Result<Still, CameraError>;
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    in_use: AtomicBool,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Request the still target resolution; accept whatever grayscale-
        // convertible format the driver negotiates.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = still::STILL_WIDTH;
        fmt.height = still::STILL_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            in_use: AtomicBool::new(false),
        })
    }

    /// Acquire the single allowed capture stream.
    ///
    /// Fails with [`CameraError::DeviceBusy`] while a previous stream is
    /// still alive.
    pub fn acquire(&self) -> Result<ActiveStream<'_>, CameraError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(CameraError::DeviceBusy);
        }

        match MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4) {
            Ok(stream) => Ok(ActiveStream {
                stream,
                camera: self,
            }),
            Err(e) => {
                self.in_use.store(false, Ordering::Release);
                Err(CameraError::CaptureFailed(format!(
                    "failed to create mmap stream: {e}"
                )))
            }
        }
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => {
                let expected_bytes = pixels * 2;
                if buf.len() < expected_bytes {
                    return Err(CameraError::CaptureFailed(format!(
                        "Y16 buffer too short: expected {expected_bytes}, got {}",
                        buf.len()
                    )));
                }
                // 16-bit little-endian per pixel, downscale to 8-bit.
                let mut gray = Vec::with_capacity(pixels);
                for idx in 0..pixels {
                    let low = buf[idx * 2] as u16;
                    let high = buf[idx * 2 + 1] as u16;
                    gray.push(((high << 8 | low) >> 8) as u8);
                }
                Ok(gray)
            }
            PixelFormat::Yuyv => still::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(CameraError::Still),
        }
    }
}

/// The single live capture stream for a camera.
///
/// Dropping it releases the device (and the camera light goes off).
pub struct ActiveStream<'a> {
    stream: MmapStream<'a>,
    camera: &'a Camera,
}

impl ActiveStream<'_> {
    /// Capture one frame and encode it as a JPEG still at the fixed target
    /// resolution.
    ///
    /// Dark frames are skipped for a few attempts; a persistently dark scene
    /// surfaces as [`CameraError::SceneTooDark`].
    pub fn snapshot(&mut self) -> Result<Still, CameraError> {
        for attempt in 0..SNAPSHOT_MAX_ATTEMPTS {
            let (buf, meta) = self.stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;

            let gray = self.camera.buf_to_grayscale(buf)?;
            if still::is_dark_frame(&gray, 0.95) {
                tracing::debug!(seq = meta.sequence, attempt, "skipping dark frame");
                continue;
            }

            return still::encode_still(&gray, self.camera.width, self.camera.height)
                .map_err(CameraError::Still);
        }
        Err(CameraError::SceneTooDark)
    }
}

impl Drop for ActiveStream<'_> {
    fn drop(&mut self) {
        self.camera.in_use.store(false, Ordering::Release);
        tracing::debug!(device = %self.camera.device_path, "camera stream released");
    }
}

impl StillSource for Camera {
    fn snapshot(&mut self) -> Result<Still, CameraError> {
        // One acquire per snapshot: the stream (and the hardware light) is
        // released as soon as the still is encoded.
        let mut stream = self.acquire()?;
        stream.snapshot()
    }
}
