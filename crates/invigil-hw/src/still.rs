//! Grayscale conversion, dark-frame detection, and JPEG still encoding.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, GrayImage};
use invigil_core::Still;

/// Fixed target resolution for every encoded still.
pub const STILL_WIDTH: u32 = 640;
pub const STILL_HEIGHT: u32 = 360;

/// JPEG quality for encoded stills.
const JPEG_QUALITY: u8 = 85;

#[derive(Debug, thiserror::Error)]
pub enum StillError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame dimensions do not form an image: {width}x{height}")]
    BadDimensions { width: u32, height: u32 },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, StillError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(StillError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Check if a frame is dark: true when more than `threshold_pct` of pixels
/// fall below brightness 32. A dark snapshot means a covered or unlit
/// camera and must never be offered to the checkpoint service.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Scale a grayscale frame to the fixed still resolution and JPEG-encode it.
pub fn encode_still(gray: &[u8], width: u32, height: u32) -> Result<Still, StillError> {
    let image = GrayImage::from_raw(width, height, gray.to_vec())
        .ok_or(StillError::BadDimensions { width, height })?;

    let image = if width == STILL_WIDTH && height == STILL_HEIGHT {
        image
    } else {
        imageops::resize(&image, STILL_WIDTH, STILL_HEIGHT, FilterType::Triangle)
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
        image.as_raw(),
        STILL_WIDTH,
        STILL_HEIGHT,
        ExtendedColorType::L8,
    )?;

    Ok(Still {
        jpeg,
        width: STILL_WIDTH,
        height: STILL_HEIGHT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright — not dark.
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_encode_still_fixed_resolution() {
        // Source at a different resolution gets scaled to the target.
        let gray = vec![128u8; (320 * 180) as usize];
        let still = encode_still(&gray, 320, 180).unwrap();
        assert_eq!(still.width, STILL_WIDTH);
        assert_eq!(still.height, STILL_HEIGHT);
        assert!(!still.jpeg.is_empty());
        // JPEG SOI marker.
        assert_eq!(&still.jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_encode_still_bad_dimensions() {
        let gray = vec![128u8; 10];
        assert!(matches!(
            encode_still(&gray, 640, 360),
            Err(StillError::BadDimensions { .. })
        ));
    }
}
