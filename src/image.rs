//! Borrowed image and trimap views.
//!
//! The segmenter never owns pixel storage: callers pass an `ImageRgbx8`
//! over their RGBX buffer and a `MaskU8` over their trimap, both with an
//! explicit stride so padded rows and sub-views work unchanged.

use crate::error::SegmentError;
use nalgebra::Vector3;
use serde::Serialize;

/// Bytes per pixel of the RGBX layout. The fourth channel is ignored.
pub const CHANNELS: usize = 4;

/// Read-only RGBX view: 8-bit interleaved, `stride` in bytes.
#[derive(Clone, Copy, Debug)]
pub struct ImageRgbx8<'a> {
    pub w: usize,
    pub h: usize,
    pub stride: usize,
    pub data: &'a [u8],
}

impl<'a> ImageRgbx8<'a> {
    /// Read one pixel as a color vector in R^3.
    #[inline]
    pub fn color(&self, x: usize, y: usize) -> Vector3<f64> {
        let i = y * self.stride + x * CHANNELS;
        Vector3::new(
            self.data[i] as f64,
            self.data[i + 1] as f64,
            self.data[i + 2] as f64,
        )
    }

    pub(crate) fn validate(&self) -> Result<(), SegmentError> {
        if self.w == 0 || self.h == 0 {
            return Err(SegmentError::BadImage {
                reason: "zero width or height",
            });
        }
        if self.stride < self.w * CHANNELS {
            return Err(SegmentError::BadImage {
                reason: "stride shorter than a pixel row",
            });
        }
        let needed = (self.h - 1) * self.stride + self.w * CHANNELS;
        if self.data.len() < needed {
            return Err(SegmentError::BadImage {
                reason: "buffer shorter than h rows",
            });
        }
        Ok(())
    }
}

/// Mutable 8-bit trimap view over caller storage, `stride` in bytes.
#[derive(Debug)]
pub struct MaskU8<'a> {
    pub w: usize,
    pub h: usize,
    pub stride: usize,
    pub data: &'a mut [u8],
}

impl<'a> MaskU8<'a> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.stride + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: MaskValue) {
        self.data[y * self.stride + x] = value as u8;
    }

    /// Immutable reborrow of the backing bytes for parallel readers.
    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &*self.data
    }

    pub(crate) fn validate_shape(&self, w: usize, h: usize) -> Result<(), SegmentError> {
        if self.w != w || self.h != h {
            return Err(SegmentError::MaskShapeMismatch {
                reason: "mask dimensions differ from image dimensions",
            });
        }
        if self.stride < self.w {
            return Err(SegmentError::MaskShapeMismatch {
                reason: "stride shorter than a mask row",
            });
        }
        let needed = if self.h == 0 {
            0
        } else {
            (self.h - 1) * self.stride + self.w
        };
        if self.data.len() < needed {
            return Err(SegmentError::MaskShapeMismatch {
                reason: "buffer shorter than h rows",
            });
        }
        Ok(())
    }
}

/// Trimap label stored per mask byte.
///
/// Definite labels come from the caller and are never modified by the
/// segmenter; probable labels are rewritten from the cut each iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum MaskValue {
    Background = 0,
    Foreground = 1,
    ProbableBackground = 2,
    ProbableForeground = 3,
}

impl MaskValue {
    pub fn from_u8(value: u8) -> Option<MaskValue> {
        match value {
            0 => Some(MaskValue::Background),
            1 => Some(MaskValue::Foreground),
            2 => Some(MaskValue::ProbableBackground),
            3 => Some(MaskValue::ProbableForeground),
            _ => None,
        }
    }

    /// Definite or probable foreground.
    #[inline]
    pub fn is_foreground(self) -> bool {
        matches!(self, MaskValue::Foreground | MaskValue::ProbableForeground)
    }

    /// Probable label of either class.
    #[inline]
    pub fn is_probable(self) -> bool {
        matches!(
            self,
            MaskValue::ProbableBackground | MaskValue::ProbableForeground
        )
    }

    pub fn class(self) -> PixelClass {
        if self.is_foreground() {
            PixelClass::Foreground
        } else {
            PixelClass::Background
        }
    }
}

/// Byte-level foreground test for validated mask rows; foreground
/// discriminants are the odd trimap values.
#[inline]
pub(crate) fn byte_is_foreground(value: u8) -> bool {
    value & 1 == 1
}

/// Byte-level probable test for validated mask rows.
#[inline]
pub(crate) fn byte_is_probable(value: u8) -> bool {
    value & 2 == 2
}

/// Which of the two color models a pixel belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PixelClass {
    Background,
    Foreground,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimap_classes_follow_discriminants() {
        for v in 0u8..=3 {
            let m = MaskValue::from_u8(v).unwrap();
            assert_eq!(m as u8, v);
            assert_eq!(m.is_foreground(), byte_is_foreground(v));
            assert_eq!(m.is_probable(), byte_is_probable(v));
        }
        assert!(MaskValue::from_u8(4).is_none());
    }

    #[test]
    fn image_validation_catches_short_buffers() {
        let data = vec![0u8; 4 * 4 * 4 - 1];
        let image = ImageRgbx8 {
            w: 4,
            h: 4,
            stride: 16,
            data: &data,
        };
        assert!(matches!(
            image.validate(),
            Err(SegmentError::BadImage { .. })
        ));
    }

    #[test]
    fn strided_color_access() {
        // 2x1 image with 4 bytes of row padding
        let data = [10u8, 20, 30, 0, 40, 50, 60, 0, 0, 0, 0, 0];
        let image = ImageRgbx8 {
            w: 2,
            h: 1,
            stride: 12,
            data: &data,
        };
        assert!(image.validate().is_ok());
        assert_eq!(image.color(1, 0), Vector3::new(40.0, 50.0, 60.0));
    }
}
