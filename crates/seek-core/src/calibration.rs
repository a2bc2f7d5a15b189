//! Per-session calibration state and frame correction.
//!
//! Correction runs in three steps on the visible region of a raw frame:
//! flat-field offset correction, dead-pixel repair, and the optional
//! secondary flat-field.

use crate::dead_pixel::DeadPixelMap;
use crate::frame::{Frame, RawFrame};
use thiserror::Error;

/// Nominal signal floor restored after subtracting a reference frame.
pub const LEVEL_OFFSET: u16 = 0x4000;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration shape mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ShapeMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
}

/// `(value + LEVEL_OFFSET - reference) mod 2^16`, without intermediate overflow.
pub fn offset_correct(value: u16, reference: u16) -> u16 {
    let wide = i32::from(value) + i32::from(LEVEL_OFFSET) - i32::from(reference);
    wide.rem_euclid(0x1_0000) as u16
}

/// Flat-field reference, dead-pixel map and secondary flat-field for one
/// camera session.
#[derive(Debug, Clone)]
pub struct Calibration {
    width: usize,
    height: usize,
    /// Last CALIBRATION frame; `None` until the sensor has sent one.
    flat_field: Option<Vec<u16>>,
    dead_pixels: DeadPixelMap,
    additional: Option<Frame>,
}

impl Calibration {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            flat_field: None,
            dead_pixels: DeadPixelMap::all_valid(width, height),
            additional: None,
        }
    }

    pub fn visible_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Replace the flat-field reference with the visible region of `raw`.
    pub fn update_flat_field(&mut self, raw: &RawFrame) {
        let flat = self.flat_field.get_or_insert_with(Vec::new);
        flat.clear();
        for row in raw.visible_rows() {
            flat.extend_from_slice(row);
        }
    }

    pub fn flat_field(&self) -> Option<&[u16]> {
        self.flat_field.as_deref()
    }

    pub fn set_dead_pixels(&mut self, map: DeadPixelMap) -> Result<(), CalibrationError> {
        self.check_shape(map.width(), map.height())?;
        self.dead_pixels = map;
        Ok(())
    }

    pub fn dead_pixels(&self) -> &DeadPixelMap {
        &self.dead_pixels
    }

    pub fn set_additional_flat_field(&mut self, frame: Frame) -> Result<(), CalibrationError> {
        self.check_shape(frame.width, frame.height)?;
        self.additional = Some(frame);
        Ok(())
    }

    pub fn additional_flat_field(&self) -> Option<&Frame> {
        self.additional.as_ref()
    }

    /// Forget everything learned from the sensor. The secondary flat-field
    /// is kept since it comes from the user, not the device.
    pub fn reset(&mut self) {
        self.flat_field = None;
        self.dead_pixels = DeadPixelMap::all_valid(self.width, self.height);
    }

    /// Produce the corrected frame for the visible region of `raw`.
    ///
    /// `raw` is not modified, so applying twice yields the same output.
    pub fn apply(&self, raw: &RawFrame, out: &mut Frame) {
        debug_assert_eq!(raw.geometry().visible_size(), (self.width, self.height));

        let mut corrected = raw.visible_to_vec();
        if let Some(flat) = &self.flat_field {
            for (v, &f) in corrected.iter_mut().zip(flat) {
                *v = offset_correct(*v, f);
            }
        }

        out.width = self.width;
        out.height = self.height;
        out.data.clear();
        out.data.resize(self.width * self.height, 0);
        self.dead_pixels.repair(&corrected, &mut out.data);

        if let Some(additional) = &self.additional {
            for (v, &a) in out.data.iter_mut().zip(&additional.data) {
                *v = offset_correct(*v, a);
            }
        }
    }

    fn check_shape(&self, width: usize, height: usize) -> Result<(), CalibrationError> {
        if (width, height) != (self.width, self.height) {
            return Err(CalibrationError::ShapeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width,
                height,
            });
        }
        Ok(())
    }
}
