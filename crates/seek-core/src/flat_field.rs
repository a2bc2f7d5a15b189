//! Secondary flat-field images: loading and building them by averaging.
//!
//! A secondary flat-field is a 16-bit grayscale image at visible resolution
//! that removes residual gradients (e.g. lens vignetting) the sensor's own
//! calibration frames do not cover.

use crate::frame::{Frame, FrameError};
use image::{ColorType, DynamicImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlatFieldError {
    #[error("failed to read flat-field image {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("flat-field image {path} has the wrong type: expected 16-bit single channel, got {found:?}")]
    WrongType { path: PathBuf, found: ColorType },
    #[error("expected flat-field image {path} to have size [{expected_width},{expected_height}], got [{width},{height}]")]
    WrongSize {
        path: PathBuf,
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
}

/// Load a secondary flat-field image that must match the visible region
/// exactly in size and sample type.
pub fn load_flat_field(path: &Path, width: usize, height: usize) -> Result<Frame, FlatFieldError> {
    let image = image::open(path).map_err(|source| FlatFieldError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let buffer = match image {
        DynamicImage::ImageLuma16(buffer) => buffer,
        other => {
            return Err(FlatFieldError::WrongType {
                path: path.to_path_buf(),
                found: other.color(),
            })
        }
    };

    let frame = Frame::from_image(buffer);
    if (frame.width, frame.height) != (width, height) {
        return Err(FlatFieldError::WrongSize {
            path: path.to_path_buf(),
            expected_width: width,
            expected_height: height,
            width: frame.width,
            height: frame.height,
        });
    }

    tracing::info!(path = %path.display(), width, height, "loaded flat-field image");
    Ok(frame)
}

/// Running per-pixel average of corrected frames.
#[derive(Debug, Clone)]
pub struct FlatFieldAccumulator {
    width: usize,
    height: usize,
    sum: Vec<f64>,
    count: usize,
}

impl FlatFieldAccumulator {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            sum: vec![0.0; width * height],
            count: 0,
        }
    }

    pub fn add(&mut self, frame: &Frame) -> Result<(), FrameError> {
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(FrameError::SizeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: frame.width,
                height: frame.height,
            });
        }
        for (acc, &v) in self.sum.iter_mut().zip(&frame.data) {
            *acc += f64::from(v);
        }
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Rounded mean of everything added so far, `None` if nothing was added.
    pub fn mean(&self) -> Option<Frame> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let data = self
            .sum
            .iter()
            .map(|&s| (s / n).round().clamp(0.0, f64::from(u16::MAX)) as u16)
            .collect();
        Some(Frame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}
