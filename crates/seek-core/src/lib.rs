//! seek-core — Thermal frame processing for Seek Thermal sensors.
//!
//! Owns the raw sensor buffer layout and everything that turns a raw,
//! metadata-interleaved frame into a corrected 14-bit measurement frame:
//! flat-field subtraction, dead-pixel detection and repair, and the optional
//! secondary flat-field. Nothing in here talks to USB.

pub mod calibration;
pub mod dead_pixel;
pub mod flat_field;
pub mod frame;

pub use calibration::{Calibration, CalibrationError, LEVEL_OFFSET};
pub use dead_pixel::{DeadPixelError, DeadPixelMap, DeadPixelPolicy, Pixel, DEAD_PIXEL_MARKER};
pub use flat_field::{FlatFieldAccumulator, FlatFieldError};
pub use frame::{Frame, FrameError, FrameGeometry, RawFrame, Roi};
