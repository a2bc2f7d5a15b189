//! seek-hw — USB driver for Seek Thermal cameras.
//!
//! Talks the vendor control protocol over libusb, runs the per-model init
//! script, and drives the frame state machine that feeds raw frames into
//! the calibration engine from `seek-core`. A replay transport serves
//! recorded frames for offline use.

pub mod camera;
pub mod command;
pub mod config;
pub mod model;
pub mod replay;
pub mod sequencer;
pub mod stream;
pub mod transport;
pub mod usb;

#[cfg(test)]
mod mock;

pub use camera::{ConfigurationError, OpenError, SeekCam};
pub use command::DeviceCommand;
pub use config::{CameraConfig, ConfigError};
pub use model::{model_by_name, supported_models, CameraModel, SeekThermal, SeekThermalPro, UsbId};
pub use replay::ReplayTransport;
pub use sequencer::InitError;
pub use stream::{GrabError, StreamState};
pub use transport::{Transport, TransportError};
pub use usb::UsbTransport;
