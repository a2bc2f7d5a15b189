//! The public camera handle.

use crate::config::CameraConfig;
use crate::model::CameraModel;
use crate::replay::ReplayTransport;
use crate::sequencer::{self, InitError};
use crate::stream::{self, Acquisition, GrabError, Session, StreamState};
use crate::transport::{Transport, TransportError};
use crate::usb::UsbTransport;
use seek_core::flat_field::load_flat_field;
use seek_core::{Calibration, CalibrationError, DeadPixelError, FlatFieldError, Frame};
use std::path::PathBuf;
use thiserror::Error;

/// Problems with user-supplied inputs. Retrying cannot fix these.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error(transparent)]
    FlatField(#[from] FlatFieldError),
    #[error(transparent)]
    DeadPixels(#[from] DeadPixelError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("init: {0}")]
    Init(#[from] InitError),
    #[error("first grab: {0}")]
    Grab(#[from] GrabError),
    #[error("giving up after {attempts} open attempts: {last}")]
    AttemptsExhausted {
        attempts: usize,
        #[source]
        last: Box<OpenError>,
    },
}

/// A Seek Thermal camera on some transport.
///
/// Dropping the handle stops the stream and releases the device.
pub struct SeekCam<T: Transport> {
    model: Box<dyn CameraModel>,
    transport: T,
    config: CameraConfig,
    session: Session,
    opened: bool,
}

impl SeekCam<UsbTransport> {
    /// A camera on the first USB device matching the model's id.
    pub fn usb(model: Box<dyn CameraModel>, config: CameraConfig) -> Self {
        let transport = UsbTransport::new(model.usb_id(), config.timeout());
        Self::new(model, transport, config)
    }
}

impl SeekCam<ReplayTransport> {
    /// A camera replaying `frame_N.png` recordings from `dir`.
    pub fn replay(model: Box<dyn CameraModel>, dir: impl Into<PathBuf>, config: CameraConfig) -> Self {
        Self::new(model, ReplayTransport::new(dir), config)
    }
}

impl<T: Transport> SeekCam<T> {
    pub fn new(model: Box<dyn CameraModel>, transport: T, config: CameraConfig) -> Self {
        let session = Session::new(model.geometry());
        Self {
            model,
            transport,
            config,
            session,
            opened: false,
        }
    }

    /// Claim the device, bring it into streaming and wait for the first
    /// image. Transient failures are retried up to `open_attempts` times.
    pub fn open(&mut self) -> Result<(), OpenError> {
        if self.opened {
            return Err(TransportError::AlreadyOpen.into());
        }

        // Checked before touching the device.
        self.load_additional_flat_field()?;

        self.transport.open()?;
        match self.run_open_attempts() {
            Ok(()) => {
                self.opened = true;
                let (width, height) = self.visible_size();
                tracing::info!(
                    model = self.model.name(),
                    width,
                    height,
                    dead_pixels = self.session.calibration.dead_pixels().len(),
                    "camera open"
                );
                Ok(())
            }
            Err(e) => {
                sequencer::stop_streaming(&mut self.transport);
                self.transport.close();
                Err(e)
            }
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Stop streaming and release the device. Idempotent.
    pub fn close(&mut self) {
        if self.transport.is_open() {
            sequencer::stop_streaming(&mut self.transport);
            self.transport.close();
            tracing::info!(model = self.model.name(), "camera closed");
        }
        self.opened = false;
    }

    /// Fetch frames until the next image is in the raw buffer.
    pub fn grab(&mut self) -> Result<(), GrabError> {
        if !self.opened {
            return Err(GrabError::NotOpen);
        }
        let acquisition = self.acquisition();
        stream::grab(&mut self.transport, self.model.as_ref(), &mut self.session, acquisition)
    }

    /// Write the corrected visible image of the last grabbed frame into
    /// `out`, resizing it as needed. Does not touch the device.
    pub fn retrieve(&self, out: &mut Frame) {
        self.session.calibration.apply(&self.session.raw, out);
    }

    pub fn retrieve_frame(&self) -> Frame {
        let mut frame = Frame::default();
        self.retrieve(&mut frame);
        frame
    }

    /// `grab` followed by `retrieve`.
    pub fn read(&mut self, out: &mut Frame) -> Result<(), GrabError> {
        self.grab()?;
        self.retrieve(out);
        Ok(())
    }

    /// Raw on-die temperature reading of the last frame.
    pub fn device_temp_sensor(&self) -> u16 {
        self.model.device_temp_sensor(&self.session.raw)
    }

    pub fn frame_counter(&self) -> u16 {
        self.model.frame_counter(&self.session.raw)
    }

    pub fn state(&self) -> StreamState {
        self.session.state
    }

    pub fn model(&self) -> &dyn CameraModel {
        self.model.as_ref()
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn calibration(&self) -> &Calibration {
        &self.session.calibration
    }

    pub fn visible_size(&self) -> (usize, usize) {
        self.model.geometry().visible_size()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn acquisition(&self) -> Acquisition {
        let policy = self
            .config
            .dead_pixel_policy
            .unwrap_or_else(|| self.model.dead_pixel_policy());
        Acquisition {
            policy,
            grab_attempts: self.config.grab_attempts_for(policy),
            chunk_size: self.config.chunk_size,
        }
    }

    fn load_additional_flat_field(&mut self) -> Result<(), ConfigurationError> {
        let Some(path) = &self.config.flat_field else {
            return Ok(());
        };
        let (width, height) = self.visible_size();
        let frame = load_flat_field(path, width, height)?;
        self.session.calibration.set_additional_flat_field(frame)?;
        Ok(())
    }

    fn run_open_attempts(&mut self) -> Result<(), OpenError> {
        let acquisition = self.acquisition();
        let attempts = self.config.open_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = stream::open_attempt(
                &mut self.transport,
                self.model.as_ref(),
                &mut self.session,
                acquisition,
            );
            match result {
                Ok(()) => return Ok(()),
                Err(e @ OpenError::Configuration(_)) => return Err(e),
                Err(e) if attempt >= attempts => {
                    return Err(OpenError::AttemptsExhausted {
                        attempts,
                        last: Box::new(e),
                    })
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "open attempt failed, retrying");
                    attempt += 1;
                }
            }
        }
    }
}

impl<T: Transport> Drop for SeekCam<T> {
    fn drop(&mut self) {
        self.close();
    }
}
