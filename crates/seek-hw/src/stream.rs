//! Frame state machine: requesting frames, dispatching on their tag, and
//! the open-time calibration pass.

use crate::camera::{ConfigurationError, OpenError};
use crate::command::DeviceCommand;
use crate::model::CameraModel;
use crate::sequencer::{self, InitError};
use crate::transport::{Transport, TransportError};
use seek_core::{Calibration, DeadPixelMap, DeadPixelPolicy, FrameGeometry, RawFrame};
use thiserror::Error;

pub const TAG_CALIBRATION: u16 = 1;
pub const TAG_IMAGE: u16 = 3;
pub const TAG_DEAD_PIXEL_MAP: u16 = 4;

/// Frame kind as announced in the raw frame's tag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Shutter-closed reference for flat-field subtraction.
    Calibration,
    Image,
    /// Start-up frame from which defective pixels are derived.
    DeadPixelMap,
    Other(u16),
}

impl FrameTag {
    pub fn from_raw(value: u16) -> Self {
        match value {
            TAG_CALIBRATION => Self::Calibration,
            TAG_IMAGE => Self::Image,
            TAG_DEAD_PIXEL_MAP => Self::DeadPixelMap,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Self::Calibration => TAG_CALIBRATION,
            Self::Image => TAG_IMAGE,
            Self::DeadPixelMap => TAG_DEAD_PIXEL_MAP,
            Self::Other(v) => v,
        }
    }
}

/// Which calibration inputs the session holds.
///
/// The state tracks flat-field availability, not whether images flow: an
/// open camera delivers images in `AwaitingCalibration`, corrected by the
/// dead-pixel map alone, until the sensor sends its first calibration frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not opened, or reset for a new open attempt.
    AwaitingDeadPixelMap,
    /// Dead-pixel map built; no flat-field yet.
    AwaitingCalibration,
    /// Dead-pixel map and flat-field both available.
    Streaming,
}

#[derive(Error, Debug)]
pub enum GrabError {
    #[error("camera is not open")]
    NotOpen,
    #[error("no image frame within {attempts} frame requests")]
    Timeout { attempts: usize },
}

/// Knobs for one session, resolved from the model and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquisition {
    pub policy: DeadPixelPolicy,
    pub grab_attempts: usize,
    pub chunk_size: usize,
}

/// Mutable per-session state: the raw buffer, calibration and stream state.
#[derive(Debug, Clone)]
pub struct Session {
    pub raw: RawFrame,
    pub calibration: Calibration,
    pub state: StreamState,
}

impl Session {
    pub fn new(geometry: FrameGeometry) -> Self {
        let (width, height) = geometry.visible_size();
        Self {
            raw: RawFrame::new(geometry),
            calibration: Calibration::new(width, height),
            state: StreamState::AwaitingDeadPixelMap,
        }
    }

    /// Drop everything learned from the sensor.
    pub fn reset(&mut self) {
        self.raw.samples_mut().fill(0);
        self.calibration.reset();
        self.state = StreamState::AwaitingDeadPixelMap;
    }
}

/// Ask for one frame, read it into `raw` and decode its tag.
pub fn request_frame<T: Transport + ?Sized>(
    transport: &mut T,
    model: &dyn CameraModel,
    raw: &mut RawFrame,
    chunk_size: usize,
) -> Result<FrameTag, TransportError> {
    let samples = raw.samples().len() as u32;
    transport.control_send(DeviceCommand::StartGetImageTransfer, &samples.to_le_bytes())?;
    transport.fetch_frame(raw.samples_mut(), chunk_size)?;

    let tag = FrameTag::from_raw(model.frame_tag(raw));
    tracing::trace!(?tag, counter = model.frame_counter(raw), "frame received");
    Ok(tag)
}

/// Request frames until an image arrives or the budget is spent.
///
/// Calibration frames refresh the flat-field on the way. Failed fetches
/// count against the budget like any other non-image frame.
pub fn grab<T: Transport + ?Sized>(
    transport: &mut T,
    model: &dyn CameraModel,
    session: &mut Session,
    acquisition: Acquisition,
) -> Result<(), GrabError> {
    for attempt in 1..=acquisition.grab_attempts {
        match request_frame(transport, model, &mut session.raw, acquisition.chunk_size) {
            Ok(FrameTag::Image) => return Ok(()),
            Ok(FrameTag::Calibration) => {
                session.calibration.update_flat_field(&session.raw);
                if session.state == StreamState::AwaitingCalibration {
                    session.state = StreamState::Streaming;
                }
                tracing::debug!(attempt, "flat-field updated");
            }
            Ok(tag) => tracing::debug!(attempt, ?tag, "skipping frame"),
            Err(e) => tracing::warn!(attempt, error = %e, "frame request failed"),
        }
    }
    Err(GrabError::Timeout {
        attempts: acquisition.grab_attempts,
    })
}

/// One open attempt: init script, dead-pixel map, first image.
pub fn open_attempt<T: Transport + ?Sized>(
    transport: &mut T,
    model: &dyn CameraModel,
    session: &mut Session,
    acquisition: Acquisition,
) -> Result<(), OpenError> {
    session.reset();
    sequencer::run(transport, &model.init_script())?;

    let tag = request_frame(transport, model, &mut session.raw, acquisition.chunk_size)
        .map_err(InitError::FirstFrame)?;
    if tag != FrameTag::DeadPixelMap {
        return Err(InitError::UnexpectedFrameTag {
            expected: TAG_DEAD_PIXEL_MAP,
            actual: tag.raw(),
        }
        .into());
    }

    let (width, height) = session.raw.geometry().visible_size();
    let map = DeadPixelMap::from_reference(&session.raw.visible_to_vec(), width, height, acquisition.policy)
        .map_err(ConfigurationError::from)?;
    session
        .calibration
        .set_dead_pixels(map)
        .map_err(ConfigurationError::from)?;
    session.state = StreamState::AwaitingCalibration;

    grab(transport, model, session, acquisition)?;
    Ok(())
}
