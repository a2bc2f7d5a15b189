//! Scripted in-memory transport for protocol tests.

use crate::command::DeviceCommand;
use crate::model::CameraModel;
use crate::transport::{ChunkRead, Transport, TransportError};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    Send(DeviceCommand, Vec<u8>),
    Receive(DeviceCommand, usize),
}

/// Records every call and serves queued raw frames, one per
/// START_GET_IMAGE_TRANSFER request. An empty queue behaves like a sensor
/// that never answers: the next bulk read times out without data.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub calls: Vec<Call>,
    pub frames: VecDeque<Vec<u16>>,
    /// Largest number of bytes one bulk read delivers.
    pub chunk_limit: Option<usize>,
    pub fail_open: bool,
    failures: HashMap<DeviceCommand, usize>,
    pending: Vec<u8>,
    cursor: usize,
    open: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    /// Make the next `count` exchanges of `command` fail.
    pub fn fail_next(&mut self, command: DeviceCommand, count: usize) {
        self.failures.insert(command, count);
    }

    pub fn queue_frame(&mut self, samples: Vec<u16>) {
        self.frames.push_back(samples);
    }

    pub fn count_sends(&self, command: DeviceCommand) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Send(cmd, _) if *cmd == command))
            .count()
    }

    pub fn count_receives(&self, command: DeviceCommand) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Receive(cmd, _) if *cmd == command))
            .count()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    fn inject_failure(&mut self, command: DeviceCommand, len: usize) -> Result<(), TransportError> {
        match self.failures.get_mut(&command) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(TransportError::LengthMismatch {
                    command,
                    expected: len,
                    actual: 0,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Open);
        if self.open {
            return Err(TransportError::AlreadyOpen);
        }
        if self.fail_open {
            return Err(TransportError::DeviceNotFound {
                vendor: 0x289d,
                product: 0x0010,
            });
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.calls.push(Call::Close);
        self.open = false;
    }

    fn control_send(&mut self, command: DeviceCommand, payload: &[u8]) -> Result<(), TransportError> {
        self.calls.push(Call::Send(command, payload.to_vec()));
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.inject_failure(command, payload.len())?;
        if command == DeviceCommand::StartGetImageTransfer {
            self.pending = self
                .frames
                .pop_front()
                .map(|frame| frame.iter().flat_map(|s| s.to_le_bytes()).collect())
                .unwrap_or_default();
            self.cursor = 0;
        }
        Ok(())
    }

    fn control_receive(&mut self, command: DeviceCommand, buf: &mut [u8]) -> Result<(), TransportError> {
        self.calls.push(Call::Receive(command, buf.len()));
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.inject_failure(command, buf.len())?;
        buf.fill(0);
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkRead, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let remaining = self.pending.len() - self.cursor;
        let len = buf
            .len()
            .min(remaining)
            .min(self.chunk_limit.unwrap_or(usize::MAX));
        if len == 0 {
            return Ok(ChunkRead::timed_out(0));
        }
        buf[..len].copy_from_slice(&self.pending[self.cursor..self.cursor + len]);
        self.cursor += len;
        Ok(ChunkRead::complete(len))
    }
}

/// A raw frame for `model` filled with `fill`, carrying `tag` in its tag slot.
pub fn raw_frame(model: &dyn CameraModel, tag: u16, fill: u16) -> Vec<u16> {
    let mut samples = vec![fill; model.geometry().raw_len()];
    samples[model.field_offsets().frame_tag] = tag;
    samples
}

/// Raw sample offset of visible pixel `(x, y)`.
pub fn visible_offset(model: &dyn CameraModel, x: usize, y: usize) -> usize {
    let geometry = model.geometry();
    let roi = geometry.roi();
    (roi.y + y) * geometry.raw_width() + roi.x + x
}
