//! Offline transport that replays recorded raw frames.
//!
//! A recording is a directory of `frame_0.png`, `frame_1.png`, ... holding
//! 16-bit single-channel images at raw sensor size. Control exchanges are
//! accepted without effect and every frame request serves the next file.

use crate::command::DeviceCommand;
use crate::transport::{ChunkRead, Transport, TransportError};
use image::DynamicImage;
use std::path::{Path, PathBuf};

pub struct ReplayTransport {
    dir: PathBuf,
    next: usize,
    open: bool,
    pending: Vec<u8>,
    cursor: usize,
}

impl ReplayTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next: 0,
            open: false,
            pending: Vec::new(),
            cursor: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames served so far.
    pub fn frames_served(&self) -> usize {
        self.next
    }

    pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("frame_{index}.png"))
    }

    fn load_next(&mut self) -> Result<(), TransportError> {
        let path = Self::frame_path(&self.dir, self.next);
        let replay_err = |reason: String| TransportError::Replay {
            path: path.clone(),
            reason,
        };

        let image = image::open(&path).map_err(|e| replay_err(e.to_string()))?;
        let buffer = match image {
            DynamicImage::ImageLuma16(buffer) => buffer,
            other => {
                return Err(replay_err(format!(
                    "expected 16-bit grayscale, got {:?}",
                    other.color()
                )))
            }
        };

        self.pending = buffer.as_raw().iter().flat_map(|s| s.to_le_bytes()).collect();
        self.cursor = 0;
        tracing::debug!(path = %path.display(), "replaying frame");
        self.next += 1;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

impl Transport for ReplayTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.open {
            return Err(TransportError::AlreadyOpen);
        }
        if !self.dir.is_dir() {
            return Err(TransportError::Replay {
                path: self.dir.clone(),
                reason: "not a directory".into(),
            });
        }
        self.open = true;
        tracing::info!(dir = %self.dir.display(), "replay opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
        self.pending.clear();
        self.cursor = 0;
    }

    fn control_send(&mut self, command: DeviceCommand, _payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        if command == DeviceCommand::StartGetImageTransfer {
            self.load_next()?;
        }
        Ok(())
    }

    fn control_receive(&mut self, _command: DeviceCommand, buf: &mut [u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        buf.fill(0);
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkRead, TransportError> {
        self.ensure_open()?;
        let len = buf.len().min(self.pending.len() - self.cursor);
        if len == 0 {
            return Ok(ChunkRead::timed_out(0));
        }
        buf[..len].copy_from_slice(&self.pending[self.cursor..self.cursor + len]);
        self.cursor += len;
        Ok(ChunkRead::complete(len))
    }
}
