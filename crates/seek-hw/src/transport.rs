//! Transport layer: vendor control exchanges and chunked frame reads.
//!
//! [`Transport`] is the seam between the protocol logic and the wire. The
//! chunked frame fetch is implemented once on top of [`Transport::read_chunk`]
//! so every backend shares the same timeout and byte-order handling.

use crate::command::DeviceCommand;
use std::path::PathBuf;
use thiserror::Error;

/// Default timeout for control and bulk transfers.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Default bulk request size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 0x4000;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device not found: {vendor:04x}:{product:04x}")]
    DeviceNotFound { vendor: u16, product: u16 },
    #[error("device already open")]
    AlreadyOpen,
    #[error("device not open")]
    NotOpen,
    #[error("usb: {0}")]
    Usb(#[from] rusb::Error),
    #[error("control transfer {command:?} returned {actual} bytes, expected {expected}")]
    LengthMismatch {
        command: DeviceCommand,
        expected: usize,
        actual: usize,
    },
    #[error("bulk read timed out after {received} of {expected} bytes")]
    Timeout { received: usize, expected: usize },
    #[error("replay {path}: {reason}")]
    Replay { path: PathBuf, reason: String },
}

/// Outcome of a single bulk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRead {
    /// Bytes written into the buffer.
    pub len: usize,
    /// The read hit its timeout (possibly after delivering `len` bytes).
    pub timed_out: bool,
}

impl ChunkRead {
    pub const fn complete(len: usize) -> Self {
        Self {
            len,
            timed_out: false,
        }
    }

    pub const fn timed_out(len: usize) -> Self {
        Self {
            len,
            timed_out: true,
        }
    }
}

/// A blocking connection to one camera.
pub trait Transport {
    /// Locate and exclusively claim the device.
    fn open(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Release the device. Idempotent; a no-op when never opened.
    fn close(&mut self);

    /// Host-to-device vendor request carrying `payload`.
    fn control_send(&mut self, command: DeviceCommand, payload: &[u8]) -> Result<(), TransportError>;

    /// Device-to-host vendor request filling all of `buf`.
    fn control_receive(&mut self, command: DeviceCommand, buf: &mut [u8]) -> Result<(), TransportError>;

    /// One bulk read from the frame endpoint into `buf`.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkRead, TransportError>;

    /// Fill `frame` with little-endian samples using bulk reads of at most
    /// `chunk_size` bytes.
    ///
    /// A chunk that times out after delivering data is logged and the read
    /// continues; a chunk that delivers nothing fails the call.
    fn fetch_frame(&mut self, frame: &mut [u16], chunk_size: usize) -> Result<(), TransportError> {
        let expected = frame.len() * 2;
        let chunk_size = chunk_size.max(1);
        let mut bytes = vec![0u8; expected];
        let mut done = 0;

        while done < expected {
            let request = chunk_size.min(expected - done);
            let chunk = self.read_chunk(&mut bytes[done..done + request])?;
            tracing::trace!(at = done, requested = request, received = chunk.len, "bulk read");

            if chunk.len == 0 {
                return Err(TransportError::Timeout {
                    received: done,
                    expected,
                });
            }
            if chunk.timed_out {
                tracing::warn!(
                    at = done,
                    received = chunk.len,
                    "bulk read timed out after partial transfer"
                );
            }
            done += chunk.len.min(request);
        }

        for (sample, pair) in frame.iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn control_send(&mut self, command: DeviceCommand, payload: &[u8]) -> Result<(), TransportError> {
        (**self).control_send(command, payload)
    }

    fn control_receive(&mut self, command: DeviceCommand, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).control_receive(command, buf)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkRead, TransportError> {
        (**self).read_chunk(buf)
    }
}

/// Fail unless a control transfer moved exactly the requested byte count.
pub(crate) fn check_length(
    command: DeviceCommand,
    expected: usize,
    actual: usize,
) -> Result<(), TransportError> {
    if actual != expected {
        return Err(TransportError::LengthMismatch {
            command,
            expected,
            actual,
        });
    }
    Ok(())
}
