//! Init sequences that bring a sensor from idle into streaming.

use crate::command::DeviceCommand;
use crate::transport::{Transport, TransportError};
use thiserror::Error;

/// How often the stream-off request is repeated when stopping.
pub const STOP_REPEAT: usize = 3;

const STOP_PAYLOAD: [u8; 2] = [0x00, 0x00];

/// One step of an init script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Host-to-device request carrying a fixed payload.
    Set {
        command: DeviceCommand,
        payload: Vec<u8>,
    },
    /// Device-to-host request reading `len` bytes.
    Get { command: DeviceCommand, len: usize },
}

impl Exchange {
    pub fn set(command: DeviceCommand, payload: &[u8]) -> Self {
        Self::Set {
            command,
            payload: payload.to_vec(),
        }
    }

    pub fn get(command: DeviceCommand, len: usize) -> Self {
        Self::Get { command, len }
    }

    pub fn command(&self) -> DeviceCommand {
        match self {
            Self::Set { command, .. } | Self::Get { command, .. } => *command,
        }
    }
}

#[derive(Error, Debug)]
pub enum InitError {
    #[error("init step {step} ({command:?}) failed: {source}")]
    Exchange {
        step: usize,
        command: DeviceCommand,
        #[source]
        source: TransportError,
    },
    #[error("first frame acquisition failed: {0}")]
    FirstFrame(#[source] TransportError),
    #[error("expected first frame with tag {expected}, got {actual}")]
    UnexpectedFrameTag { expected: u16, actual: u16 },
}

/// Execute `script` in order, aborting on the first failed exchange.
///
/// A failing first exchange usually means a previous session left the
/// sensor streaming, so the stream is stopped and that exchange retried
/// once before giving up.
pub fn run<T: Transport + ?Sized>(transport: &mut T, script: &[Exchange]) -> Result<(), InitError> {
    let Some((first, rest)) = script.split_first() else {
        return Ok(());
    };

    if let Err(e) = perform(transport, first) {
        tracing::warn!(error = %e, "first init exchange failed, stopping stream and retrying");
        stop_streaming(transport);
        perform(transport, first).map_err(|source| InitError::Exchange {
            step: 0,
            command: first.command(),
            source,
        })?;
    }

    for (i, exchange) in rest.iter().enumerate() {
        perform(transport, exchange).map_err(|source| InitError::Exchange {
            step: i + 1,
            command: exchange.command(),
            source,
        })?;
    }

    tracing::debug!(steps = script.len(), "init sequence complete");
    Ok(())
}

/// Best-effort stream-off: every request is sent even if earlier ones fail.
pub fn stop_streaming<T: Transport + ?Sized>(transport: &mut T) {
    for _ in 0..STOP_REPEAT {
        if let Err(e) = transport.control_send(DeviceCommand::SetOperationMode, &STOP_PAYLOAD) {
            tracing::warn!(error = %e, "stop request failed");
        }
    }
}

fn perform<T: Transport + ?Sized>(transport: &mut T, exchange: &Exchange) -> Result<(), TransportError> {
    match exchange {
        Exchange::Set { command, payload } => transport.control_send(*command, payload),
        Exchange::Get { command, len } => {
            let mut response = vec![0u8; *len];
            transport.control_receive(*command, &mut response)?;
            tracing::debug!(?command, response = %hex(&response), "init response");
            Ok(())
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
