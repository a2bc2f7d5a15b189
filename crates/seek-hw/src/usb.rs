//! libusb transport via `rusb`.

use crate::command::DeviceCommand;
use crate::model::UsbId;
use crate::transport::{check_length, ChunkRead, Transport, TransportError};
use rusb::{request_type, Context, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use std::time::Duration;

/// Bulk IN endpoint carrying frame data.
const FRAME_ENDPOINT: u8 = 0x81;
const INTERFACE: u8 = 0;
const CONFIGURATION: u8 = 1;

pub struct UsbTransport {
    id: UsbId,
    timeout: Duration,
    handle: Option<DeviceHandle<Context>>,
}

impl UsbTransport {
    pub fn new(id: UsbId, timeout: Duration) -> Self {
        Self {
            id,
            timeout,
            handle: None,
        }
    }

    pub fn usb_id(&self) -> UsbId {
        self.id
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>, TransportError> {
        self.handle.as_ref().ok_or(TransportError::NotOpen)
    }
}

/// First device matching `id`. Errors while inspecting unrelated devices
/// are skipped.
fn open_device(context: &Context, id: UsbId) -> Result<DeviceHandle<Context>, TransportError> {
    for device in context.devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() == id.vendor && desc.product_id() == id.product {
            tracing::debug!(
                bus = device.bus_number(),
                address = device.address(),
                "found matching device"
            );
            return Ok(device.open()?);
        }
    }
    Err(TransportError::DeviceNotFound {
        vendor: id.vendor,
        product: id.product,
    })
}

impl Transport for UsbTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.handle.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let context = Context::new()?;
        let mut handle = open_device(&context, self.id)?;

        // Only switch configuration when needed; setting it resets the device.
        if handle.active_configuration()? != CONFIGURATION {
            handle.set_active_configuration(CONFIGURATION)?;
        }
        handle.claim_interface(INTERFACE)?;

        tracing::info!(
            vendor = format_args!("{:04x}", self.id.vendor),
            product = format_args!("{:04x}", self.id.product),
            "USB device claimed"
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(INTERFACE) {
                tracing::warn!(error = %e, "failed to release interface");
            }
            tracing::debug!("USB device released");
        }
    }

    fn control_send(&mut self, command: DeviceCommand, payload: &[u8]) -> Result<(), TransportError> {
        let handle = self.handle()?;
        let rt = request_type(Direction::Out, RequestType::Vendor, Recipient::Interface);
        let written = handle.write_control(rt, command.code(), 0, 0, payload, self.timeout)?;
        check_length(command, payload.len(), written)
    }

    fn control_receive(&mut self, command: DeviceCommand, buf: &mut [u8]) -> Result<(), TransportError> {
        let handle = self.handle()?;
        let rt = request_type(Direction::In, RequestType::Vendor, Recipient::Interface);
        let read = handle.read_control(rt, command.code(), 0, 0, buf, self.timeout)?;
        check_length(command, buf.len(), read)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkRead, TransportError> {
        let handle = self.handle()?;
        match handle.read_bulk(FRAME_ENDPOINT, buf, self.timeout) {
            Ok(len) => Ok(ChunkRead::complete(len)),
            // libusb does not report partial progress on timeout.
            Err(rusb::Error::Timeout) => Ok(ChunkRead::timed_out(0)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.close();
    }
}
