//! Supported camera models.
//!
//! A model fixes everything that differs between sensors: USB id, raw frame
//! layout, where the metadata words live in the raw frame, the init script
//! and the preferred dead-pixel policy. Everything else is shared.

use crate::command::DeviceCommand;
use crate::sequencer::Exchange;
use seek_core::{DeadPixelPolicy, FrameGeometry, RawFrame, Roi};

/// Seek Thermal USB vendor id.
pub const SEEK_VENDOR_ID: u16 = 0x289d;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

/// Raw sample offsets of the per-frame metadata words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOffsets {
    pub frame_tag: usize,
    pub frame_counter: usize,
    pub temp_sensor: usize,
}

pub trait CameraModel: Send + Sync {
    /// Short identifier used on the command line and in logs.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn usb_id(&self) -> UsbId;

    fn geometry(&self) -> FrameGeometry;

    fn field_offsets(&self) -> FieldOffsets;

    fn init_script(&self) -> Vec<Exchange>;

    fn dead_pixel_policy(&self) -> DeadPixelPolicy;

    fn frame_tag(&self, raw: &RawFrame) -> u16 {
        raw.sample(self.field_offsets().frame_tag).unwrap_or(0)
    }

    /// Hardware frame counter.
    fn frame_counter(&self, raw: &RawFrame) -> u16 {
        raw.sample(self.field_offsets().frame_counter).unwrap_or(0)
    }

    /// Uncalibrated on-die temperature sensor reading.
    fn device_temp_sensor(&self, raw: &RawFrame) -> u16 {
        raw.sample(self.field_offsets().temp_sensor).unwrap_or(0)
    }
}

/// First-generation Seek Thermal (Compact, XR).
#[derive(Debug, Clone, Copy, Default)]
pub struct SeekThermal;

impl SeekThermal {
    pub const GEOMETRY: FrameGeometry = FrameGeometry::new(
        208,
        156,
        Roi {
            x: 0,
            y: 1,
            width: 207,
            height: 154,
        },
    );
}

impl CameraModel for SeekThermal {
    fn name(&self) -> &'static str {
        "seek"
    }

    fn description(&self) -> &'static str {
        "Seek Thermal Compact/XR"
    }

    fn usb_id(&self) -> UsbId {
        UsbId {
            vendor: SEEK_VENDOR_ID,
            product: 0x0010,
        }
    }

    fn geometry(&self) -> FrameGeometry {
        Self::GEOMETRY
    }

    fn field_offsets(&self) -> FieldOffsets {
        FieldOffsets {
            frame_tag: 10,
            frame_counter: 40,
            temp_sensor: 1,
        }
    }

    fn init_script(&self) -> Vec<Exchange> {
        use DeviceCommand::*;
        vec![
            Exchange::set(TargetPlatform, &[0x01]),
            Exchange::set(SetOperationMode, &[0x00, 0x00]),
            Exchange::get(GetFirmwareInfo, 4),
            Exchange::get(ReadChipId, 12),
            Exchange::set(SetFactorySettingsFeatures, &[0x20, 0x00, 0x30, 0x00, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 64),
            Exchange::set(SetFactorySettingsFeatures, &[0x20, 0x00, 0x50, 0x00, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 64),
            Exchange::set(SetFactorySettingsFeatures, &[0x0c, 0x00, 0x70, 0x00, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 24),
            Exchange::set(SetFactorySettingsFeatures, &[0x06, 0x00, 0x08, 0x00, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 12),
            Exchange::set(SetImageProcessingMode, &[0x08, 0x00]),
            Exchange::get(GetOperationMode, 2),
            Exchange::set(SetImageProcessingMode, &[0x08, 0x00]),
            Exchange::set(SetOperationMode, &[0x01, 0x00]),
            Exchange::get(GetOperationMode, 2),
        ]
    }

    fn dead_pixel_policy(&self) -> DeadPixelPolicy {
        DeadPixelPolicy::DirectMask
    }
}

/// 320x240 Seek Thermal CompactPRO.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeekThermalPro;

impl SeekThermalPro {
    pub const GEOMETRY: FrameGeometry = FrameGeometry::new(
        342,
        260,
        Roi {
            x: 1,
            y: 4,
            width: 320,
            height: 240,
        },
    );

    /// Factory settings are read in 32-byte pages up to this address.
    const FACTORY_SETTINGS_END: u16 = 2560;
    const FACTORY_SETTINGS_PAGE: u16 = 32;
}

impl CameraModel for SeekThermalPro {
    fn name(&self) -> &'static str {
        "seekpro"
    }

    fn description(&self) -> &'static str {
        "Seek Thermal CompactPRO"
    }

    fn usb_id(&self) -> UsbId {
        UsbId {
            vendor: SEEK_VENDOR_ID,
            product: 0x0011,
        }
    }

    fn geometry(&self) -> FrameGeometry {
        Self::GEOMETRY
    }

    fn field_offsets(&self) -> FieldOffsets {
        FieldOffsets {
            frame_tag: 2,
            frame_counter: 1,
            temp_sensor: 5,
        }
    }

    fn init_script(&self) -> Vec<Exchange> {
        use DeviceCommand::*;
        let mut script = vec![
            Exchange::set(TargetPlatform, &[0x01]),
            Exchange::set(SetOperationMode, &[0x00, 0x00]),
            Exchange::get(GetFirmwareInfo, 4),
            Exchange::get(ReadChipId, 12),
            Exchange::set(SetFactorySettingsFeatures, &[0x06, 0x00, 0x08, 0x00, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 12),
            Exchange::set(SetFirmwareInfoFeatures, &[0x17, 0x00]),
            Exchange::get(GetFirmwareInfo, 64),
            Exchange::set(SetFactorySettingsFeatures, &[0x01, 0x00, 0x00, 0x06, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 2),
            Exchange::set(SetFactorySettingsFeatures, &[0x01, 0x00, 0x01, 0x06, 0x00, 0x00]),
            Exchange::get(GetFactorySettings, 2),
        ];

        for addr in (0..Self::FACTORY_SETTINGS_END).step_by(usize::from(Self::FACTORY_SETTINGS_PAGE)) {
            let [lo, hi] = addr.to_le_bytes();
            script.push(Exchange::set(
                SetFactorySettingsFeatures,
                &[0x20, 0x00, lo, hi, 0x00, 0x00],
            ));
            script.push(Exchange::get(GetFactorySettings, 64));
        }

        script.extend([
            Exchange::set(SetFirmwareInfoFeatures, &[0x15, 0x00]),
            Exchange::get(GetFirmwareInfo, 64),
            Exchange::set(SetImageProcessingMode, &[0x08, 0x00]),
            Exchange::set(SetOperationMode, &[0x01, 0x00]),
        ]);
        script
    }

    fn dead_pixel_policy(&self) -> DeadPixelPolicy {
        DeadPixelPolicy::Histogram
    }
}

/// Every model this crate can drive.
pub fn supported_models() -> Vec<Box<dyn CameraModel>> {
    vec![Box::new(SeekThermal), Box::new(SeekThermalPro)]
}

/// Look up a model by its [`CameraModel::name`].
pub fn model_by_name(name: &str) -> Option<Box<dyn CameraModel>> {
    supported_models().into_iter().find(|m| m.name() == name)
}

/// Look up a model by USB vendor:product id.
pub fn model_by_usb_id(vendor: u16, product: u16) -> Option<Box<dyn CameraModel>> {
    supported_models()
        .into_iter()
        .find(|m| m.usb_id() == UsbId { vendor, product })
}
