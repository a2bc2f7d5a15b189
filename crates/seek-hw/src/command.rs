//! Vendor request codes understood by Seek Thermal firmware.
//!
//! Direction (host to device or device to host) is chosen by the call, not
//! the code.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceCommand {
    GetErrorCode = 53,
    ReadChipId = 54,
    ToggleShutter = 55,
    SetShutterPolarity = 56,
    GetShutterPolarity = 57,
    SetBitDataOffset = 58,
    GetBitData = 59,
    SetOperationMode = 60,
    GetOperationMode = 61,
    SetImageProcessingMode = 62,
    GetImageProcessingMode = 63,
    SetDataPage = 64,
    GetDataPage = 65,
    SetCurrentCommandArraySize = 66,
    SetCurrentCommandArray = 67,
    GetCurrentCommandArray = 68,
    SetDefaultCommandArraySize = 69,
    SetDefaultCommandArray = 70,
    GetDefaultCommandArray = 71,
    SetVdacArrayOffsetAndItems = 72,
    SetVdacArray = 73,
    GetVdacArray = 74,
    SetRdacArrayOffsetAndItems = 75,
    SetRdacArray = 76,
    GetRdacArray = 77,
    GetFirmwareInfo = 78,
    UploadFirmwareRowSize = 79,
    WriteMemoryData = 80,
    CompleteMemoryWrite = 81,
    BeginMemoryWrite = 82,
    StartGetImageTransfer = 83,
    TargetPlatform = 84,
    SetFirmwareInfoFeatures = 85,
    SetFactorySettingsFeatures = 86,
    SetFactorySettings = 87,
    GetFactorySettings = 88,
    ResetDevice = 89,
}

impl DeviceCommand {
    /// `bRequest` value for the control transfer.
    pub const fn code(self) -> u8 {
        self as u8
    }
}
