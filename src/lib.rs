// lib.rs

mod core;
mod modbus_rtu;

pub mod config;
pub mod serial;
pub mod transport;
pub mod usb;

pub use self::core::{FunctionCode, ModbusUnit, ModbusUnitBuilder, ModbusUnitError};
pub use self::core::{MAX_READ_COUNT, MAX_WRITE_COUNT};
pub use modbus_rtu::{MIN_FRAME_LENGTH, ModbusRTU, ModbusRTUBuilder, calculate_crc, strip_echo};

pub use config::{Parity, SerialSettings, TransportConfig};
pub use serial::{SerialLink, SerialPortLink};
pub use transport::ModbusRtuTransport;
pub use usb::UsbRecovery;

#[derive(Debug, thiserror::Error)]
pub enum ModbusTransportError {
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open serial port: {0}")]
    Open(#[from] serialport::Error),

    #[error("No response over modbus")]
    NoResponse,

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Unit ID mismatch: expected {expected}, received {received}")]
    UnitIdMismatch { expected: u8, received: u8 },

    #[error("CRC mismatch: expected {expected:#06x}, received {received:#06x}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("Device ID not set")]
    DeviceIdMissing,

    #[error("Protocol error: {0}")]
    Unit(#[from] ModbusUnitError),
}

impl ModbusTransportError {
    /// Whether another attempt on the same link might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::NoResponse => true,
            Self::FrameTooShort(_) | Self::UnitIdMismatch { .. } | Self::CrcMismatch { .. } => true,
            Self::Unit(err) => err.is_retryable(),
            Self::Open(_) | Self::DeviceIdMissing => false,
        }
    }
}
