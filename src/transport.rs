use std::thread;

use crate::config::{SerialSettings, TransportConfig};
use crate::modbus_rtu::{self, ModbusRTU};
use crate::serial::{SerialLink, SerialPortLink};
use crate::usb::UsbRecovery;
use crate::{FunctionCode, ModbusTransportError};

/// Request/response engine for one RS-485 line whose transceiver echoes
/// every transmitted byte back before the slave answers.
///
/// Each call blocks until the exchange succeeds or the attempt budget is
/// spent. Between failed attempts the link is reopened and the transport
/// sleeps for the configured backoff.
pub struct ModbusRtuTransport<L: SerialLink = SerialPortLink> {
    link: L,
    config: TransportConfig,
}

impl ModbusRtuTransport<SerialPortLink> {
    pub fn open(
        settings: SerialSettings,
        config: TransportConfig,
    ) -> Result<Self, ModbusTransportError> {
        let link = SerialPortLink::open(settings)?;
        Ok(Self::new(link, config))
    }

    /// Forces the kernel to re-enumerate the given USB buses, for use when the
    /// serial device node has disappeared.
    pub fn reset_usb_buses(buses: &[u32]) -> std::io::Result<()> {
        UsbRecovery::default().reset(buses)
    }
}

impl<L: SerialLink> ModbusRtuTransport<L> {
    pub fn new(link: L, config: TransportConfig) -> Self {
        Self { link, config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Reads `count` holding registers (0x03). Returns two bytes per register
    /// in wire order.
    pub fn read_holding_registers(
        &mut self,
        slave_address: u8,
        start_register: u16,
        count: u16,
    ) -> Result<Vec<u8>, ModbusTransportError> {
        let request = ModbusRTU::builder()
            .device_id(slave_address)
            .function(FunctionCode::ReadHoldingRegisters)
            .start_register(start_register)
            .count(count)
            .build()?;
        self.exchange(&request)
    }

    /// Reads `count` input registers (0x04).
    pub fn read_input_registers(
        &mut self,
        slave_address: u8,
        start_register: u16,
        count: u16,
    ) -> Result<Vec<u8>, ModbusTransportError> {
        let request = ModbusRTU::builder()
            .device_id(slave_address)
            .function(FunctionCode::ReadInputRegisters)
            .start_register(start_register)
            .count(count)
            .build()?;
        self.exchange(&request)
    }

    /// Writes `data` to `register_count` registers (0x10).
    ///
    /// The returned bytes are the slave's acknowledgement body and are
    /// advisory only; read the registers back when confirmation matters.
    pub fn write_multiple_registers(
        &mut self,
        slave_address: u8,
        start_register: u16,
        register_count: u16,
        byte_count: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, ModbusTransportError> {
        let request = ModbusRTU::builder()
            .device_id(slave_address)
            .function(FunctionCode::WriteMultipleRegisters)
            .start_register(start_register)
            .count(register_count)
            .byte_count(byte_count)
            .data(data)
            .build()?;
        self.exchange(&request)
    }

    /// Runs the retry loop for an already built request.
    pub fn exchange(&mut self, request: &ModbusRTU) -> Result<Vec<u8>, ModbusTransportError> {
        let frame = request.create_request();
        let max_attempts = self.config.attempts();
        let mut attempt = 0;

        loop {
            let err = match self.attempt(request, &frame) {
                Ok(payload) => return Ok(payload),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            attempt += 1;
            tracing::warn!(
                slave = request.device_id(),
                attempt,
                max_attempts,
                "modbus exchange failed: {err}"
            );

            if attempt >= max_attempts {
                tracing::error!(
                    slave = request.device_id(),
                    "giving up after {attempt} attempts: {err}"
                );
                return Err(err);
            }

            // a failed reopen leaves the link closed, so the next attempt
            // fails on write and consumes its slot in the budget
            if let Err(reopen_err) = self.link.reopen() {
                tracing::warn!("failed to reopen serial link: {reopen_err}");
            }
            if !self.config.backoff.is_zero() {
                thread::sleep(self.config.backoff);
            }
        }
    }

    fn attempt(&mut self, request: &ModbusRTU, frame: &[u8]) -> Result<Vec<u8>, ModbusTransportError> {
        tracing::debug!("RTU TX - {frame:02X?}");
        self.link.write_frame(frame)?;
        let pdu_length = frame.len();

        let received = self.link.read_response(self.config.max_read)?;
        let (echo, reply) =
            modbus_rtu::strip_echo(&received, pdu_length).ok_or(ModbusTransportError::NoResponse)?;

        tracing::debug!("RTU echo - {echo:02X?}");
        if echo != frame {
            tracing::warn!("echo does not match transmitted frame: {echo:02X?}");
        }
        tracing::debug!("RTU RX - {reply:02X?}");

        request.parse_response(reply)
    }
}
