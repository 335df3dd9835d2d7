use super::*;

/// Slave address, function code and the two CRC bytes.
pub const MIN_FRAME_LENGTH: usize = 4;

pub struct ModbusRTUBuilder {
    unit_builder: ModbusUnitBuilder,
    device_id: Option<u8>,
}

impl ModbusRTUBuilder {
    pub fn function(mut self, function: FunctionCode) -> Self {
        self.unit_builder.function(function);
        self
    }

    pub fn start_register(mut self, register: u16) -> Self {
        self.unit_builder.start_register(register);
        self
    }

    pub fn count(mut self, count: u16) -> Self {
        self.unit_builder.count(count);
        self
    }

    pub fn byte_count(mut self, byte_count: u8) -> Self {
        self.unit_builder.byte_count(byte_count);
        self
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.unit_builder.data(data);
        self
    }

    pub fn device_id(mut self, device_id: u8) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn build(self) -> Result<ModbusRTU, ModbusTransportError> {
        let unit = self.unit_builder.build().map_err(ModbusTransportError::Unit)?;

        let device_id = self.device_id.ok_or(ModbusTransportError::DeviceIdMissing)?;

        Ok(ModbusRTU { unit, device_id })
    }
}

/// A single Modbus RTU request addressed to one slave, and the matching
/// response decoder.
#[derive(Clone, Debug)]
pub struct ModbusRTU {
    unit: ModbusUnit,
    device_id: u8,
}

impl ModbusRTU {
    pub fn builder() -> ModbusRTUBuilder {
        ModbusRTUBuilder {
            unit_builder: ModbusUnit::builder(),
            device_id: None,
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn function(&self) -> FunctionCode {
        self.unit.function()
    }

    /// Complete on-wire request: address, PDU, CRC low byte, CRC high byte.
    pub fn create_request(&self) -> Vec<u8> {
        self.wrap_rtu(self.unit.create_request_pdu())
    }

    /// Decodes a response frame with the echo already removed.
    pub fn parse_response(&self, frame: &[u8]) -> Result<Vec<u8>, ModbusTransportError> {
        let pdu = self.unwrap_rtu(frame)?;
        self.unit.parse_response_pdu(pdu).map_err(ModbusTransportError::Unit)
    }

    fn wrap_rtu(&self, pdu: Vec<u8>) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
        frame.push(self.device_id);
        frame.extend(&pdu);

        let crc = calculate_crc(&frame);
        frame.push(crc as u8);
        frame.push((crc >> 8) as u8);

        frame
    }

    fn unwrap_rtu<'a>(&self, frame: &'a [u8]) -> Result<&'a [u8], ModbusTransportError> {
        if frame.len() < MIN_FRAME_LENGTH {
            return Err(ModbusTransportError::FrameTooShort(frame.len()));
        }

        let (body, crc) = frame.split_at(frame.len() - 2);
        let received_crc = u16::from_le_bytes([crc[0], crc[1]]);
        let calculated_crc = calculate_crc(body);

        if received_crc != calculated_crc {
            return Err(ModbusTransportError::CrcMismatch {
                expected: calculated_crc,
                received: received_crc,
            });
        }

        let unit_id = body[0];
        if unit_id != self.device_id {
            return Err(ModbusTransportError::UnitIdMismatch {
                expected: self.device_id,
                received: unit_id,
            });
        }

        Ok(&body[1..])
    }
}

/// Splits what was read off the bus into the echo of our own request and
/// the slave's reply.
///
/// A single NUL directly after the echo is injected by the USB-serial bridge
/// and is dropped. Returns `None` when nothing followed the echo.
pub fn strip_echo(received: &[u8], pdu_length: usize) -> Option<(&[u8], &[u8])> {
    if received.len() <= pdu_length {
        return None;
    }

    let (echo, mut reply) = received.split_at(pdu_length);
    if reply[0] == 0x00 {
        tracing::debug!("skipping NUL after echo");
        reply = &reply[1..];
    }

    if reply.is_empty() {
        return None;
    }
    Some((echo, reply))
}

/// Modbus CRC-16: reflected polynomial 0xA001, initial value 0xFFFF.
pub fn calculate_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
