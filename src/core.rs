use thiserror::Error;

/// Largest register count a single read request may ask for.
pub const MAX_READ_COUNT: u16 = 125;
/// Largest register count a single write-multiple request may carry.
pub const MAX_WRITE_COUNT: u16 = 123;

#[derive(Debug, Error)]
pub enum ModbusUnitError {
    #[error("Function code is empty")]
    FunctionIsEmpty,

    #[error("Start register is empty")]
    RegisterIsEmpty,

    #[error("Invalid register count: {0} (allowed 1..={1})")]
    InvalidCount(u16, u16),

    #[error("Invalid range: {0} + {1} > 65536")]
    RangeToMatch(u16, u16),

    #[error("Function {0:?} is not supported by this transport")]
    UnsupportedFunction(FunctionCode),

    #[error("Byte count mismatch: declared {declared}, data carries {actual}")]
    DataLengthMismatch { declared: u8, actual: usize },

    #[error("Data too long: {0} bytes > 255")]
    DataTooLong(usize),

    #[error("Empty response received")]
    EmptyResponse,

    #[error("Modbus exception: function code {0:#x}, exception code {1:#x}")]
    ModbusException(u8, u8),

    #[error("Unexpected function code: expected {0:#x}, got {1:#x}")]
    UnexpectedFunctionCode(u8, u8),

    #[error("Invalid response length")]
    InvalidResponseLength,

    #[error("Response byte count mismatch: declared {declared}, received {actual}")]
    ByteCountMismatch { declared: usize, actual: usize },
}

impl ModbusUnitError {
    /// Errors in the request itself, or a well formed exception reply,
    /// will not go away by sending the request again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::FunctionIsEmpty
                | Self::RegisterIsEmpty
                | Self::InvalidCount(..)
                | Self::RangeToMatch(..)
                | Self::UnsupportedFunction(_)
                | Self::DataLengthMismatch { .. }
                | Self::DataTooLong(_)
                | Self::ModbusException(..)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn get(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn is_register_read(self) -> bool {
        matches!(self, Self::ReadHoldingRegisters | Self::ReadInputRegisters)
    }
}

/// One register operation, minus the slave address and CRC.
#[derive(Clone, Debug)]
pub struct ModbusUnit {
    function: FunctionCode,
    start_register: u16,
    count: u16,
    byte_count: u8,
    data: Vec<u8>,
}

pub struct ModbusUnitBuilder {
    function: Option<FunctionCode>,
    start_register: Option<u16>,
    count: Option<u16>,
    byte_count: Option<u8>,
    data: Vec<u8>,
}

impl ModbusUnitBuilder {
    pub fn function(&mut self, function: FunctionCode) -> &mut Self {
        self.function = Some(function);
        self
    }

    pub fn start_register(&mut self, register: u16) -> &mut Self {
        self.start_register = Some(register);
        self
    }

    pub fn count(&mut self, count: u16) -> &mut Self {
        self.count = Some(count);
        self
    }

    pub fn byte_count(&mut self, byte_count: u8) -> &mut Self {
        self.byte_count = Some(byte_count);
        self
    }

    pub fn data(&mut self, data: &[u8]) -> &mut Self {
        self.data = data.to_vec();
        self
    }

    pub fn build(self) -> Result<ModbusUnit, ModbusUnitError> {
        let function = self.function.ok_or(ModbusUnitError::FunctionIsEmpty)?;
        let start_register = self.start_register.ok_or(ModbusUnitError::RegisterIsEmpty)?;
        let count = self.count.unwrap_or(1);

        let max_count = match function {
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => MAX_READ_COUNT,
            FunctionCode::WriteMultipleRegisters => MAX_WRITE_COUNT,
            other => return Err(ModbusUnitError::UnsupportedFunction(other)),
        };
        if count == 0 || count > max_count {
            return Err(ModbusUnitError::InvalidCount(count, max_count));
        }
        if start_register as u32 + count as u32 > 0x1_0000 {
            return Err(ModbusUnitError::RangeToMatch(start_register, count));
        }

        let (byte_count, data) = if function == FunctionCode::WriteMultipleRegisters {
            let byte_count = match self.byte_count {
                Some(byte_count) => byte_count,
                None => u8::try_from(self.data.len())
                    .map_err(|_| ModbusUnitError::DataTooLong(self.data.len()))?,
            };
            if self.data.len() != byte_count as usize {
                return Err(ModbusUnitError::DataLengthMismatch {
                    declared: byte_count,
                    actual: self.data.len(),
                });
            }
            (byte_count, self.data)
        } else {
            (0, Vec::new())
        };

        Ok(ModbusUnit {
            function,
            start_register,
            count,
            byte_count,
            data,
        })
    }
}

impl ModbusUnit {
    pub fn builder() -> ModbusUnitBuilder {
        ModbusUnitBuilder {
            function: None,
            start_register: None,
            count: None,
            byte_count: None,
            data: Vec::new(),
        }
    }

    pub fn function(&self) -> FunctionCode {
        self.function
    }

    /// Function code followed by the function specific body, all big-endian.
    pub fn create_request_pdu(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(6 + self.data.len());
        pdu.push(self.function.value());
        pdu.extend_from_slice(&self.start_register.to_be_bytes());
        pdu.extend_from_slice(&self.count.to_be_bytes());
        if self.function == FunctionCode::WriteMultipleRegisters {
            pdu.push(self.byte_count);
            pdu.extend_from_slice(&self.data);
        }
        pdu // all fields validated in builder
    }

    /// Decodes a response PDU (function code onwards, CRC already removed).
    ///
    /// Register reads yield exactly the declared number of data bytes. Writes
    /// yield the acknowledgement body (echoed start register and count),
    /// which callers should treat as advisory only.
    pub fn parse_response_pdu(&self, pdu: &[u8]) -> Result<Vec<u8>, ModbusUnitError> {
        if pdu.is_empty() {
            return Err(ModbusUnitError::EmptyResponse);
        }

        let function_code = pdu[0];

        if (function_code & 0x80) != 0 {
            let exception_code = if pdu.len() > 1 { pdu[1] } else { 0 };
            return Err(ModbusUnitError::ModbusException(function_code, exception_code));
        }

        let expected_fc = self.function.value();
        if function_code != expected_fc {
            return Err(ModbusUnitError::UnexpectedFunctionCode(expected_fc, function_code));
        }

        if self.function.is_register_read() {
            self.parse_registers(pdu)
        } else {
            Ok(pdu[1..].to_vec())
        }
    }

    fn parse_registers(&self, pdu: &[u8]) -> Result<Vec<u8>, ModbusUnitError> {
        if pdu.len() < 2 {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let declared = pdu[1] as usize;
        let actual = pdu.len() - 2;
        if declared != actual {
            return Err(ModbusUnitError::ByteCountMismatch { declared, actual });
        }

        Ok(pdu[2..].to_vec())
    }
}
