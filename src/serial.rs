use std::io::{self, Read, Write};
use std::time::Instant;

use serialport::{DataBits, FlowControl, SerialPort, StopBits};

use crate::config::SerialSettings;

/// Byte-level access to a half-duplex serial line.
///
/// One request may be outstanding at a time; callers sharing a physical bus
/// must serialize exchanges themselves.
pub trait SerialLink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Reads at most `max` bytes, returning whatever arrived before the read
    /// timeout. An empty buffer means nothing was received.
    fn read_response(&mut self, max: usize) -> io::Result<Vec<u8>>;

    /// Closes the current handle, then opens a new one with the same
    /// settings. On failure the link stays closed.
    fn reopen(&mut self) -> io::Result<()>;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        (**self).write_frame(frame)
    }

    fn read_response(&mut self, max: usize) -> io::Result<Vec<u8>> {
        (**self).read_response(max)
    }

    fn reopen(&mut self) -> io::Result<()> {
        (**self).reopen()
    }
}

/// [`SerialLink`] backed by an OS serial port.
pub struct SerialPortLink {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    pub fn open(settings: SerialSettings) -> Result<Self, serialport::Error> {
        let port = open_port(&settings)?;
        tracing::info!(port = %settings.port, baud = settings.baud_rate, "serial port open");
        Ok(Self {
            settings,
            port: Some(port),
        })
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Whether the device node still exists.
    pub fn device_present(&self) -> bool {
        self.settings.device_present()
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl SerialLink for SerialPortLink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let port = self.port_mut()?;
        port.write_all(frame)?;
        port.flush()
    }

    fn read_response(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.settings.timeout;
        let port = self.port_mut()?;
        let mut buffer = vec![0u8; max];
        let mut filled = 0;

        while filled < max {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            port.set_timeout(deadline - now)?;
            match port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }

    fn reopen(&mut self) -> io::Result<()> {
        // the old handle must be released before the port can be opened again
        self.port = None;
        let port = open_port(&self.settings)?;
        tracing::debug!(port = %self.settings.port, "serial port reopened");
        self.port = Some(port);
        Ok(())
    }
}

fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    serialport::new(settings.port.as_str(), settings.baud_rate)
        .parity(settings.parity.into())
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.timeout)
        .open()
}
