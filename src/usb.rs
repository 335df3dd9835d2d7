use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(100);

/// De-authorizes and re-authorizes whole USB buses so a vanished
/// `/dev/ttyUSB*` bridge gets enumerated again.
#[derive(Clone, Debug)]
pub struct UsbRecovery {
    sysfs_root: PathBuf,
    pause: Duration,
}

impl UsbRecovery {
    pub fn new(sysfs_root: impl Into<PathBuf>, pause: Duration) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            pause,
        }
    }

    pub fn authorized_path(&self, bus: u32) -> PathBuf {
        self.sysfs_root.join(format!("usb{bus}")).join("authorized")
    }

    pub fn reset(&self, buses: &[u32]) -> io::Result<()> {
        for &bus in buses {
            let path = self.authorized_path(bus);
            tracing::info!(bus, "de-authorizing usb bus");
            fs::write(&path, b"0")?;
            thread::sleep(self.pause);
            tracing::info!(bus, "re-authorizing usb bus");
            fs::write(&path, b"1")?;
        }
        Ok(())
    }
}

impl Default for UsbRecovery {
    fn default() -> Self {
        Self::new(SYSFS_USB_DEVICES, DEFAULT_PAUSE)
    }
}
