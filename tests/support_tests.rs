use std::fs;
use std::thread;
use std::time::Duration;

use synse_modbus::{
    ModbusRtuTransport, ModbusTransportError, Parity, SerialPortLink, SerialSettings,
    TransportConfig, UsbRecovery,
};

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_transport_defaults() {
        let config = TransportConfig::default();

        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.backoff, Duration::from_millis(500));
        assert_eq!(config.max_read, 1024);
    }

    #[test]
    fn test_serial_settings_from_json() {
        let settings: SerialSettings = serde_json::from_str(
            r#"{ "port": "/dev/ttyUSB3", "parity": "even", "timeout_ms": 400 }"#,
        )
        .unwrap();

        assert_eq!(
            settings,
            SerialSettings::new("/dev/ttyUSB3")
                .with_baud_rate(19200)
                .with_parity(Parity::Even)
                .with_timeout(Duration::from_millis(400))
        );
    }

    #[test]
    fn test_serial_settings_defaults_from_json() {
        let settings: SerialSettings =
            serde_json::from_str(r#"{ "port": "/dev/ttyUSB0", "baud_rate": 115200 }"#).unwrap();

        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_serial_settings_require_port() {
        let result = serde_json::from_str::<SerialSettings>(r#"{ "baud_rate": 9600 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_transport_config_partial_json() {
        let config: TransportConfig =
            serde_json::from_str(r#"{ "max_attempts": 3, "backoff_ms": 0 }"#).unwrap();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff, Duration::ZERO);
        assert_eq!(config.max_read, 1024);
    }

    #[test]
    fn test_unknown_parity_rejected() {
        let result = serde_json::from_str::<SerialSettings>(r#"{ "port": "x", "parity": "mark" }"#);
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod serial_tests {
    use super::*;

    const MISSING_PORT: &str = "/dev/synse-modbus-test-missing";

    #[test]
    fn test_missing_device_node_not_present() {
        assert!(!SerialSettings::new(MISSING_PORT).device_present());
    }

    #[test]
    fn test_existing_device_node_present() {
        let node = tempfile::NamedTempFile::new().unwrap();
        let settings = SerialSettings::new(node.path().to_string_lossy());

        assert!(settings.device_present());
    }

    #[test]
    fn test_open_missing_port_fails() {
        assert!(SerialPortLink::open(SerialSettings::new(MISSING_PORT)).is_err());
    }

    #[test]
    fn test_transport_open_failure_is_not_retryable() {
        let result =
            ModbusRtuTransport::open(SerialSettings::new(MISSING_PORT), TransportConfig::default());

        match result {
            Err(err @ ModbusTransportError::Open(_)) => assert!(!err.is_retryable()),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing port opened"),
        }
    }
}

#[cfg(test)]
mod usb_tests {
    use super::*;

    fn fake_sysfs(buses: &[u32]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for bus in buses {
            let dir = root.path().join(format!("usb{bus}"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("authorized"), "1").unwrap();
        }
        root
    }

    #[test]
    fn test_authorized_path() {
        let recovery = UsbRecovery::default();
        assert_eq!(
            recovery.authorized_path(2).to_str(),
            Some("/sys/bus/usb/devices/usb2/authorized")
        );
    }

    #[test]
    fn test_reset_reauthorizes_every_bus() {
        let root = fake_sysfs(&[1, 2]);
        let recovery = UsbRecovery::new(root.path(), Duration::ZERO);

        recovery.reset(&[1, 2]).unwrap();

        for bus in [1, 2] {
            let value = fs::read_to_string(recovery.authorized_path(bus)).unwrap();
            assert_eq!(value, "1");
        }
    }

    #[test]
    fn test_reset_deauthorizes_before_reauthorizing() {
        let root = fake_sysfs(&[3]);
        let recovery = UsbRecovery::new(root.path(), Duration::from_millis(400));
        let path = recovery.authorized_path(3);

        // sample the file while reset is inside its pause
        let sampler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            fs::read_to_string(path).unwrap()
        });
        recovery.reset(&[3]).unwrap();

        assert_eq!(sampler.join().unwrap(), "0");
        assert_eq!(fs::read_to_string(recovery.authorized_path(3)).unwrap(), "1");
    }

    #[test]
    fn test_reset_missing_bus_fails() {
        let root = fake_sysfs(&[1]);
        let recovery = UsbRecovery::new(root.path(), Duration::ZERO);

        assert!(recovery.reset(&[1, 7]).is_err());
    }

    #[test]
    fn test_reset_nothing() {
        let root = fake_sysfs(&[]);
        let recovery = UsbRecovery::new(root.path(), Duration::ZERO);

        assert!(recovery.reset(&[]).is_ok());
    }
}
