//! Serial-port device for real hardware.
//!
//! Inverters expose the protocol on an RS-232 or USB-serial port, usually at
//! 2400 baud, 8 data bits, no parity, one stop bit.

use crate::{Device, DeviceError, ReadOutcome};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Default inverter line speed
pub const DEFAULT_BAUD_RATE: u32 = 2400;

/// Parity setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Line settings for [`SerialDevice::open`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed in baud
    pub baud_rate: u32,
    /// Data bits per character (5..=8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    fn data_bits(&self) -> Result<serialport::DataBits, DeviceError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(DeviceError::InvalidSetting(format!(
                "data bits must be 5..=8, got {}",
                other
            ))),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits, DeviceError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            other => Err(DeviceError::InvalidSetting(format!(
                "stop bits must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

/// Serial port speaking to an inverter
pub struct SerialDevice {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialDevice {
    /// Open `path` with the given line settings
    pub fn open(path: &str, settings: &SerialSettings) -> Result<Self, DeviceError> {
        if settings.baud_rate == 0 {
            return Err(DeviceError::InvalidSetting(
                "baud rate must be greater than zero".to_string(),
            ));
        }

        let port = serialport::new(path, settings.baud_rate)
            .data_bits(settings.data_bits()?)
            .stop_bits(settings.stop_bits()?)
            .parity(settings.parity.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()?;

        info!(
            "Opened serial port {} at {} baud ({}{}{})",
            path,
            settings.baud_rate,
            settings.data_bits,
            match settings.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            settings.stop_bits
        );

        Ok(Self {
            name: path.to_string(),
            port: Some(port),
        })
    }

    /// Port path
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "serial port is closed")
        })
    }
}

impl Device for SerialDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let port = self.port()?;
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let available = port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(ReadOutcome::Data(0));
        }

        let len = available.min(buf.len());
        match port.read(&mut buf[..len]) {
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(ReadOutcome::Data(0)),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(buf)?;
        port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 2400);
        assert_eq!(settings.data_bits().unwrap(), serialport::DataBits::Eight);
        assert_eq!(settings.stop_bits().unwrap(), serialport::StopBits::One);
        assert_eq!(settings.parity, Parity::None);
    }

    #[test]
    fn test_rejects_bad_line_settings() {
        let settings = SerialSettings {
            data_bits: 9,
            ..Default::default()
        };
        assert!(matches!(
            settings.data_bits(),
            Err(DeviceError::InvalidSetting(_))
        ));

        let settings = SerialSettings {
            stop_bits: 3,
            ..Default::default()
        };
        assert!(settings.stop_bits().is_err());

        let settings = SerialSettings {
            baud_rate: 0,
            ..Default::default()
        };
        assert!(matches!(
            SerialDevice::open("/dev/null", &settings),
            Err(DeviceError::InvalidSetting(_))
        ));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: SerialSettings =
            serde_json::from_str(r#"{"baud_rate": 9600, "parity": "odd"}"#).unwrap();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.stop_bits, 1);
        assert_eq!(settings.parity, Parity::Odd);

        assert!(serde_json::from_str::<SerialSettings>(r#"{"parity": "mark"}"#).is_err());
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialDevice::open(
            "/dev/this-port-does-not-exist",
            &SerialSettings::default(),
        );
        assert!(result.is_err());
    }
}
