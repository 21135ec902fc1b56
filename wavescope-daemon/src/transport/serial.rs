//! Serial port adapter over tokio-serial.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::logging::prelude::*;

use super::{Transport, TransportConfig, TransportError};

/// The one production transport: a native serial port opened through
/// tokio-serial.
#[derive(Debug, Default)]
pub struct SerialTransport {
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.close();

        let stream = tokio_serial::new(config.port_name.as_str(), config.baud_rate)
            .data_bits(data_bits(config.data_bits)?)
            .stop_bits(stop_bits(config.stop_bits)?)
            .parity(parity(config.parity)?)
            .open_native_async()?;

        debug!(
            port = %config.port_name,
            baud = config.baud_rate,
            "Serial port opened"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let written = stream.write(bytes).await?;
        stream.flush().await?;
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        Ok(stream.read(buf).await?)
    }
}

fn data_bits(value: u8) -> Result<DataBits, TransportError> {
    match value {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(TransportError::UnsupportedConfig {
            field: "data_bits",
            value,
        }),
    }
}

fn stop_bits(value: u8) -> Result<StopBits, TransportError> {
    match value {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(TransportError::UnsupportedConfig {
            field: "stop_bits",
            value,
        }),
    }
}

fn parity(value: u8) -> Result<Parity, TransportError> {
    match value {
        0 => Ok(Parity::None),
        1 => Ok(Parity::Odd),
        2 => Ok(Parity::Even),
        _ => Err(TransportError::UnsupportedConfig {
            field: "parity",
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_mappings_cover_supported_values() {
        assert_eq!(data_bits(8).unwrap(), DataBits::Eight);
        assert_eq!(stop_bits(2).unwrap(), StopBits::Two);
        assert_eq!(parity(0).unwrap(), Parity::None);
    }

    #[test]
    fn unsupported_config_values_are_rejected() {
        assert!(matches!(
            data_bits(9),
            Err(TransportError::UnsupportedConfig { field: "data_bits", .. })
        ));
        assert!(matches!(
            stop_bits(3),
            Err(TransportError::UnsupportedConfig { field: "stop_bits", .. })
        ));
        assert!(matches!(
            parity(7),
            Err(TransportError::UnsupportedConfig { field: "parity", .. })
        ));
    }

    #[tokio::test]
    async fn io_on_closed_transport_fails() {
        let mut transport = SerialTransport::new();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.write(b"x").await,
            Err(TransportError::NotOpen)
        ));

        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.read(&mut buf).await,
            Err(TransportError::NotOpen)
        ));

        // close() on a never-opened transport is a no-op
        transport.close();
    }
}
