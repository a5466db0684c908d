//! Byte-transport abstraction for the link layer.
//!
//! The session runs over anything that reads and writes bytes. Production
//! links open a serial port; integration tests hand in one end of an
//! in-memory duplex pipe through a custom [`Connector`].

use crate::protocol::error::ProtocolError;
use crate::types::Df1ChannelConfig;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;

/// Marker trait for session transports.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens a byte transport for the configured channel.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &Df1ChannelConfig) -> Result<Box<dyn Transport>, ProtocolError>;
}

/// Default connector: opens the configured serial port at 8 data bits,
/// one stop bit and no flow control.
#[derive(Debug, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, config: &Df1ChannelConfig) -> Result<Box<dyn Transport>, ProtocolError> {
        let serial = &config.serial;
        let stream = tokio_serial::new(&serial.port, serial.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(serial.parity.into())
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ProtocolError::OpenFailed(format!("{}: {}", serial.port, e)))?;
        tracing::debug!(port = %serial.port, baud = serial.baud_rate, "serial port opened");
        Ok(Box::new(stream))
    }
}
