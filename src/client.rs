//! High-level DF1/DH485 client.
//!
//! `Df1Client` owns the channel configuration, opens the link lazily on
//! the first operation, and exposes the typed data-table operations plus
//! the comm-settings sweep and mode control. Each wire chunk is retried
//! transparently on link-layer failures before the error surfaces.

use crate::address::{parse_address, DataAddress, FileType};
use crate::codec::{decode_typed, encode_string, encode_typed, PlcValue};
use crate::planner::{plan_read, plan_write};
use crate::protocol::error::ProtocolError;
use crate::protocol::frame::builder::{
    build_bit_write, build_change_mode, build_diagnostic_status, build_typed_read,
    build_typed_write, TablePosition,
};
use crate::protocol::frame::{PcccCommand, PcccReply};
use crate::protocol::session::state::SessionEvent;
use crate::protocol::session::{ExchangeMode, LinkConfig, LinkHandle};
use crate::transport::{Connector, SerialConnector};
use crate::types::{
    ChecksumKind, Df1ChannelConfig, Parity, ProcessorFamily, ProcessorMode, ProtocolKind,
    SerialSettings,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Per-chunk retries on top of the link layer's own retransmissions.
const CHUNK_RETRIES: u32 = 2;
/// Tick budget used while probing during the comm-settings sweep.
const DETECT_TICKS: u32 = 3;

/// Client for one SLC 500 / MicroLogix controller on a serial link.
pub struct Df1Client {
    config: Df1ChannelConfig,
    connector: Arc<dyn Connector>,
    link: Option<LinkHandle>,
    processor: Option<ProcessorFamily>,
    events: broadcast::Sender<SessionEvent>,
}

impl Df1Client {
    /// Client over the default serial connector.
    pub fn new(config: Df1ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(SerialConnector))
    }

    /// Client over a custom transport connector; integration tests use
    /// this to run the full stack over in-memory pipes.
    pub fn with_connector(config: Df1ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            connector,
            link: None,
            processor: None,
            events,
        }
    }

    pub fn config(&self) -> &Df1ChannelConfig {
        &self.config
    }

    /// Subscribe to session and progress events. The subscription
    /// survives link reopen cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Change the serial settings; any open link is closed so the next
    /// operation reopens with the new parameters.
    pub fn set_serial(&mut self, serial: SerialSettings) {
        if self.config.serial != serial {
            self.config.serial = serial;
            self.close();
        }
    }

    pub fn set_checksum(&mut self, checksum: ChecksumKind) {
        if self.config.checksum != checksum {
            self.config.checksum = checksum;
            self.close();
        }
    }

    pub fn set_protocol(&mut self, protocol: ProtocolKind) {
        if self.config.protocol != protocol {
            self.config.protocol = protocol;
            self.close();
        }
    }

    pub fn set_my_node(&mut self, node: u8) {
        if self.config.my_node != node {
            self.config.my_node = node;
            self.close();
        }
    }

    pub fn set_target_node(&mut self, node: u8) {
        if self.config.target_node != node {
            self.config.target_node = node;
            self.close();
        }
    }

    pub fn set_async_mode(&mut self, async_mode: bool) {
        self.config.async_mode = async_mode;
    }

    /// Close the link; pending waiters resolve with a link-closed error.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    pub(crate) async fn ensure_link(&mut self) -> Result<LinkHandle, ProtocolError> {
        if let Some(link) = &self.link {
            if !link.is_closed() {
                return Ok(link.clone());
            }
        }
        let io = self.connector.connect(&self.config).await?;
        let link = LinkHandle::spawn_with_events(
            io,
            LinkConfig::from(&self.config),
            self.events.clone(),
        );
        self.link = Some(link.clone());
        Ok(link)
    }

    fn write_mode(&self) -> ExchangeMode {
        if self.config.async_mode {
            ExchangeMode::FireAndForget
        } else {
            ExchangeMode::Full
        }
    }

    /// Probe the controller for its processor family.
    ///
    /// The family decides chunk bounds and directory geometry, so the
    /// typed engine and the directory driver call this before their first
    /// transfer.
    pub async fn get_processor_type(&mut self) -> Result<ProcessorFamily, ProtocolError> {
        let link = self.ensure_link().await?;
        let reply = exchange_with_retry(&link, build_diagnostic_status(), ExchangeMode::Full).await?;
        // The family code sits at byte 9 of the reply body, which is
        // byte 3 of the data section.
        let code = reply
            .data
            .get(3)
            .copied()
            .ok_or(ProtocolError::NoDataReturned)?;
        let family = ProcessorFamily::from_code(code).ok_or_else(|| {
            ProtocolError::MalformedReply(format!("unknown processor family code {code:#04X}"))
        })?;
        tracing::debug!(family = family.description(), "processor identified");
        self.processor = Some(family);
        Ok(family)
    }

    pub(crate) async fn ensure_processor(&mut self) -> Result<ProcessorFamily, ProtocolError> {
        match self.processor {
            Some(family) => Ok(family),
            None => self.get_processor_type().await,
        }
    }

    /// Read `count` typed values starting at a textual address.
    pub async fn read(&mut self, address: &str, count: u16) -> Result<Vec<PlcValue>, ProtocolError> {
        let addr = parse_address(address)?;
        if count == 0 {
            return Err(ProtocolError::EmptyData);
        }
        let family = self.ensure_processor().await?;
        let link = self.ensure_link().await?;

        // Timer/counter fields address one word of each successive
        // element, so they transfer one element at a time.
        if matches!(
            addr.file_type,
            FileType::Timer | FileType::Counter | FileType::Control
        ) && addr.sub_element != 0
        {
            let mut data = Vec::with_capacity(usize::from(count) * 2);
            for i in 0..count {
                let position = TablePosition {
                    file_number: addr.file_number,
                    file_type_code: addr.file_type.code(),
                    element: addr.element + i,
                    sub_element: addr.sub_element,
                };
                let reply =
                    exchange_with_retry(&link, build_typed_read(position, 2), ExchangeMode::Full)
                        .await?;
                data.extend_from_slice(&reply.data);
            }
            return decode_typed(&addr, usize::from(count), &data);
        }

        let total_bytes = match addr.bit {
            Some(bit) => {
                let words = (usize::from(bit) + usize::from(count)).div_ceil(16);
                words * 2
            }
            None => usize::from(count) * addr.bytes_per_element(),
        };

        let code = addr.file_type.code();
        let mut data = Vec::with_capacity(total_bytes);
        for chunk in plan_read(family, code, addr.element, addr.sub_element, total_bytes) {
            let position = TablePosition {
                file_number: addr.file_number,
                file_type_code: code,
                element: chunk.element,
                sub_element: chunk.sub_element,
            };
            let reply = exchange_with_retry(
                &link,
                build_typed_read(position, chunk.bytes),
                ExchangeMode::Full,
            )
            .await?;
            if reply.data.is_empty() {
                return Err(ProtocolError::NoDataReturned);
            }
            data.extend_from_slice(&reply.data);
        }
        decode_typed(&addr, usize::from(count), &data)
    }

    /// Write typed values starting at a textual address.
    pub async fn write(&mut self, address: &str, values: &[PlcValue]) -> Result<(), ProtocolError> {
        let addr = parse_address(address)?;
        if values.is_empty() {
            return Err(ProtocolError::EmptyData);
        }
        self.ensure_processor().await?;
        let link = self.ensure_link().await?;
        let mode = self.write_mode();

        if let Some(bit) = addr.bit {
            return write_bits(&link, &addr, bit, values, mode).await;
        }

        if addr.file_type == FileType::String {
            // String elements are written individually so each lands at
            // its own element boundary.
            for (i, value) in values.iter().enumerate() {
                let PlcValue::Text(text) = value else {
                    return Err(ProtocolError::ValueOutOfRange(format!(
                        "value {value:?} does not match a string file"
                    )));
                };
                let payload = encode_string(text)?;
                let position = TablePosition {
                    file_number: addr.file_number,
                    file_type_code: addr.file_type.code(),
                    element: addr.element + i as u16,
                    sub_element: addr.sub_element,
                };
                exchange_with_retry(&link, build_typed_write(position, &payload), mode).await?;
            }
            return Ok(());
        }

        let payload = encode_typed(&addr, values)?;
        let code = addr.file_type.code();
        let mut offset = 0;
        for chunk in plan_write(code, addr.element, addr.sub_element, payload.len()) {
            let slice = &payload[offset..offset + chunk.bytes];
            offset += chunk.bytes;
            let position = TablePosition {
                file_number: addr.file_number,
                file_type_code: code,
                element: chunk.element,
                sub_element: chunk.sub_element,
            };
            exchange_with_retry(&link, build_typed_write(position, slice), mode).await?;
        }
        Ok(())
    }

    /// Read `total_bytes` raw bytes from an explicit table position;
    /// used by the directory and upload drivers.
    pub async fn read_raw(
        &mut self,
        position: TablePosition,
        total_bytes: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let family = self.ensure_processor().await?;
        let link = self.ensure_link().await?;
        let mut data = Vec::with_capacity(total_bytes);
        for chunk in plan_read(
            family,
            position.file_type_code,
            position.element,
            position.sub_element,
            total_bytes,
        ) {
            let chunk_position = TablePosition {
                element: chunk.element,
                sub_element: chunk.sub_element,
                ..position
            };
            let reply = exchange_with_retry(
                &link,
                build_typed_read(chunk_position, chunk.bytes),
                ExchangeMode::Full,
            )
            .await?;
            if reply.data.is_empty() {
                return Err(ProtocolError::NoDataReturned);
            }
            data.extend_from_slice(&reply.data);
        }
        Ok(data)
    }

    /// Write raw bytes at an explicit table position.
    pub async fn write_raw(
        &mut self,
        position: TablePosition,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyData);
        }
        self.ensure_processor().await?;
        let link = self.ensure_link().await?;
        let mut offset = 0;
        for chunk in plan_write(
            position.file_type_code,
            position.element,
            position.sub_element,
            payload.len(),
        ) {
            let chunk_position = TablePosition {
                element: chunk.element,
                sub_element: chunk.sub_element,
                ..position
            };
            let slice = &payload[offset..offset + chunk.bytes];
            offset += chunk.bytes;
            exchange_with_retry(
                &link,
                build_typed_write(chunk_position, slice),
                ExchangeMode::Full,
            )
            .await?;
        }
        Ok(())
    }

    /// Run one raw PCCC exchange with per-chunk retry; the driver
    /// building blocks use this for single-shot commands.
    pub(crate) async fn exchange(
        &mut self,
        command: PcccCommand,
    ) -> Result<PcccReply, ProtocolError> {
        let link = self.ensure_link().await?;
        exchange_with_retry(&link, command, ExchangeMode::Full).await
    }

    /// Sweep baud, parity and checksum combinations until the controller
    /// answers an ENQ probe.
    ///
    /// The winning combination stays in the configuration. A port-open
    /// failure aborts the sweep immediately; a silent sweep leaves the
    /// last combination configured and reports `NoResponse`.
    pub async fn detect_comm_settings(&mut self) -> Result<(), ProtocolError> {
        for baud_rate in [38_400, 19_200, 9_600] {
            for parity in [Parity::None, Parity::Even] {
                for checksum in [ChecksumKind::Crc, ChecksumKind::Bcc] {
                    self.close();
                    self.config.serial.baud_rate = baud_rate;
                    self.config.serial.parity = parity;
                    self.config.checksum = checksum;
                    let _ = self.events.send(SessionEvent::AutoDetectAttempt {
                        baud_rate,
                        parity,
                        checksum,
                    });
                    // Open failures abort the whole sweep.
                    let link = self.ensure_link().await?;
                    match link.probe(DETECT_TICKS).await {
                        Ok(()) => {
                            tracing::debug!(baud_rate, ?parity, ?checksum, "controller answered probe");
                            return Ok(());
                        }
                        Err(ProtocolError::NoResponse) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        self.close();
        Err(ProtocolError::NoResponse)
    }

    /// Put the controller into program or run mode.
    pub async fn set_mode(&mut self, mode: ProcessorMode) -> Result<(), ProtocolError> {
        let family = self.ensure_processor().await?;
        let link = self.ensure_link().await?;
        exchange_with_retry(&link, build_change_mode(family, mode), ExchangeMode::Full).await?;
        Ok(())
    }
}

async fn write_bits(
    link: &LinkHandle,
    addr: &DataAddress,
    bit: u8,
    values: &[PlcValue],
    mode: ExchangeMode,
) -> Result<(), ProtocolError> {
    for (i, value) in values.iter().enumerate() {
        let global = usize::from(bit) + i;
        let mask = 1u16 << (global % 16);
        let position = TablePosition {
            file_number: addr.file_number,
            file_type_code: addr.file_type.code(),
            element: addr.element + (global / 16) as u16,
            sub_element: addr.sub_element,
        };
        let value_mask = if value.as_bit()? { mask } else { 0 };
        exchange_with_retry(link, build_bit_write(position, mask, value_mask), mode).await?;
    }
    Ok(())
}

async fn exchange_with_retry(
    link: &LinkHandle,
    command: PcccCommand,
    mode: ExchangeMode,
) -> Result<PcccReply, ProtocolError> {
    let mut attempt = 0;
    loop {
        match link.exchange(command.clone(), mode).await {
            Ok(reply) => return Ok(reply),
            Err(e) if e.is_retryable() && attempt < CHUNK_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, error = %e, "retrying exchange");
            }
            Err(e) => return Err(e),
        }
    }
}
