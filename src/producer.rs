//! Builds and sends read/write request packets (§4.4).

use crate::config::{LoggingConfig, PollSourceClass};
use crate::constants::{AddressClass, DataType, MessageType, PacketType, MAX_READ_CHUNK};
use crate::error::EhsError;
use crate::packet::{Address, NasaMessage, NasaPacket};
use crate::repository::Repository;
use crate::transport::TransportWriter;
use crate::value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Issues read/write requests against the bus. Cloneable: every clone shares
/// the same packet-number counter and transport writer handle.
#[derive(Clone)]
pub struct Producer {
    repository: Arc<Repository>,
    writer: TransportWriter,
    poll_source_class: AddressClass,
    logging: Arc<LoggingConfig>,
    packet_number: Arc<AtomicU8>,
}

impl Producer {
    pub fn new(
        repository: Arc<Repository>,
        writer: TransportWriter,
        poll_source_class: PollSourceClass,
        logging: Arc<LoggingConfig>,
    ) -> Self {
        let poll_source_class = match poll_source_class {
            PollSourceClass::JigTester => AddressClass::JigTester,
            PollSourceClass::WiFiKit => AddressClass::WiFiKit,
        };
        Self {
            repository,
            writer,
            poll_source_class,
            logging,
            packet_number: Arc::new(AtomicU8::new(0)),
        }
    }

    fn next_packet_number(&self) -> u8 {
        self.packet_number.fetch_add(1, Ordering::Relaxed)
    }

    /// Read a list of points by name, chunked to at most 10 per packet.
    /// Pacing between chunks is the writer actor's job, not this one's.
    pub async fn read(&self, points: &[String]) -> Result<(), EhsError> {
        for chunk in points.chunks(MAX_READ_CHUNK) {
            let mut messages = Vec::with_capacity(chunk.len());
            for name in chunk {
                let Some(def) = self.repository.by_name(name) else {
                    warn!(point = %name, "read requested for unknown point, skipping");
                    continue;
                };
                let bits = ((def.address & 0x0600) >> 9) as u8;
                let width = MessageType::from_bits(bits).and_then(MessageType::fixed_width).unwrap_or(1);
                messages.push(NasaMessage::new(def.address, vec![0u8; width])?);
            }
            if messages.is_empty() {
                continue;
            }
            let packet = NasaPacket {
                source: Address {
                    class: self.poll_source_class,
                    channel: 0,
                    address: 0,
                },
                destination: Address {
                    class: AddressClass::BroadcastSetLayer,
                    channel: 0,
                    address: 0,
                },
                info_flag: false,
                version: 0,
                retry_count: 0,
                packet_type: PacketType::Normal,
                data_type: DataType::Read,
                packet_number: self.next_packet_number(),
                messages,
            };
            debug!(count = chunk.len(), "sending read request chunk");
            self.writer.submit(packet.serialize()).await?;
        }
        Ok(())
    }

    /// Write a single point, then (optionally) confirm by reading it back.
    pub async fn write(
        &self,
        point: &str,
        text_value: &str,
        follow_up_read: bool,
    ) -> Result<(), EhsError> {
        let def = self
            .repository
            .by_name(point)
            .ok_or_else(|| crate::error::ProducerError::UnknownPoint(point.to_string()))?;

        let raw = value::reverse(def, text_value)?;
        let bits = ((def.address & 0x0600) >> 9) as u8;
        let width = MessageType::from_bits(bits).and_then(MessageType::fixed_width).unwrap_or(1);
        let payload = value::encode_raw(raw, width);

        let packet = NasaPacket {
            source: Address {
                class: AddressClass::JigTester,
                channel: 0,
                address: 0,
            },
            destination: Address {
                class: AddressClass::Indoor,
                channel: 0,
                address: 0,
            },
            info_flag: false,
            version: 0,
            retry_count: 0,
            packet_type: PacketType::Normal,
            data_type: DataType::Request,
            packet_number: self.next_packet_number(),
            messages: vec![NasaMessage::new(def.address, payload)?],
        };
        crate::log_at!(self.logging.control_message_level(), point, "sending write request");
        self.writer.submit(packet.serialize()).await?;

        if follow_up_read {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.read(&[point.to_string()]).await?;
        }
        Ok(())
    }
}
