//! Framing, CRC and parse/serialize of NASA packets and their contained messages.

use crate::constants::{
    AddressClass, DataType, MessageType, PacketType, END_BYTE, MAX_MESSAGE_PAYLOAD,
    MIN_PACKET_SIZE, START_BYTE,
};
use crate::error::CodecError;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_XMODEM};

/// CRC-16/XMODEM: poly 0x1021, init 0x0000 — the variant the NASA bus calls
/// its CRC-CCITT.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Source or destination field of a packet: a class, a channel and a
/// per-channel address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub class: AddressClass,
    pub channel: u8,
    pub address: u8,
}

/// One point-level datum contained in a packet.
///
/// `address` is the full 16-bit message-number word as it appears on the
/// wire — the repository file's point addresses already bake in the
/// message-type bits, so the number is never masked down before lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasaMessage {
    pub address: u16,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl NasaMessage {
    pub fn new(address: u16, payload: Vec<u8>) -> Result<Self, CodecError> {
        let bits = ((address & 0x0600) >> 9) as u8;
        let message_type =
            MessageType::from_bits(bits).ok_or(CodecError::UnknownMessageType(bits))?;
        Ok(Self {
            address,
            message_type,
            payload,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u16(self.address);
        out.put_slice(&self.payload);
    }
}

/// A fully parsed NASA packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasaPacket {
    pub source: Address,
    pub destination: Address,
    pub info_flag: bool,
    pub version: u8,
    pub retry_count: u8,
    pub packet_type: PacketType,
    pub data_type: DataType,
    pub packet_number: u8,
    pub messages: Vec<NasaMessage>,
}

impl NasaPacket {
    /// Parse a single, already-framed packet (the bytes between and
    /// including the start/end markers).
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < MIN_PACKET_SIZE {
            return Err(CodecError::TooShort {
                expected: MIN_PACKET_SIZE,
                actual: buf.len(),
            });
        }

        let total = buf.len();
        let body_end = total - 3; // excludes CRC(2) + end byte(1)

        let source_class_byte = buf[3];
        let dest_class_byte = buf[6];
        let source = Address {
            class: class_from_byte(source_class_byte)?,
            channel: buf[4],
            address: buf[5],
        };
        let destination = Address {
            class: class_from_byte(dest_class_byte)?,
            channel: buf[7],
            address: buf[8],
        };

        let info_byte = buf[9];
        let info_flag = (info_byte & 0x80) >> 7 == 1;
        let version = (info_byte & 0x60) >> 5;
        let retry_count = (info_byte & 0x18) >> 3;

        let type_data_byte = buf[10];
        let packet_type = PacketType::from((type_data_byte & 0xF0) >> 4);
        let data_type = DataType::from(type_data_byte & 0x0F);

        let packet_number = buf[11];
        let capacity = buf[12];

        let messages = extract_messages(&buf[13..body_end], capacity)?;
        if messages.len() != capacity as usize {
            return Err(CodecError::TrailingBytes(
                capacity as usize - messages.len(),
            ));
        }

        let computed_crc = CRC16.checksum(&buf[3..body_end]);
        let stored_crc = BigEndian::read_u16(&buf[body_end..body_end + 2]);
        if computed_crc != stored_crc {
            return Err(CodecError::CrcMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        Ok(NasaPacket {
            source,
            destination,
            info_flag,
            version,
            retry_count,
            packet_type,
            data_type,
            packet_number,
            messages,
        })
    }

    /// Serialize back to wire bytes. Size and CRC are (re-)computed.
    ///
    /// Serializing a structure (type-3) message is unsupported: outgoing
    /// traffic never carries one.
    pub fn serialize(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u8(self.source.class.into());
        body.put_u8(self.source.channel);
        body.put_u8(self.source.address);
        body.put_u8(self.destination.class.into());
        body.put_u8(self.destination.channel);
        body.put_u8(self.destination.address);

        let info_byte =
            ((self.info_flag as u8) << 7) | ((self.version & 0x3) << 5) | ((self.retry_count & 0x3) << 3);
        body.put_u8(info_byte);

        let packet_type_val: u8 = self.packet_type.into();
        let data_type_val: u8 = self.data_type.into();
        body.put_u8((packet_type_val << 4) | (data_type_val & 0x0F));
        body.put_u8(self.packet_number);
        body.put_u8(self.messages.len() as u8);

        for msg in &self.messages {
            debug_assert!(
                msg.message_type != MessageType::Structure,
                "serializing a structure message is not supported"
            );
            msg.encode(&mut body);
        }

        let mut out = BytesMut::with_capacity(body.len() + 6);
        out.put_u8(START_BYTE);
        // size excludes the start byte and the end byte (I2).
        let total_on_wire = 1 + 2 + body.len() + 2 + 1;
        let size = (total_on_wire - 2) as u16;
        out.put_u16(size);
        out.put_slice(&body);
        let crc = CRC16.checksum(&body);
        out.put_u16(crc);
        out.put_u8(END_BYTE);
        out.freeze()
    }
}

fn class_from_byte(byte: u8) -> Result<AddressClass, CodecError> {
    AddressClass::try_from(byte).map_err(CodecError::UnknownAddressClass)
}

fn extract_messages(region: &[u8], capacity: u8) -> Result<Vec<NasaMessage>, CodecError> {
    let mut messages = Vec::with_capacity(capacity as usize);
    let mut rest = region;

    for _ in 0..capacity {
        if rest.len() < 2 {
            break;
        }
        let address = BigEndian::read_u16(&rest[0..2]);
        rest = &rest[2..];

        let type_bits = ((address & 0x0600) >> 9) as u8;
        let message_type =
            MessageType::from_bits(type_bits).ok_or(CodecError::UnknownMessageType(type_bits))?;

        let payload_len = match message_type.fixed_width() {
            Some(width) => width,
            None => {
                if capacity != 1 {
                    return Err(CodecError::StructureRequiresCapacityOne(capacity));
                }
                rest.len()
            }
        };

        if payload_len > MAX_MESSAGE_PAYLOAD {
            return Err(CodecError::OversizePayload(payload_len));
        }
        if rest.len() < payload_len {
            break;
        }

        let payload = rest[..payload_len].to_vec();
        rest = &rest[payload_len..];
        messages.push(NasaMessage {
            address,
            message_type,
            payload,
        });
    }

    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes(rest.len()));
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    #[test]
    fn parses_s1_vector() {
        let bytes = hex("32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B8 CE 34");
        let packet = NasaPacket::parse(&bytes).expect("S1 vector should parse");
        assert_eq!(packet.source.class, AddressClass::Outdoor);
        assert_eq!(packet.messages.len(), 2);
        assert_eq!(packet.messages[0].address, 0x8237);
        assert_eq!(packet.messages[1].address, 0x8238);
    }

    #[test]
    fn rejects_s2_vector_on_crc_mismatch() {
        let bytes = hex("32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B9 CE 34");
        let err = NasaPacket::parse(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::CrcMismatch { .. }));
    }

    #[test]
    fn rejects_too_short() {
        let bytes = hex("32 00 16 10 00");
        let err = NasaPacket::parse(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::TooShort { .. }));
    }

    #[test]
    fn structure_message_requires_capacity_one() {
        // address with type bits = 0b11 (structure), capacity 2
        let mut region = Vec::new();
        region.extend_from_slice(&0x8600u16.to_be_bytes());
        region.extend_from_slice(&[1, 2, 3]);
        region.extend_from_slice(&0x0000u16.to_be_bytes());
        region.push(9);
        let err = extract_messages(&region, 2).unwrap_err();
        assert!(matches!(err, CodecError::StructureRequiresCapacityOne(2)));
    }

    #[test]
    fn roundtrip_serialize_parse() {
        let packet = NasaPacket {
            source: Address {
                class: AddressClass::JigTester,
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
            packet_number: 5,
            messages: vec![NasaMessage::new(0x4247, vec![0, 0]).unwrap()],
        };
        let bytes = packet.serialize();
        let reparsed = NasaPacket::parse(&bytes).expect("roundtrip should parse");
        assert_eq!(reparsed, packet);
    }
}
