//! Wire-level enumerations for the NASA protocol.

use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;

/// Start-of-frame marker byte.
pub const START_BYTE: u8 = 0x32;
/// End-of-frame marker byte.
pub const END_BYTE: u8 = 0x34;
/// Minimum number of bytes a complete frame can have (fixed header + CRC + end).
pub const MIN_PACKET_SIZE: usize = 14;
/// Largest payload a single contained message may carry.
pub const MAX_MESSAGE_PAYLOAD: usize = 255;
/// Maximum number of points per read-request chunk (bus behavior).
pub const MAX_READ_CHUNK: usize = 10;

/// Address classes for the source/destination fields of a NASA packet.
///
/// Only the classes the bus actually names are valid here — like the
/// original implementation's strict enum lookup, a byte outside this set is
/// a decode error (`UnknownAddressClass`), not a silently-accepted unknown
/// value. This includes the "gaps" in the 0xB0-0xBF broadcast range that
/// were never assigned a meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, Display)]
#[repr(u8)]
pub enum AddressClass {
    Outdoor = 0x10,
    Htu = 0x11,
    Indoor = 0x20,
    Erv = 0x30,
    Diffuser = 0x35,
    Mcu = 0x38,
    Rmc = 0x40,
    WiredRemote = 0x50,
    Pim = 0x58,
    Sim = 0x59,
    Peak = 0x5A,
    PowerDivider = 0x5B,
    OnOffController = 0x60,
    WiFiKit = 0x62,
    CentralController = 0x65,
    Dms = 0x6A,
    JigTester = 0x80,
    BroadcastSelfLayer = 0xB0,
    BroadcastControlLayer = 0xB1,
    BroadcastSetLayer = 0xB2,
    BroadcastControlAndSetLayer = 0xB3,
    BroadcastModuleLayer = 0xB4,
    BroadcastCsm = 0xB7,
    BroadcastLocalLayer = 0xB8,
    BroadcastCsml = 0xBF,
    Undefined = 0xFF,
}

impl AddressClass {
    /// True for any of the 0xB0-0xBF broadcast layers.
    pub fn is_broadcast(self) -> bool {
        let v: u8 = self.into();
        (0xB0..=0xBF).contains(&v)
    }
}

impl TryFrom<u8> for AddressClass {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        use AddressClass::*;
        Ok(match byte {
            0x10 => Outdoor,
            0x11 => Htu,
            0x20 => Indoor,
            0x30 => Erv,
            0x35 => Diffuser,
            0x38 => Mcu,
            0x40 => Rmc,
            0x50 => WiredRemote,
            0x58 => Pim,
            0x59 => Sim,
            0x5A => Peak,
            0x5B => PowerDivider,
            0x60 => OnOffController,
            0x62 => WiFiKit,
            0x65 => CentralController,
            0x6A => Dms,
            0x80 => JigTester,
            0xB0 => BroadcastSelfLayer,
            0xB1 => BroadcastControlLayer,
            0xB2 => BroadcastSetLayer,
            0xB3 => BroadcastControlAndSetLayer,
            0xB4 => BroadcastModuleLayer,
            0xB7 => BroadcastCsm,
            0xB8 => BroadcastLocalLayer,
            0xBF => BroadcastCsml,
            0xFF => Undefined,
            other => return Err(other),
        })
    }
}

/// Packet-type nibble (high 4 bits of the packed type/data byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    StandBy = 0,
    #[num_enum(default)]
    Normal = 1,
    Gathering = 2,
    Install = 3,
    Download = 4,
}

/// Data-type nibble (low 4 bits of the packed type/data byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum DataType {
    #[num_enum(default)]
    Undefined = 0,
    Read = 1,
    Write = 2,
    Request = 3,
    Notification = 4,
    Response = 5,
    Ack = 6,
    Nack = 7,
}

/// Semantic type of a point definition, taken from the repository file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Enum,
    Var,
    LVar,
    Str,
}

impl std::str::FromStr for PointType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENUM" => Ok(PointType::Enum),
            "VAR" => Ok(PointType::Var),
            "LVAR" => Ok(PointType::LVar),
            "STR" => Ok(PointType::Str),
            _ => Err(()),
        }
    }
}

/// Message-type carried in bits 9-10 of a contained message's number word.
///
/// Determines the payload width: 1, 2, 4 or (for `Structure`) the rest of the
/// packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Enum = 0,
    Var = 1,
    LVar = 2,
    Structure = 3,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(MessageType::Enum),
            1 => Some(MessageType::Var),
            2 => Some(MessageType::LVar),
            3 => Some(MessageType::Structure),
            _ => None,
        }
    }

    /// Fixed payload width in bytes, or `None` for `Structure` (variable length).
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            MessageType::Enum => Some(1),
            MessageType::Var => Some(2),
            MessageType::LVar => Some(4),
            MessageType::Structure => None,
        }
    }
}

/// Synthetic point addresses used for derived metrics. These never arrive on
/// the wire and never re-trigger further derivations.
pub const ADDR_HEAT_OUTPUT: u16 = 0x9999;
pub const ADDR_COP: u16 = 0x9998;
pub const ADDR_TOTAL_COP: u16 = 0x9997;
