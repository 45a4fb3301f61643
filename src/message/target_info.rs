//! Target information: the AV_PAIR list a server attaches to its Challenge message.
//!
//! Each entry is a 16-bit type, a 16-bit length and that many bytes of data. The list ends with an
//! entry of type [`TargetInfoType::EndOfList`].


use crate::message::{utf16_le_bytes_to_string, ParsingError, StoringError};
use crate::hashes::utf16_le_bytes;


/// The bit in the [`TargetInfoType::Flags`] value announcing that the Authenticate message carries
/// a MIC.
pub const AV_FLAG_MIC_PRESENT: u32 = 0x0000_0002;


/// The type of additional target information included in the Challenge message.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TargetInfoType {
    EndOfList,
    NbComputerName,
    NbDomainName,
    DnsComputerName,
    DnsDomainName,
    DnsTreeName,
    Flags,
    Timestamp,
    SingleHost,
    TargetName,
    ChannelBindings,
    Unknown(u16),
}
impl From<TargetInfoType> for u16 {
    fn from(t: TargetInfoType) -> Self {
        match t {
            TargetInfoType::EndOfList => 0x0000,
            TargetInfoType::NbComputerName => 0x0001,
            TargetInfoType::NbDomainName => 0x0002,
            TargetInfoType::DnsComputerName => 0x0003,
            TargetInfoType::DnsDomainName => 0x0004,
            TargetInfoType::DnsTreeName => 0x0005,
            TargetInfoType::Flags => 0x0006,
            TargetInfoType::Timestamp => 0x0007,
            TargetInfoType::SingleHost => 0x0008,
            TargetInfoType::TargetName => 0x0009,
            TargetInfoType::ChannelBindings => 0x000A,
            TargetInfoType::Unknown(w) => w,
        }
    }
}
impl From<u16> for TargetInfoType {
    fn from(w: u16) -> Self {
        match w {
            0x0000 => TargetInfoType::EndOfList,
            0x0001 => TargetInfoType::NbComputerName,
            0x0002 => TargetInfoType::NbDomainName,
            0x0003 => TargetInfoType::DnsComputerName,
            0x0004 => TargetInfoType::DnsDomainName,
            0x0005 => TargetInfoType::DnsTreeName,
            0x0006 => TargetInfoType::Flags,
            0x0007 => TargetInfoType::Timestamp,
            0x0008 => TargetInfoType::SingleHost,
            0x0009 => TargetInfoType::TargetName,
            0x000A => TargetInfoType::ChannelBindings,
            other => TargetInfoType::Unknown(other),
        }
    }
}

/// An entry of additional target information included in the Challenge message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetInfoEntry {
    pub entry_type: TargetInfoType,
    pub data: Vec<u8>,
}
impl TargetInfoEntry {
    /// Serializes the target info entry into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let entry_type_u16: u16 = self.entry_type.into();
        let bytes_len = u16::try_from(self.data.len())
            .or(Err(StoringError::BufferTooLong { length: self.data.len() }))?;

        let mut ret = Vec::with_capacity(4 + self.data.len());
        ret.extend_from_slice(&entry_type_u16.to_le_bytes());
        ret.extend_from_slice(&bytes_len.to_le_bytes());
        ret.extend_from_slice(&self.data);
        Ok(ret)
    }

    /// Attempts to deserialize a target info entry from the given byte slice. If successful,
    /// returns the deserialized target info entry as well as any bytes remaining in the slice (that
    /// are not part of the freshly deserialized target info entry).
    ///
    /// `position` is only used for error reporting.
    pub fn try_from_bytes(bytes: &[u8], position: usize) -> Result<(Self, &[u8]), ParsingError> {
        if bytes.len() < 4 {
            return Err(ParsingError::TargetInfoTruncated { position, expected_at_least: 4, obtained: bytes.len() });
        }

        let entry_type_u16 = u16::from_le_bytes([bytes[0], bytes[1]]);
        let length = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
        if length + 4 > bytes.len() {
            return Err(ParsingError::TargetInfoTruncated { position, expected_at_least: length + 4, obtained: bytes.len() });
        }

        let entry = Self {
            entry_type: entry_type_u16.into(),
            data: Vec::from(&bytes[4..4+length]),
        };
        Ok((entry, &bytes[4+length..]))
    }

    /// Attempts to convert the data within this target info entry into a string.
    ///
    /// Target information strings are always UTF-16, even if the flags select the OEM encoding.
    pub fn to_string(&self) -> Result<String, ParsingError> {
        utf16_le_bytes_to_string(&self.data)
    }

    /// Creates a target info entry from an entry type and a string.
    pub fn from_string(entry_type: TargetInfoType, string: &str) -> Self {
        Self {
            entry_type,
            data: utf16_le_bytes(string),
        }
    }
}


/// Parses an AV_PAIR list up to its terminator. The terminator itself is not returned.
///
/// A list that ends without a terminator is accepted.
pub fn parse_target_info(mut bytes: &[u8]) -> Result<Vec<TargetInfoEntry>, ParsingError> {
    let total_len = bytes.len();
    let mut entries = Vec::new();
    while !bytes.is_empty() {
        let (entry, rest) = TargetInfoEntry::try_from_bytes(bytes, total_len - bytes.len())?;
        if entry.entry_type == TargetInfoType::EndOfList {
            break;
        }
        entries.push(entry);
        bytes = rest;
    }
    Ok(entries)
}

/// Serializes an AV_PAIR list, appending the terminator. An empty list serializes to no bytes at
/// all.
pub fn target_info_to_bytes(entries: &[TargetInfoEntry]) -> Result<Vec<u8>, StoringError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let mut ret = Vec::new();
    for entry in entries {
        ret.append(&mut entry.to_bytes()?);
    }
    ret.extend_from_slice(&[0, 0, 0, 0]);
    Ok(ret)
}
