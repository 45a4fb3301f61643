//! NTLM messages and their binary representation.
//!
//! Every message starts with the magic value `NTLMSSP\0` and a 32-bit message type. Variable-length
//! fields live in a payload area after the fixed header and are referenced from the header through
//! [`SecurityBuffer`] descriptors whose offsets count from the first byte of the message.


pub mod authenticate;
pub mod challenge;
pub mod negotiate;
pub mod target_info;


use std::fmt;

use crate::Flags;
use crate::hashes::utf16_le_bytes;
use crate::oem::{oem_string_to_rust, rust_string_to_oem};

pub use crate::message::authenticate::AuthenticateMessage;
pub use crate::message::challenge::ChallengeMessage;
pub use crate::message::negotiate::NegotiateMessage;
pub use crate::message::target_info::{TargetInfoEntry, TargetInfoType};


/// The magic value at the start of every NTLMSSP data packet.
pub const NTLMSSP_MAGIC: [u8; 8] = *b"NTLMSSP\0";

pub const NEGOTIATE_MESSAGE_TYPE: u32 = 0x0000_0001;
pub const CHALLENGE_MESSAGE_TYPE: u32 = 0x0000_0002;
pub const AUTHENTICATE_MESSAGE_TYPE: u32 = 0x0000_0003;


/// An error that may occur while parsing existing NTLM packets.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ParsingError {
    /// The message is shorter than its fixed header.
    MessageTooShort { expected_min_len: usize, obtained_len: usize },

    /// The magic value does not match the expected one.
    InvalidSignature { expected: [u8; 8], obtained: Vec<u8> },

    /// The message is of a different type than expected.
    InvalidMessageType { expected: u32, obtained: u32 },

    /// An internal item has a different length than expected.
    ItemLengthMismatch { expected: usize, obtained: usize },

    /// A security buffer points outside of the message.
    BufferOutOfRange { offset: u32, length: u16, message_len: usize },

    /// An AV_PAIR in the target information extends past the end of the buffer.
    TargetInfoTruncated { position: usize, expected_at_least: usize, obtained: usize },

    /// An internal item's length is not divisible by an expected divisor.
    ItemLengthNotDivisible { expected_divisor: usize, obtained_length: usize },

    /// A byte string cannot be decoded using the OEM encoding.
    InvalidOemEncoding { value: Vec<u8> },

    /// A string of 16-bit characters could not be decoded as UTF-16.
    InvalidUtf16 { value: Vec<u16> },

    /// Neither Unicode nor OEM encoding was selected.
    NeitherUnicodeNorOem,
}
impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooShort { expected_min_len, obtained_len }
                => write!(f, "message too short (expected at least {} bytes, obtained {})", expected_min_len, obtained_len),
            Self::InvalidSignature { expected, obtained }
                => write!(f, "mismatched magic (expected {:?}, obtained {:?})", expected, obtained),
            Self::InvalidMessageType { expected, obtained }
                => write!(f, "wrong message type (expected {}, obtained {})", expected, obtained),
            Self::ItemLengthMismatch { expected, obtained }
                => write!(f, "insufficient length for an internal item (expected {:?}, obtained {:?})", expected, obtained),
            Self::BufferOutOfRange { offset, length, message_len }
                => write!(f, "buffer of {} bytes at offset {} exceeds the message ({} bytes)", length, offset, message_len),
            Self::TargetInfoTruncated { position, expected_at_least, obtained }
                => write!(f, "target information truncated at position {} (expected at least {} bytes, obtained {})", position, expected_at_least, obtained),
            Self::ItemLengthNotDivisible { expected_divisor, obtained_length }
                => write!(f, "item length {} not divisible by {}", obtained_length, expected_divisor),
            Self::InvalidOemEncoding { value }
                => write!(f, "failed to decode value with the OEM encoding: {:?}", value),
            Self::InvalidUtf16 { value }
                => write!(f, "failed to decode value as UTF-16: {:?}", value),
            Self::NeitherUnicodeNorOem
                => write!(f, "neither Unicode nor OEM encoding was selected"),
        }
    }
}
impl std::error::Error for ParsingError {
}

/// An error that may occur while writing an NTLM packet.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StoringError {
    /// The string cannot be encoded using the OEM encoding.
    NonOemEncodable { string: String },

    /// Neither Unicode nor OEM encoding was selected.
    NeitherUnicodeNorOem,

    /// A field does not fit into a security buffer.
    BufferTooLong { length: usize },
}
impl fmt::Display for StoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonOemEncodable { string }
                => write!(f, "failed to encode {:?} using OEM encoding", string),
            Self::NeitherUnicodeNorOem
                => write!(f, "neither Unicode nor OEM encoding was selected"),
            Self::BufferTooLong { length }
                => write!(f, "{} bytes do not fit into a security buffer", length),
        }
    }
}
impl std::error::Error for StoringError {
}


/// An NTLM message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Message {
    Negotiate(NegotiateMessage),
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),
    Other(u32, Vec<u8>),
}
impl Message {
    /// Returns the 32-bit message number identifying the type of this message.
    pub fn message_number(&self) -> u32 {
        match self {
            Self::Negotiate(_) => NEGOTIATE_MESSAGE_TYPE,
            Self::Challenge(_) => CHALLENGE_MESSAGE_TYPE,
            Self::Authenticate(_) => AUTHENTICATE_MESSAGE_TYPE,
            Self::Other(t, _data) => *t,
        }
    }

    /// Serializes the NTLM message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        match self {
            Message::Negotiate(t1m) => t1m.to_bytes(),
            Message::Challenge(t2m) => t2m.to_bytes(),
            Message::Authenticate(t3m) => t3m.to_bytes(),
            Message::Other(msg_num, data) => {
                let mut buf = Vec::with_capacity(12 + data.len());
                buf.extend_from_slice(&NTLMSSP_MAGIC);
                buf.extend_from_slice(&msg_num.to_le_bytes());
                buf.extend_from_slice(data);
                Ok(buf)
            },
        }
    }
}
impl TryFrom<&[u8]> for Message {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let message_type = check_header(value, 12, None)?;
        match message_type {
            NEGOTIATE_MESSAGE_TYPE => NegotiateMessage::try_from(value)
                .map(Message::Negotiate),
            CHALLENGE_MESSAGE_TYPE => ChallengeMessage::try_from(value)
                .map(Message::Challenge),
            AUTHENTICATE_MESSAGE_TYPE => AuthenticateMessage::try_from(value)
                .map(Message::Authenticate),
            other_type => Ok(Message::Other(other_type, Vec::from(&value[12..]))),
        }
    }
}


/// A structure representing the version of an operating system as well as the NTLM revision used.
///
/// The three reserved bytes between the build number and the revision are not kept: they are
/// ignored when parsing and written as zero.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OsVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub ntlm_revision: u8,
}
impl OsVersion {
    /// The version announced by this client: Windows 10 build 18362, NTLM revision 15.
    pub const CLIENT: OsVersion = OsVersion {
        major_version: 10,
        minor_version: 0,
        build_number: 18362,
        ntlm_revision: 15,
    };

    /// Serializes the OS version structure into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let build = self.build_number.to_le_bytes();
        [self.major_version, self.minor_version, build[0], build[1], 0, 0, 0, self.ntlm_revision]
    }
}
impl TryFrom<&[u8]> for OsVersion {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 8] = fixed_bytes(value, 0)?;
        Ok(OsVersion {
            major_version: bytes[0],
            minor_version: bytes[1],
            build_number: u16::from_le_bytes([bytes[2], bytes[3]]),
            ntlm_revision: bytes[7],
        })
    }
}


/// An NTLM security buffer, pointing to data contained later in the message.
///
/// Descriptors are only created by parsing or by [`MessageWriter`], which derives the offset from
/// the payload written so far.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecurityBuffer {
    length: u16,
    capacity: u16,
    offset: u32,
}
impl SecurityBuffer {
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// The offset of the data from the start of the message.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Serializes the security buffer into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.capacity.to_le_bytes());
        ret[4..8].copy_from_slice(&self.offset.to_le_bytes());
        ret
    }

    /// Extracts the data this security buffer points to from the whole message.
    pub fn apply_to_message<'a>(&self, message: &'a [u8]) -> Result<&'a [u8], ParsingError> {
        if self.length == 0 {
            return Ok(&[]);
        }

        let out_of_range = ParsingError::BufferOutOfRange {
            offset: self.offset,
            length: self.length,
            message_len: message.len(),
        };
        let start = usize::try_from(self.offset)
            .or(Err(out_of_range.clone()))?;
        let end = start.checked_add(usize::from(self.length))
            .ok_or_else(|| out_of_range.clone())?;
        message.get(start..end)
            .ok_or(out_of_range)
    }
}
impl TryFrom<&[u8]> for SecurityBuffer {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 8 {
            return Err(ParsingError::ItemLengthMismatch { expected: 8, obtained: value.len() });
        }
        Ok(Self {
            length: u16::from_le_bytes([value[0], value[1]]),
            capacity: u16::from_le_bytes([value[2], value[3]]),
            offset: u32::from_le_bytes([value[4], value[5], value[6], value[7]]),
        })
    }
}


/// Writes an NTLM message: the fixed header in order, with variable-length fields collected in a
/// payload area that is appended after the header.
pub(crate) struct MessageWriter {
    header: Vec<u8>,
    payload: Vec<u8>,
    header_len: usize,
}
impl MessageWriter {
    /// Starts a message of the given type whose fixed header (magic and type included) is
    /// `header_len` bytes long.
    pub fn new(message_type: u32, header_len: usize) -> Self {
        let mut header = Vec::with_capacity(header_len);
        header.extend_from_slice(&NTLMSSP_MAGIC);
        header.extend_from_slice(&message_type.to_le_bytes());
        Self {
            header,
            payload: Vec::new(),
            header_len,
        }
    }

    /// Appends a fixed-size field to the header.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.header.extend_from_slice(bytes);
    }

    /// Appends `data` to the payload and a security buffer pointing at it to the header.
    pub fn write_buffer(&mut self, data: &[u8]) -> Result<SecurityBuffer, StoringError> {
        let length = u16::try_from(data.len())
            .or(Err(StoringError::BufferTooLong { length: data.len() }))?;
        let offset = u32::try_from(self.header_len + self.payload.len())
            .or(Err(StoringError::BufferTooLong { length: self.payload.len() }))?;

        let sb = SecurityBuffer {
            length,
            capacity: length,
            offset,
        };
        self.payload.extend_from_slice(data);
        self.header.extend_from_slice(&sb.to_bytes());
        Ok(sb)
    }

    /// Encodes a string according to `flags` and appends it like [`MessageWriter::write_buffer`].
    pub fn write_string(&mut self, flags: Flags, string: &str) -> Result<SecurityBuffer, StoringError> {
        let bytes = encode_ntlm_string(flags, string)?;
        self.write_buffer(&bytes)
    }

    /// Joins header and payload.
    pub fn finish(mut self) -> Vec<u8> {
        debug_assert_eq!(self.header.len(), self.header_len, "fixed header has the wrong size");
        self.header.append(&mut self.payload);
        self.header
    }
}


/// Checks the minimum length and the magic value of a message and returns its message type.
///
/// If `expected_type` is given, any other message type is an error.
pub(crate) fn check_header(value: &[u8], min_len: usize, expected_type: Option<u32>) -> Result<u32, ParsingError> {
    if value.len() < min_len {
        return Err(ParsingError::MessageTooShort { expected_min_len: min_len, obtained_len: value.len() });
    }
    let obtained_magic: [u8; 8] = fixed_bytes(value, 0)?;
    if obtained_magic != NTLMSSP_MAGIC {
        return Err(ParsingError::InvalidSignature { expected: NTLMSSP_MAGIC, obtained: Vec::from(obtained_magic) });
    }
    let message_type = read_u32(value, 8)?;
    match expected_type {
        Some(expected) if expected != message_type
            => Err(ParsingError::InvalidMessageType { expected, obtained: message_type }),
        _ => Ok(message_type),
    }
}

/// Reads `N` bytes at `offset`.
pub(crate) fn fixed_bytes<const N: usize>(value: &[u8], offset: usize) -> Result<[u8; N], ParsingError> {
    let obtained = value.len().saturating_sub(offset);
    value.get(offset..offset + N)
        .and_then(|bs| bs.try_into().ok())
        .ok_or(ParsingError::ItemLengthMismatch { expected: N, obtained })
}

pub(crate) fn read_u32(value: &[u8], offset: usize) -> Result<u32, ParsingError> {
    fixed_bytes(value, offset).map(u32::from_le_bytes)
}

pub(crate) fn read_flags(value: &[u8], offset: usize) -> Result<Flags, ParsingError> {
    read_u32(value, offset).map(Flags::from_bits_retain)
}

pub(crate) fn read_security_buffer(value: &[u8], offset: usize) -> Result<SecurityBuffer, ParsingError> {
    let bytes: [u8; 8] = fixed_bytes(value, offset)?;
    SecurityBuffer::try_from(&bytes[..])
}


/// Encodes a string as UTF-16LE or in the OEM encoding, depending on the `flags`.
pub(crate) fn encode_ntlm_string(flags: Flags, string: &str) -> Result<Vec<u8>, StoringError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        Ok(utf16_le_bytes(string))
    } else if flags.contains(Flags::NEGOTIATE_OEM) {
        rust_string_to_oem(string)
            .ok_or_else(|| StoringError::NonOemEncodable { string: string.to_owned() })
    } else {
        Err(StoringError::NeitherUnicodeNorOem)
    }
}

/// Converts UTF-16 values stored as bytes in little-endian format into a string.
pub(crate) fn utf16_le_bytes_to_string(bytes: &[u8]) -> Result<String, ParsingError> {
    if bytes.len() % 2 != 0 {
        return Err(ParsingError::ItemLengthNotDivisible { expected_divisor: 2, obtained_length: bytes.len() });
    }
    let u16s: Vec<u16> = bytes.chunks_exact(2)
        .map(|chk| u16::from_le_bytes([chk[0], chk[1]]))
        .collect();
    String::from_utf16(&u16s)
        .or(Err(ParsingError::InvalidUtf16 { value: u16s }))
}

/// Converts a string from the message into a Rust string, using OEM or UTF-16 encoding depending
/// on the `flags`.
pub(crate) fn decode_ntlm_string(flags: Flags, bytes: &[u8]) -> Result<String, ParsingError> {
    if bytes.is_empty() {
        Ok(String::new())
    } else if flags.contains(Flags::NEGOTIATE_UNICODE) {
        utf16_le_bytes_to_string(bytes)
    } else if flags.contains(Flags::NEGOTIATE_OEM) {
        oem_string_to_rust(bytes)
            .ok_or_else(|| ParsingError::InvalidOemEncoding { value: Vec::from(bytes) })
    } else {
        Err(ParsingError::NeitherUnicodeNorOem)
    }
}
