//! The Challenge message, the server's answer to the Negotiate message.


use crate::Flags;
use crate::message::{
    check_header, decode_ntlm_string, fixed_bytes, read_flags, read_security_buffer, MessageWriter,
    OsVersion, ParsingError, StoringError, CHALLENGE_MESSAGE_TYPE,
};
use crate::message::target_info::{
    parse_target_info, target_info_to_bytes, TargetInfoEntry, TargetInfoType,
};


const HEADER_LEN: usize
    = 8 // magic
    + 4 // message type
    + 8 // target name secbuffer
    + 4 // flags
    + 8 // challenge
    + 8 // context
    + 8 // target information secbuffer
    + 8 // version
    ;


/// The Challenge message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChallengeMessage {
    pub target_name: String,
    pub flags: Flags,
    pub challenge: [u8; 8],
    pub context: [u8; 8],
    pub target_information: Vec<TargetInfoEntry>,
    pub os_version: OsVersion,
}
impl ChallengeMessage {
    /// Serializes the Challenge message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let target_info = self.target_info_bytes()?;

        let mut writer = MessageWriter::new(CHALLENGE_MESSAGE_TYPE, HEADER_LEN);
        writer.write_string(self.flags, &self.target_name)?;
        writer.write_bytes(&self.flags.bits().to_le_bytes());
        writer.write_bytes(&self.challenge);
        writer.write_bytes(&self.context);
        writer.write_buffer(&target_info)?;
        if self.flags.contains(Flags::NEGOTIATE_VERSION) {
            writer.write_bytes(&self.os_version.to_bytes());
        } else {
            writer.write_bytes(&[0u8; 8]);
        }
        Ok(writer.finish())
    }

    /// The target information in its wire format, terminator included. This is what an NTLMv2
    /// response replays.
    pub fn target_info_bytes(&self) -> Result<Vec<u8>, StoringError> {
        target_info_to_bytes(&self.target_information)
    }

    fn target_info_entry(&self, entry_type: TargetInfoType) -> Option<&TargetInfoEntry> {
        self.target_information.iter()
            .find(|tie| tie.entry_type == entry_type)
    }

    /// The value of the MsvAvFlags entry, if the server sent one.
    pub fn av_flags(&self) -> Option<u32> {
        let entry = self.target_info_entry(TargetInfoType::Flags)?;
        let bytes: [u8; 4] = entry.data.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// The server's FILETIME timestamp, if it sent one.
    pub fn timestamp(&self) -> Option<u64> {
        let entry = self.target_info_entry(TargetInfoType::Timestamp)?;
        let bytes: [u8; 8] = entry.data.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}
impl TryFrom<&[u8]> for ChallengeMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_header(value, HEADER_LEN, Some(CHALLENGE_MESSAGE_TYPE))?;

        let target_name_secbuf = read_security_buffer(value, 12)?;
        let flags = read_flags(value, 20)?;
        let challenge = fixed_bytes(value, 24)?;
        let context = fixed_bytes(value, 32)?;
        let target_info_secbuf = read_security_buffer(value, 40)?;
        let os_version = if flags.contains(Flags::NEGOTIATE_VERSION) {
            OsVersion::try_from(&value[48..56])?
        } else {
            OsVersion::default()
        };

        let target_name = decode_ntlm_string(flags, target_name_secbuf.apply_to_message(value)?)?;
        let target_information = parse_target_info(target_info_secbuf.apply_to_message(value)?)?;

        Ok(Self {
            target_name,
            flags,
            challenge,
            context,
            target_information,
            os_version,
        })
    }
}
