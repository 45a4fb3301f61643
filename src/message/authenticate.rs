//! The Authenticate message, carrying the client's responses to the server's challenge.


use crate::Flags;
use crate::message::{
    check_header, decode_ntlm_string, fixed_bytes, read_flags, read_security_buffer, MessageWriter,
    OsVersion, ParsingError, SecurityBuffer, StoringError, AUTHENTICATE_MESSAGE_TYPE,
};


/// The size of the fixed header written by this crate.
pub const HEADER_LEN: usize
    = 8 // magic
    + 4 // message type
    + 8 // LM response secbuffer
    + 8 // NTLM response secbuffer
    + 8 // domain name secbuffer
    + 8 // user name secbuffer
    + 8 // workstation name secbuffer
    + 8 // session key secbuffer
    + 4 // flags
    + 8 // version
    + 16 // MIC
    ;

/// Offset of the version block.
pub const VERSION_OFFSET: usize = 64;

/// Offset of the message integrity code.
pub const MIC_OFFSET: usize = 72;

/// Older clients send neither version nor MIC.
const MIN_LEN: usize = VERSION_OFFSET;


/// The Authenticate message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AuthenticateMessage {
    pub lm_response: Vec<u8>,
    pub ntlm_response: Vec<u8>,
    pub domain_name: String,
    pub user_name: String,
    pub workstation_name: String,
    pub session_key: Vec<u8>,
    pub flags: Flags,
    pub os_version: OsVersion,

    /// The message integrity code. This crate always sends zeros here.
    pub mic: [u8; 16],
}
impl AuthenticateMessage {
    /// Serializes the Authenticate message into bytes.
    ///
    /// The header always has room for the version block and the MIC; the version block is zeroed
    /// unless [`Flags::NEGOTIATE_VERSION`] is set.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut writer = MessageWriter::new(AUTHENTICATE_MESSAGE_TYPE, HEADER_LEN);
        writer.write_buffer(&self.lm_response)?;
        writer.write_buffer(&self.ntlm_response)?;
        writer.write_string(self.flags, &self.domain_name)?;
        writer.write_string(self.flags, &self.user_name)?;
        writer.write_string(self.flags, &self.workstation_name)?;
        writer.write_buffer(&self.session_key)?;
        writer.write_bytes(&self.flags.bits().to_le_bytes());
        if self.flags.contains(Flags::NEGOTIATE_VERSION) {
            writer.write_bytes(&self.os_version.to_bytes());
        } else {
            writer.write_bytes(&[0u8; 8]);
        }
        writer.write_bytes(&self.mic);
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for AuthenticateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_header(value, MIN_LEN, Some(AUTHENTICATE_MESSAGE_TYPE))?;

        let secbufs: Vec<SecurityBuffer> = (0..6)
            .map(|i| read_security_buffer(value, 12 + 8*i))
            .collect::<Result<_, _>>()?;
        let flags = read_flags(value, 60)?;

        // the payload of older messages starts where the version block would be
        let payload_start = secbufs.iter()
            .filter(|sb| sb.length() > 0)
            .map(|sb| usize::try_from(sb.offset()).unwrap_or(usize::MAX))
            .min()
            .unwrap_or(value.len());

        let os_version = if flags.contains(Flags::NEGOTIATE_VERSION) && payload_start >= MIC_OFFSET {
            OsVersion::try_from(&value[VERSION_OFFSET..])?
        } else {
            OsVersion::default()
        };
        let mic = if payload_start >= HEADER_LEN && value.len() >= HEADER_LEN {
            fixed_bytes(value, MIC_OFFSET)?
        } else {
            [0u8; 16]
        };

        let lm_response = Vec::from(secbufs[0].apply_to_message(value)?);
        let ntlm_response = Vec::from(secbufs[1].apply_to_message(value)?);
        let domain_name = decode_ntlm_string(flags, secbufs[2].apply_to_message(value)?)?;
        let user_name = decode_ntlm_string(flags, secbufs[3].apply_to_message(value)?)?;
        let workstation_name = decode_ntlm_string(flags, secbufs[4].apply_to_message(value)?)?;
        let session_key = Vec::from(secbufs[5].apply_to_message(value)?);

        Ok(Self {
            lm_response,
            ntlm_response,
            domain_name,
            user_name,
            workstation_name,
            session_key,
            flags,
            os_version,
            mic,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sample() -> AuthenticateMessage {
        AuthenticateMessage {
            lm_response: vec![0xAA; 24],
            ntlm_response: vec![0xBB; 40],
            domain_name: "Contoso".to_owned(),
            user_name: "Alice".to_owned(),
            workstation_name: "WS01".to_owned(),
            session_key: Vec::new(),
            flags: Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_VERSION,
            os_version: OsVersion::CLIENT,
            mic: [0u8; 16],
        }
    }

    #[test]
    fn layout() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[0..12], b"NTLMSSP\0\x03\0\0\0");
        assert_eq!(&bytes[12..20], &hex!("1800 1800 58000000"));
        assert_eq!(&bytes[20..28], &hex!("2800 2800 70000000"));
        assert_eq!(&bytes[28..36], &hex!("0e00 0e00 98000000"));
        assert_eq!(&bytes[36..44], &hex!("0a00 0a00 a6000000"));
        assert_eq!(&bytes[44..52], &hex!("0800 0800 b0000000"));
        assert_eq!(&bytes[52..60], &hex!("0000 0000 b8000000"));
        assert_eq!(&bytes[64..72], &OsVersion::CLIENT.to_bytes());
        assert_eq!(&bytes[72..88], &[0u8; 16]);
        assert_eq!(bytes.len(), 0xb8);
        assert_eq!(&bytes[0xa6..0xb0], b"A\0l\0i\0c\0e\0");
    }

    #[test]
    fn reparse() {
        let message = sample();
        let bytes = message.to_bytes().unwrap();
        assert_eq!(AuthenticateMessage::try_from(&bytes[..]).unwrap(), message);
    }

    #[test]
    fn version_zeroed_without_flag() {
        let mut message = sample();
        message.flags.remove(Flags::NEGOTIATE_VERSION);
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes.len(), 0xb8);
        assert_eq!(&bytes[64..72], &[0u8; 8]);
    }

    #[test]
    fn parses_message_without_version_or_mic() {
        // header ends after the flags; payload starts at 64
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"NTLMSSP\0\x03\0\0\0");
        bytes.extend_from_slice(&hex!("0000 0000 40000000")); // LM
        bytes.extend_from_slice(&hex!("0000 0000 40000000")); // NT
        bytes.extend_from_slice(&hex!("0300 0300 40000000")); // domain
        bytes.extend_from_slice(&hex!("0300 0300 43000000")); // user
        bytes.extend_from_slice(&hex!("0000 0000 46000000")); // workstation
        bytes.extend_from_slice(&hex!("0000 0000 46000000")); // session key
        bytes.extend_from_slice(&(Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_VERSION).bits().to_le_bytes());
        bytes.extend_from_slice(b"DOMbob");

        let message = AuthenticateMessage::try_from(&bytes[..]).unwrap();
        assert_eq!(message.domain_name, "DOM");
        assert_eq!(message.user_name, "bob");
        assert_eq!(message.os_version, OsVersion::default());
        assert_eq!(message.mic, [0u8; 16]);
    }
}
