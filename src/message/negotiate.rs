//! The Negotiate message, sent by the client to open the handshake.


use crate::Flags;
use crate::message::{
    check_header, decode_ntlm_string, read_flags, read_security_buffer, MessageWriter, OsVersion,
    ParsingError, StoringError, NEGOTIATE_MESSAGE_TYPE,
};
use crate::oem::oem_uppercase;


/// The version block follows the workstation secbuffer at offset 32; the payload starts at 40.
const HEADER_LEN: usize
    = 8 // magic
    + 4 // message type
    + 4 // flags
    + 8 // supplied domain secbuffer
    + 8 // supplied workstation secbuffer
    + 8 // version
    ;

/// Messages without the version block end after the workstation secbuffer.
const MIN_LEN: usize = HEADER_LEN - 8;


/// The flags every Negotiate message built by [`NegotiateMessage::new`] requests.
pub const DEFAULT_NEGOTIATE_FLAGS: Flags = Flags::NEGOTIATE_NTLM
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY)
    .union(Flags::NEGOTIATE_128BIT)
    .union(Flags::NEGOTIATE_56BIT)
    .union(Flags::REQUEST_TARGET)
    .union(Flags::NEGOTIATE_TARGET_INFO)
    .union(Flags::NEGOTIATE_VERSION);


/// The Negotiate message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NegotiateMessage {
    pub flags: Flags,
    pub supplied_domain: String,
    pub supplied_workstation: String,
    pub os_version: OsVersion,
}
impl NegotiateMessage {
    /// Builds the Negotiate message sent by this client.
    ///
    /// In OEM mode the domain and workstation are uppercased, since that is how they travel in the
    /// OEM code page.
    pub fn new(domain: &str, workstation: &str, unicode: bool) -> Self {
        let mut flags = DEFAULT_NEGOTIATE_FLAGS;
        flags |= if unicode { Flags::NEGOTIATE_UNICODE } else { Flags::NEGOTIATE_OEM };
        if !domain.is_empty() {
            flags |= Flags::NEGOTIATE_OEM_DOMAIN_SUPPLIED;
        }
        if !workstation.is_empty() {
            flags |= Flags::NEGOTIATE_OEM_WORKSTATION_SUPPLIED;
        }

        let (supplied_domain, supplied_workstation) = if unicode {
            (domain.to_owned(), workstation.to_owned())
        } else {
            (oem_uppercase(domain), oem_uppercase(workstation))
        };

        Self {
            flags,
            supplied_domain,
            supplied_workstation,
            os_version: OsVersion::CLIENT,
        }
    }

    /// Serializes the Negotiate message into bytes.
    ///
    /// The version block is zeroed unless [`Flags::NEGOTIATE_VERSION`] is set.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut writer = MessageWriter::new(NEGOTIATE_MESSAGE_TYPE, HEADER_LEN);
        writer.write_bytes(&self.flags.bits().to_le_bytes());
        writer.write_string(self.flags, &self.supplied_domain)?;
        writer.write_string(self.flags, &self.supplied_workstation)?;
        if self.flags.contains(Flags::NEGOTIATE_VERSION) {
            writer.write_bytes(&self.os_version.to_bytes());
        } else {
            writer.write_bytes(&[0u8; 8]);
        }
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for NegotiateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_header(value, MIN_LEN, Some(NEGOTIATE_MESSAGE_TYPE))?;

        let flags = read_flags(value, 12)?;
        let supplied_domain_secbuf = read_security_buffer(value, 16)?;
        let supplied_workstation_secbuf = read_security_buffer(value, 24)?;
        let os_version = if flags.contains(Flags::NEGOTIATE_VERSION) {
            OsVersion::try_from(&value[32..])?
        } else {
            OsVersion::default()
        };

        let supplied_domain = decode_ntlm_string(flags, supplied_domain_secbuf.apply_to_message(value)?)?;
        let supplied_workstation = decode_ntlm_string(flags, supplied_workstation_secbuf.apply_to_message(value)?)?;

        Ok(Self {
            flags,
            supplied_domain,
            supplied_workstation,
            os_version,
        })
    }
}
