//! SPNEGO (RFC 4178) tokens carrying NTLM messages.
//!
//! Only the subset of DER needed for NegTokenInit and NegTokenResp is implemented: definite
//! lengths (short form or long form with up to four length bytes), OIDs compared as raw content
//! bytes, and the context-specific tags of the two token types.
//!
//! ```plain
//! 60 len                      -- GSS-API InitialContextToken (first token only)
//!    06 06 2b0601050502       -- SPNEGO OID
//!    a0 len                   -- NegTokenInit
//!       30 len
//!          a0 len 30 len 06 0a 2b06010401823702020a   -- mechTypes: NTLMSSP
//!          a2 len 04 len <NTLM message>               -- mechToken
//!
//! a1 len                      -- NegTokenResp
//!    30 len
//!       a0 03 0a 01 <state>   -- negState
//!       a1 len 06 len <oid>   -- supportedMech
//!       a2 len 04 len <token> -- responseToken
//!       a3 len 04 len <mic>   -- mechListMIC
//! ```


use std::fmt;


/// The SPNEGO mechanism OID, 1.3.6.1.5.5.2, as DER content bytes.
pub const SPNEGO_OID: [u8; 6] = [0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];

/// The NTLMSSP mechanism OID, 1.3.6.1.4.1.311.2.2.10, as DER content bytes.
pub const NTLMSSP_OID: [u8; 10] = [0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_ENUMERATED: u8 = 0x0a;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_GSS_API: u8 = 0x60;
const TAG_CONTEXT_0: u8 = 0xa0;
const TAG_CONTEXT_1: u8 = 0xa1;
const TAG_CONTEXT_2: u8 = 0xa2;
const TAG_CONTEXT_3: u8 = 0xa3;

/// The most length bytes accepted in a long-form DER length.
const MAX_LENGTH_BYTES: usize = 4;


/// An error that may occur while decoding a SPNEGO token.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SpnegoError {
    /// The token ends in the middle of an element.
    Truncated { needed: usize, available: usize },

    /// An element has a different tag than expected.
    UnexpectedTag { expected: u8, obtained: u8 },

    /// A length is indefinite or uses more length bytes than supported.
    InvalidLength { first_byte: u8 },

    /// The GSS-API header names a mechanism other than SPNEGO.
    UnexpectedOid { obtained: Vec<u8> },

    /// The negotiation state is not one of the four defined values.
    InvalidNegState(u8),

    /// The token carries no mechanism token.
    NoInnerToken,
}
impl fmt::Display for SpnegoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available }
                => write!(f, "token truncated (needed {} bytes, {} available)", needed, available),
            Self::UnexpectedTag { expected, obtained }
                => write!(f, "unexpected tag 0x{:02x} (expected 0x{:02x})", obtained, expected),
            Self::InvalidLength { first_byte }
                => write!(f, "unsupported DER length starting with 0x{:02x}", first_byte),
            Self::UnexpectedOid { obtained }
                => write!(f, "unexpected mechanism OID {}", hex::encode(obtained)),
            Self::InvalidNegState(state)
                => write!(f, "invalid negotiation state {}", state),
            Self::NoInnerToken
                => write!(f, "the token does not carry a mechanism token"),
        }
    }
}
impl std::error::Error for SpnegoError {
}


/// The negotiation state of a NegTokenResp.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NegState {
    AcceptCompleted,
    AcceptIncomplete,
    Reject,
    RequestMic,
}
impl From<NegState> for u8 {
    fn from(state: NegState) -> Self {
        match state {
            NegState::AcceptCompleted => 0,
            NegState::AcceptIncomplete => 1,
            NegState::Reject => 2,
            NegState::RequestMic => 3,
        }
    }
}
impl TryFrom<u8> for NegState {
    type Error = SpnegoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NegState::AcceptCompleted),
            1 => Ok(NegState::AcceptIncomplete),
            2 => Ok(NegState::Reject),
            3 => Ok(NegState::RequestMic),
            other => Err(SpnegoError::InvalidNegState(other)),
        }
    }
}


/// Appends a DER length.
pub fn push_der_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let be = len.to_be_bytes();
    let skip = be.iter().take_while(|&&b| b == 0).count();
    let significant = &be[skip..];
    buf.push(0x80 | significant.len() as u8);
    buf.extend_from_slice(significant);
}

/// Reads a DER length, returning it and the number of bytes it occupied.
pub fn read_der_length(data: &[u8]) -> Result<(usize, usize), SpnegoError> {
    let first_byte = *data.first()
        .ok_or(SpnegoError::Truncated { needed: 1, available: 0 })?;
    if first_byte < 0x80 {
        return Ok((usize::from(first_byte), 1));
    }

    let count = usize::from(first_byte & 0x7f);
    if count == 0 || count > MAX_LENGTH_BYTES {
        return Err(SpnegoError::InvalidLength { first_byte });
    }
    let length_bytes = data.get(1..1+count)
        .ok_or(SpnegoError::Truncated { needed: 1 + count, available: data.len() })?;
    let len = length_bytes.iter()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
    Ok((len, 1 + count))
}

/// Appends a complete element.
fn push_tlv(buf: &mut Vec<u8>, tag: u8, contents: &[u8]) {
    buf.push(tag);
    push_der_length(buf, contents.len());
    buf.extend_from_slice(contents);
}

fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut ret = Vec::with_capacity(contents.len() + 6);
    push_tlv(&mut ret, tag, contents);
    ret
}


/// Walks a sequence of DER elements.
struct DerReader<'a> {
    data: &'a [u8],
}
impl<'a> DerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads the next element, returning its tag and contents.
    fn read_any(&mut self) -> Result<(u8, &'a [u8]), SpnegoError> {
        let tag = *self.data.first()
            .ok_or(SpnegoError::Truncated { needed: 1, available: 0 })?;
        let (len, len_len) = read_der_length(&self.data[1..])?;
        let start = 1 + len_len;
        let end = start.checked_add(len)
            .ok_or(SpnegoError::InvalidLength { first_byte: self.data[1] })?;
        let contents = self.data.get(start..end)
            .ok_or(SpnegoError::Truncated { needed: end, available: self.data.len() })?;
        self.data = &self.data[end..];
        Ok((tag, contents))
    }

    /// Reads the next element, which must have the given tag.
    fn read(&mut self, expected: u8) -> Result<&'a [u8], SpnegoError> {
        let (obtained, contents) = self.read_any()?;
        if obtained != expected {
            return Err(SpnegoError::UnexpectedTag { expected, obtained });
        }
        Ok(contents)
    }
}


/// Removes the GSS-API header, if present, and checks that it names SPNEGO.
fn strip_gss_header(data: &[u8]) -> Result<&[u8], SpnegoError> {
    if data.first() != Some(&TAG_GSS_API) {
        return Ok(data);
    }
    let inner = DerReader::new(data).read(TAG_GSS_API)?;
    let mut reader = DerReader::new(inner);
    let oid = reader.read(TAG_OID)?;
    if oid != SPNEGO_OID {
        return Err(SpnegoError::UnexpectedOid { obtained: oid.to_vec() });
    }
    Ok(reader.data)
}


/// Wraps an NTLM message into a NegTokenInit offering NTLMSSP, behind a GSS-API header.
pub fn create_neg_token_init(inner: &[u8]) -> Vec<u8> {
    let mech_types = tlv(TAG_SEQUENCE, &tlv(TAG_OID, &NTLMSSP_OID));

    let mut fields = tlv(TAG_CONTEXT_0, &mech_types);
    push_tlv(&mut fields, TAG_CONTEXT_2, &tlv(TAG_OCTET_STRING, inner));

    let neg_token_init = tlv(TAG_CONTEXT_0, &tlv(TAG_SEQUENCE, &fields));

    let mut gss_contents = tlv(TAG_OID, &SPNEGO_OID);
    gss_contents.extend_from_slice(&neg_token_init);
    tlv(TAG_GSS_API, &gss_contents)
}

/// Builds a NegTokenResp. Absent fields are omitted.
///
/// Only the client's first token carries a GSS-API header, so none is added here.
pub fn create_neg_token_resp(neg_state: Option<NegState>, supported_mech: Option<&[u8]>, response_token: Option<&[u8]>) -> Vec<u8> {
    let mut fields = Vec::new();
    if let Some(state) = neg_state {
        push_tlv(&mut fields, TAG_CONTEXT_0, &tlv(TAG_ENUMERATED, &[u8::from(state)]));
    }
    if let Some(mech) = supported_mech {
        push_tlv(&mut fields, TAG_CONTEXT_1, &tlv(TAG_OID, mech));
    }
    if let Some(token) = response_token {
        push_tlv(&mut fields, TAG_CONTEXT_2, &tlv(TAG_OCTET_STRING, token));
    }
    tlv(TAG_CONTEXT_1, &tlv(TAG_SEQUENCE, &fields))
}


/// A decoded NegTokenInit.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct NegTokenInit {
    /// The offered mechanisms as OID content bytes, most preferred first.
    pub mech_types: Vec<Vec<u8>>,
    pub mech_token: Option<Vec<u8>>,
}
impl NegTokenInit {
    /// Decodes a NegTokenInit, with or without GSS-API header.
    pub fn parse(data: &[u8]) -> Result<Self, SpnegoError> {
        let body = strip_gss_header(data)?;
        let sequence = DerReader::new(body).read(TAG_CONTEXT_0)?;
        let mut fields = DerReader::new(DerReader::new(sequence).read(TAG_SEQUENCE)?);

        let mut ret = Self::default();
        while !fields.is_empty() {
            let (tag, contents) = fields.read_any()?;
            match tag {
                TAG_CONTEXT_0 => {
                    let mut oids = DerReader::new(DerReader::new(contents).read(TAG_SEQUENCE)?);
                    while !oids.is_empty() {
                        ret.mech_types.push(oids.read(TAG_OID)?.to_vec());
                    }
                },
                TAG_CONTEXT_2 => {
                    ret.mech_token = Some(DerReader::new(contents).read(TAG_OCTET_STRING)?.to_vec());
                },
                // reqFlags, mechListMIC and anything newer
                _ => {},
            }
        }
        Ok(ret)
    }
}


/// A decoded NegTokenResp.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct NegTokenResp {
    pub neg_state: Option<NegState>,
    pub supported_mech: Option<Vec<u8>>,
    pub response_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}
impl NegTokenResp {
    /// Decodes a NegTokenResp, with or without GSS-API header.
    pub fn parse(data: &[u8]) -> Result<Self, SpnegoError> {
        let body = strip_gss_header(data)?;
        let sequence = DerReader::new(body).read(TAG_CONTEXT_1)?;
        let mut fields = DerReader::new(DerReader::new(sequence).read(TAG_SEQUENCE)?);

        let mut ret = Self::default();
        while !fields.is_empty() {
            let (tag, contents) = fields.read_any()?;
            let mut value = DerReader::new(contents);
            match tag {
                TAG_CONTEXT_0 => {
                    let state = value.read(TAG_ENUMERATED)?;
                    match state {
                        [s] => ret.neg_state = Some(NegState::try_from(*s)?),
                        _ => return Err(SpnegoError::InvalidNegState(state.last().copied().unwrap_or(0xff))),
                    }
                },
                TAG_CONTEXT_1 => ret.supported_mech = Some(value.read(TAG_OID)?.to_vec()),
                TAG_CONTEXT_2 => ret.response_token = Some(value.read(TAG_OCTET_STRING)?.to_vec()),
                TAG_CONTEXT_3 => ret.mech_list_mic = Some(value.read(TAG_OCTET_STRING)?.to_vec()),
                _ => {},
            }
        }
        Ok(ret)
    }
}


/// Either of the two SPNEGO token types.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum NegotiationToken {
    Init(NegTokenInit),
    Resp(NegTokenResp),
}
impl NegotiationToken {
    /// Decodes whichever token type `data` holds.
    pub fn parse(data: &[u8]) -> Result<Self, SpnegoError> {
        let body = strip_gss_header(data)?;
        match body.first() {
            Some(&TAG_CONTEXT_0) => NegTokenInit::parse(body).map(Self::Init),
            Some(&TAG_CONTEXT_1) => NegTokenResp::parse(body).map(Self::Resp),
            Some(&obtained) => Err(SpnegoError::UnexpectedTag { expected: TAG_CONTEXT_1, obtained }),
            None => Err(SpnegoError::Truncated { needed: 1, available: 0 }),
        }
    }

    /// The mechanism token this token carries, if any.
    pub fn inner_token(&self) -> Option<&[u8]> {
        match self {
            Self::Init(init) => init.mech_token.as_deref(),
            Self::Resp(resp) => resp.response_token.as_deref(),
        }
    }
}


/// Returns the mechanism token of a NegTokenInit or NegTokenResp.
pub fn extract_inner_token(data: &[u8]) -> Result<Vec<u8>, SpnegoError> {
    NegotiationToken::parse(data)?
        .inner_token()
        .map(|t| t.to_vec())
        .ok_or(SpnegoError::NoInnerToken)
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use rstest::rstest;

    #[rstest]
    #[case(0x00, &hex!("00"))]
    #[case(0x7f, &hex!("7f"))]
    #[case(0x80, &hex!("8180"))]
    #[case(0xff, &hex!("81ff"))]
    #[case(0x100, &hex!("820100"))]
    #[case(0x01_0000, &hex!("83010000"))]
    #[case(0x0100_0000, &hex!("8401000000"))]
    fn der_lengths(#[case] len: usize, #[case] encoded: &[u8]) {
        let mut buf = Vec::new();
        push_der_length(&mut buf, len);
        assert_eq!(buf, encoded);
        assert_eq!(read_der_length(encoded), Ok((len, encoded.len())));
    }

    #[test]
    fn unsupported_lengths() {
        assert_eq!(read_der_length(&hex!("80")), Err(SpnegoError::InvalidLength { first_byte: 0x80 }));
        assert_eq!(read_der_length(&hex!("850000000001")), Err(SpnegoError::InvalidLength { first_byte: 0x85 }));
        assert_eq!(read_der_length(&hex!("8201")), Err(SpnegoError::Truncated { needed: 3, available: 2 }));
        assert_eq!(read_der_length(&[]), Err(SpnegoError::Truncated { needed: 1, available: 0 }));
    }

    #[test]
    fn neg_token_init_layout() {
        let token = create_neg_token_init(b"NTLM");
        assert_eq!(token, hex!("
            6024 0606 2b0601050502
            a01a 3018
                a00e 300c 060a 2b06010401823702020a
                a206 0404 4e544c4d
        "));

        let parsed = NegTokenInit::parse(&token).unwrap();
        assert_eq!(parsed.mech_types, vec![NTLMSSP_OID.to_vec()]);
        assert_eq!(parsed.mech_token.as_deref(), Some(&b"NTLM"[..]));
    }

    #[test]
    fn long_form_lengths_roundtrip() {
        let inner = vec![0x5a; 300];
        let token = create_neg_token_init(&inner);
        assert_eq!(&token[..2], &hex!("6082"));
        assert_eq!(extract_inner_token(&token).unwrap(), inner);

        let resp = create_neg_token_resp(Some(NegState::AcceptIncomplete), None, Some(&inner));
        assert_eq!(&resp[..2], &hex!("a182"));
        assert_eq!(extract_inner_token(&resp).unwrap(), inner);
    }

    #[test]
    fn neg_token_resp_fields() {
        let token = create_neg_token_resp(Some(NegState::AcceptIncomplete), Some(&NTLMSSP_OID), Some(b"NTLMSSP\0"));
        assert_eq!(&token[..9], &hex!("a1 21 30 1f a0 03 0a 01 01"));

        let parsed = NegTokenResp::parse(&token).unwrap();
        assert_eq!(parsed.neg_state, Some(NegState::AcceptIncomplete));
        assert_eq!(parsed.supported_mech.as_deref(), Some(&NTLMSSP_OID[..]));
        assert_eq!(parsed.response_token.as_deref(), Some(&b"NTLMSSP\0"[..]));
        assert_eq!(parsed.mech_list_mic, None);
    }

    #[test]
    fn neg_token_resp_behind_gss_header() {
        let resp = create_neg_token_resp(Some(NegState::Reject), None, None);
        let mut contents = tlv(TAG_OID, &SPNEGO_OID);
        contents.extend_from_slice(&resp);
        let wrapped = tlv(TAG_GSS_API, &contents);

        let parsed = NegTokenResp::parse(&wrapped).unwrap();
        assert_eq!(parsed.neg_state, Some(NegState::Reject));
        assert_eq!(parsed.response_token, None);
    }

    #[test]
    fn mech_list_mic_is_read() {
        let mut fields = tlv(TAG_CONTEXT_0, &tlv(TAG_ENUMERATED, &[0]));
        push_tlv(&mut fields, TAG_CONTEXT_3, &tlv(TAG_OCTET_STRING, &[1, 2, 3]));
        let token = tlv(TAG_CONTEXT_1, &tlv(TAG_SEQUENCE, &fields));

        let parsed = NegTokenResp::parse(&token).unwrap();
        assert_eq!(parsed.neg_state, Some(NegState::AcceptCompleted));
        assert_eq!(parsed.mech_list_mic, Some(vec![1, 2, 3]));
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!(
            NegTokenResp::parse(&hex!("a1 05 30 03 a0 03 0a 01 07")),
            Err(SpnegoError::Truncated { needed: 5, available: 3 }),
        );
        assert_eq!(
            NegTokenResp::parse(&hex!("a1 07 30 05 a0 03 0a 01 07")),
            Err(SpnegoError::InvalidNegState(7)),
        );
        assert_eq!(
            NegTokenResp::parse(&hex!("a0 02 30 00")),
            Err(SpnegoError::UnexpectedTag { expected: 0xa1, obtained: 0xa0 }),
        );
        assert_eq!(
            extract_inner_token(&hex!("60 0a 06 06 2b0601050503 a1 00")),
            Err(SpnegoError::UnexpectedOid { obtained: hex!("2b0601050503").to_vec() }),
        );
        assert_eq!(
            extract_inner_token(&hex!("04 00")),
            Err(SpnegoError::UnexpectedTag { expected: 0xa1, obtained: 0x04 }),
        );
    }

    #[test]
    fn missing_inner_token() {
        let resp = create_neg_token_resp(Some(NegState::AcceptCompleted), None, None);
        assert_eq!(extract_inner_token(&resp), Err(SpnegoError::NoInnerToken));
    }

    #[rstest]
    #[case(0, NegState::AcceptCompleted)]
    #[case(1, NegState::AcceptIncomplete)]
    #[case(2, NegState::Reject)]
    #[case(3, NegState::RequestMic)]
    fn neg_states(#[case] value: u8, #[case] state: NegState) {
        assert_eq!(NegState::try_from(value), Ok(state));
        assert_eq!(u8::from(state), value);
    }
}
