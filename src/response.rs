//! Challenge responses: NTLMv1 and NTLMv2 (with their LM counterparts).
//!
//! Both response families implement [`ResponseProvider`], which is all the Authenticate message
//! needs from them. Which one is used is decided by the server's flags, see
//! [`crate::auth::NtlmAuth`].


use std::fmt;

use chrono::{DateTime, Utc};

use crate::crypto::{des_long, hmac_md5};
use crate::hashes::{lm_hash, nt_hash, utf16_le_bytes, NtHash};


/// Seconds between 1601-01-01 (the FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_EPOCH_SECS: i64 = 11_644_473_600;

/// FILETIME ticks (100 ns) per second.
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

/// `RespType` and `HiRespType` of the NTLMv2 client challenge structure.
const NTLMV2_BLOB_SIGNATURE: [u8; 2] = [0x01, 0x01];


/// User credentials: username and domain together with a password, an NT hash or both.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct Credentials {
    /// The username part of the credentials.
    pub username: String,

    /// The domain part of the credentials.
    ///
    /// Often specified in combination with the username as `<DOMAIN>\<USERNAME>`. In credentials
    /// without a domain, the domain is an empty string.
    pub domain: String,

    /// The password; empty if unknown.
    pub password: String,

    /// The NT hash of the password. Takes precedence over the password if both are set.
    pub nt_hash: Option<NtHash>,
}
impl Credentials {
    pub fn with_password(username: &str, domain: &str, password: &str) -> Self {
        Self {
            username: username.to_owned(),
            domain: domain.to_owned(),
            password: password.to_owned(),
            nt_hash: None,
        }
    }

    pub fn with_nt_hash(username: &str, domain: &str, nt_hash: NtHash) -> Self {
        Self {
            username: username.to_owned(),
            domain: domain.to_owned(),
            password: String::new(),
            nt_hash: Some(nt_hash),
        }
    }

    /// The NT hash the responses are calculated from.
    pub fn secret_nt_hash(&self) -> Result<NtHash, ResponseError> {
        match self.nt_hash {
            Some(hash) => Ok(hash),
            None if !self.password.is_empty() => Ok(nt_hash(&self.password)),
            None => Err(ResponseError::MissingSecret),
        }
    }

    /// The LM hash, which can only be derived from the password.
    pub fn secret_lm_hash(&self) -> Result<[u8; 16], ResponseError> {
        if self.password.is_empty() {
            Err(ResponseError::MissingPassword)
        } else {
            Ok(lm_hash(&self.password))
        }
    }
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .field("nt_hash", &self.nt_hash.map(|_| "<redacted>"))
            .finish()
    }
}


/// An error that may occur while calculating a challenge response.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResponseError {
    /// A server or client challenge does not have the length of 8 bytes.
    InvalidChallenge { which: &'static str, length: usize },

    /// Neither a password nor an NT hash is available.
    MissingSecret,

    /// The response requires the password, which is not available.
    MissingPassword,
}
impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChallenge { which, length }
                => write!(f, "the {} challenge must be 8 bytes long, obtained {}", which, length),
            Self::MissingSecret
                => write!(f, "neither a password nor an NT hash was supplied"),
            Self::MissingPassword
                => write!(f, "the LM response requires the password"),
        }
    }
}
impl std::error::Error for ResponseError {
}


fn challenge_from_slice(which: &'static str, challenge: &[u8]) -> Result<[u8; 8], ResponseError> {
    challenge.try_into()
        .or(Err(ResponseError::InvalidChallenge { which, length: challenge.len() }))
}


/// Something that can answer a server challenge with an LM and an NT response.
pub trait ResponseProvider {
    /// The value of the LM response field of the Authenticate message.
    fn lm_challenge_response(&self) -> Vec<u8>;

    /// The value of the NT response field of the Authenticate message.
    fn nt_challenge_response(&self) -> Vec<u8>;
}


/// A source of the current time as a Windows FILETIME.
pub trait Clock {
    fn filetime_now(&self) -> u64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn filetime_now(&self) -> u64 {
        filetime(Utc::now())
    }
}

/// A clock that is stuck at the given FILETIME.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FixedClock(pub u64);
impl Clock for FixedClock {
    fn filetime_now(&self) -> u64 {
        self.0
    }
}

/// Converts a point in time into a FILETIME: 100-nanosecond intervals since 1601-01-01 UTC.
///
/// Times before 1601 clamp to zero.
pub fn filetime(datetime: DateTime<Utc>) -> u64 {
    let secs = match u64::try_from(datetime.timestamp().saturating_add(FILETIME_UNIX_EPOCH_SECS)) {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let ticks = u64::from(datetime.timestamp_subsec_nanos()) / 100;
    secs.saturating_mul(FILETIME_TICKS_PER_SEC)
        .saturating_add(ticks)
}


/// An NTLMv1 response to a server challenge.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct NtlmV1Response {
    username: String,
    domain: String,
    server_challenge: [u8; 8],
    response: [u8; 24],
    lm_response: Option<[u8; 24]>,
}
impl NtlmV1Response {
    /// Calculates the response of `credentials` to `server_challenge`, which must be 8 bytes long.
    ///
    /// The NT hash is right-padded to 21 bytes, split into three DES keys with parity and each of
    /// them encrypts the challenge.
    pub fn new(credentials: &Credentials, server_challenge: &[u8]) -> Result<Self, ResponseError> {
        let server_challenge = challenge_from_slice("server", server_challenge)?;
        let nt_hash = credentials.secret_nt_hash()?;

        let response = des_long(*nt_hash.as_bytes(), server_challenge);
        let lm_response = credentials.secret_lm_hash().ok()
            .map(|lm| des_long(lm, server_challenge));

        Ok(Self {
            username: credentials.username.clone(),
            domain: credentials.domain.clone(),
            server_challenge,
            response,
            lm_response,
        })
    }

    /// The 24-byte NTLMv1 response.
    pub fn response(&self) -> [u8; 24] {
        self.response
    }

    /// The 24-byte LMv1 response. Only available if the password is known.
    pub fn lm_response(&self) -> Result<[u8; 24], ResponseError> {
        self.lm_response
            .ok_or(ResponseError::MissingPassword)
    }

    pub fn server_challenge(&self) -> [u8; 8] {
        self.server_challenge
    }

    /// Renders the response in the Hashcat NetNTLMv1 format (mode 5500):
    /// `<username>::<domain>:<lm response>:<nt response>:<server challenge>`.
    pub fn hashcat(&self) -> String {
        format!(
            "{}::{}:{}:{}:{}",
            self.username,
            self.domain,
            hex::encode(self.lm_challenge_response()),
            hex::encode(self.response),
            hex::encode(self.server_challenge),
        )
    }
}
impl ResponseProvider for NtlmV1Response {
    /// The LMv1 response, or a copy of the NTLMv1 response if the password is unknown.
    fn lm_challenge_response(&self) -> Vec<u8> {
        Vec::from(self.lm_response.unwrap_or(self.response))
    }

    fn nt_challenge_response(&self) -> Vec<u8> {
        Vec::from(self.response)
    }
}
impl fmt::Display for NtlmV1Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.response))
    }
}
impl fmt::Debug for NtlmV1Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmV1Response")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("server_challenge", &hex::encode(self.server_challenge))
            .finish_non_exhaustive()
    }
}


/// The state from which NTLMv2 and LMv2 responses are calculated.
///
/// The response key is derived once at construction and cached.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct NtlmV2Context {
    username: String,
    domain: String,
    response_key_nt: [u8; 16],
    server_challenge: [u8; 8],
    client_challenge: [u8; 8],
    timestamp: u64,
    target_info: Option<Vec<u8>>,
}
impl NtlmV2Context {
    /// Prepares an NTLMv2 response of `credentials` to `server_challenge`.
    ///
    /// Both challenges must be 8 bytes long. The blob is stamped with the current time of `clock`.
    pub fn new<C: Clock + ?Sized>(
        credentials: &Credentials,
        server_challenge: &[u8],
        client_challenge: &[u8],
        clock: &C,
    ) -> Result<Self, ResponseError> {
        let server_challenge = challenge_from_slice("server", server_challenge)?;
        let client_challenge = challenge_from_slice("client", client_challenge)?;
        let nt_hash = credentials.secret_nt_hash()?;

        let response_key_nt = response_key_nt(&nt_hash, &credentials.username, &credentials.domain);

        Ok(Self {
            username: credentials.username.clone(),
            domain: credentials.domain.clone(),
            response_key_nt,
            server_challenge,
            client_challenge,
            timestamp: clock.filetime_now(),
            target_info: None,
        })
    }

    /// Replays the server's target information in the blob instead of the domain name.
    pub fn with_target_info(mut self, target_info: Vec<u8>) -> Self {
        self.target_info = Some(target_info);
        self
    }

    pub fn response_key_nt(&self) -> [u8; 16] {
        self.response_key_nt
    }

    pub fn server_challenge(&self) -> [u8; 8] {
        self.server_challenge
    }

    pub fn client_challenge(&self) -> [u8; 8] {
        self.client_challenge
    }

    /// The FILETIME the blob is stamped with.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The client challenge structure ("blob") that follows the proof in the NT response.
    pub fn blob(&self) -> Vec<u8> {
        let trailer = match &self.target_info {
            Some(ti) => ti.clone(),
            None => utf16_le_bytes(&self.domain),
        };

        let mut blob = Vec::with_capacity(28 + trailer.len() + 4);
        blob.extend_from_slice(&NTLMV2_BLOB_SIGNATURE);
        blob.extend_from_slice(&[0u8; 6]);
        blob.extend_from_slice(&self.timestamp.to_le_bytes());
        blob.extend_from_slice(&self.client_challenge);
        blob.extend_from_slice(&[0u8; 4]);
        blob.extend_from_slice(&trailer);
        blob.extend_from_slice(&[0u8; 4]);
        blob
    }

    /// HMAC-MD5 of server challenge and blob under the response key.
    pub fn nt_proof(&self) -> [u8; 16] {
        hmac_md5(&self.response_key_nt, &[&self.server_challenge[..], &self.blob()[..]])
    }

    /// The NTLMv2 response: the proof followed by the blob.
    pub fn nt_response(&self) -> Vec<u8> {
        let blob = self.blob();
        let proof = hmac_md5(&self.response_key_nt, &[&self.server_challenge[..], &blob[..]]);

        let mut ret = Vec::with_capacity(16 + blob.len());
        ret.extend_from_slice(&proof);
        ret.extend_from_slice(&blob);
        ret
    }

    /// The LMv2 response: HMAC-MD5 of both challenges followed by the client challenge.
    pub fn lm_response(&self) -> [u8; 24] {
        let mac = hmac_md5(&self.response_key_nt, &[&self.server_challenge[..], &self.client_challenge[..]]);
        let mut ret = [0u8; 24];
        ret[..16].copy_from_slice(&mac);
        ret[16..].copy_from_slice(&self.client_challenge);
        ret
    }

    /// Renders the response as
    /// `<username>::<domain>:<server challenge>:<client challenge>:<nt response>`.
    pub fn hashcat(&self) -> String {
        format!(
            "{}::{}:{}:{}:{}",
            self.username,
            self.domain,
            hex::encode(self.server_challenge),
            hex::encode(self.client_challenge),
            hex::encode(self.nt_response()),
        )
    }
}
impl ResponseProvider for NtlmV2Context {
    fn lm_challenge_response(&self) -> Vec<u8> {
        Vec::from(self.lm_response())
    }

    fn nt_challenge_response(&self) -> Vec<u8> {
        self.nt_response()
    }
}
impl fmt::Debug for NtlmV2Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmV2Context")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("server_challenge", &hex::encode(self.server_challenge))
            .field("client_challenge", &hex::encode(self.client_challenge))
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}


/// Derives the NTLMv2 response key: HMAC-MD5 keyed with the NT hash over the uppercased username
/// followed by the uppercased domain, both in UTF-16LE.
pub fn response_key_nt(nt_hash: &NtHash, username: &str, domain: &str) -> [u8; 16] {
    let mut identity = username.to_uppercase();
    identity.push_str(&domain.to_uppercase());
    hmac_md5(nt_hash.as_bytes(), &[utf16_le_bytes(&identity).as_slice()])
}
