//! Windows identity primitives and an NTLM client.
//!
//! The crate has two halves:
//!
//! * password-derived values: NT and LM hashes ([`hashes`]), domain cached credentials
//!   ([`hashes::dcc_hash`], [`hashes::dcc2_hash`]), NTLMv1 and NTLMv2 challenge responses
//!   ([`response`]) and Group Policy Preferences passwords ([`gppp`])
//! * the three-message NTLM handshake ([`message`]) wrapped in SPNEGO ([`spnego`]) and driven by
//!   the state machine in [`auth`]
//!
//! Sample usage:
//! ```no_run
//! use winident::{AuthConfig, Credentials, NtlmAuth};
//!
//! fn send_to_server(token: &[u8]) -> Vec<u8> {
//!     // the transport (SMB, HTTP, LDAP...) goes here
//!     unimplemented!()
//! }
//!
//! let credentials = Credentials::with_password("alice", "CONTOSO", "Passw0rd");
//! let config = AuthConfig { workstation: "WS01".to_owned(), ..AuthConfig::default() };
//! let mut auth = NtlmAuth::new(credentials, config);
//!
//! let negotiate = auth.create_negotiate_token()
//!     .expect("failed to build NEGOTIATE");
//! let challenge = send_to_server(&negotiate);
//! let authenticate = auth.process_challenge_token(&challenge)
//!     .expect("failed to answer CHALLENGE");
//! let outcome = send_to_server(&authenticate);
//! auth.process_final_token(&outcome)
//!     .expect("authentication failed");
//! ```


pub mod auth;
pub mod crypto;
pub mod gppp;
pub mod hashes;
pub mod md4;
pub mod message;
pub mod oem;
pub mod pkcs7;
pub mod response;
pub mod spnego;


use bitflags::bitflags;

pub use crate::auth::{AuthConfig, AuthError, AuthState, NtlmAuth};
pub use crate::hashes::{
    dcc2_hash, dcc2_hashcat, dcc_hash, dcc_hash_from_nt_hash, dcc_hashcat, lm_hash, nt_hash, NtHash,
};
pub use crate::message::{
    AuthenticateMessage, ChallengeMessage, Message, NegotiateMessage, OsVersion, ParsingError,
    StoringError, TargetInfoEntry, TargetInfoType,
};
pub use crate::response::{
    Clock, Credentials, FixedClock, NtlmV1Response, NtlmV2Context, ResponseError, ResponseProvider,
    SystemClock,
};


bitflags! {
    /// NTLM negotiation flags, as carried by all three messages.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const UNKNOWN_8 = 0x0000_0008;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        const NEGOTIATE_LM_KEY = 0x0000_0080;
        const NEGOTIATE_NETWARE = 0x0000_0100;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const UNKNOWN_400 = 0x0000_0400;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        const NEGOTIATE_OEM_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_OEM_WORKSTATION_SUPPLIED = 0x0000_2000;
        const UNKNOWN_4000 = 0x0000_4000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const UNKNOWN_40000 = 0x0004_0000;

        /// Selects NTLMv2 responses in this client.
        const NEGOTIATE_EXTENDED_SESSIONSECURITY = 0x0008_0000;

        const NEGOTIATE_IDENTIFY = 0x0010_0000;
        const UNKNOWN_200000 = 0x0020_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        const UNKNOWN_1000000 = 0x0100_0000;
        const NEGOTIATE_VERSION = 0x0200_0000;
        const UNKNOWN_4000000 = 0x0400_0000;
        const UNKNOWN_8000000 = 0x0800_0000;
        const UNKNOWN_10000000 = 0x1000_0000;
        const NEGOTIATE_128BIT = 0x2000_0000;
        const NEGOTIATE_KEY_EXCH = 0x4000_0000;
        const NEGOTIATE_56BIT = 0x8000_0000;
    }
}
