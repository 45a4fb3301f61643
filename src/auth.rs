//! The client side of the SPNEGO-wrapped NTLM handshake.
//!
//! ```plain
//! Initial ──create_negotiate_token──▶ Negotiated ──accept_challenge──▶ Challenged
//!                                                                         │
//!                     Authenticated ◀──────create_authenticate_token──────┘
//! ```
//!
//! [`NtlmAuth::process_challenge_token`] performs the last two steps at once. A SPNEGO Reject moves
//! the handshake to [`AuthState::Rejected`]; any other failure moves it to [`AuthState::Failed`].
//! Both are terminal.


use std::fmt;
use std::mem;

use rand::{CryptoRng, RngCore};
use rand::rngs::OsRng;
use tracing::{debug, warn};

use crate::Flags;
use crate::message::{
    AuthenticateMessage, ChallengeMessage, NegotiateMessage, OsVersion, ParsingError, StoringError,
};
use crate::message::target_info::AV_FLAG_MIC_PRESENT;
use crate::oem::oem_uppercase;
use crate::response::{
    Clock, Credentials, NtlmV1Response, NtlmV2Context, ResponseError, ResponseProvider, SystemClock,
};
use crate::spnego::{
    create_neg_token_init, create_neg_token_resp, NegState, NegTokenResp, NegotiationToken,
    SpnegoError, NTLMSSP_OID,
};


/// Client settings that are not part of the credentials.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AuthConfig {
    /// The name of this machine, announced to the server. May be empty.
    pub workstation: String,

    /// Whether to request Unicode strings. The server has the final say.
    pub unicode: bool,

    /// The version announced in the Negotiate and Authenticate messages.
    pub os_version: OsVersion,
}
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            workstation: String::new(),
            unicode: true,
            os_version: OsVersion::CLIENT,
        }
    }
}


/// The state of a handshake.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AuthState {
    /// Nothing has been sent yet.
    Initial,

    /// The Negotiate message has been sent.
    Negotiated { negotiate_flags: Flags },

    /// The server's Challenge message has been accepted.
    Challenged { challenge: ChallengeMessage },

    /// The Authenticate message has been sent.
    Authenticated { challenge: ChallengeMessage },

    /// The server rejected the handshake.
    Rejected,

    /// The handshake failed.
    Failed,
}
impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Negotiated { .. } => "Negotiated",
            Self::Challenged { .. } => "Challenged",
            Self::Authenticated { .. } => "Authenticated",
            Self::Rejected => "Rejected",
            Self::Failed => "Failed",
        }
    }
}


/// An error that may occur during the handshake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthError {
    /// The operation is not valid in the current state.
    WrongState { operation: &'static str, state: &'static str },

    /// The server rejected the handshake.
    Rejected,

    /// A SPNEGO token from the server is malformed.
    Spnego(SpnegoError),

    /// An NTLM message from the server is malformed.
    Ntlm(ParsingError),

    /// An NTLM message could not be serialized.
    Storing(StoringError),

    /// The challenge response could not be calculated.
    Response(ResponseError),
}
impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongState { operation, state }
                => write!(f, "{} is not possible in state {}", operation, state),
            Self::Rejected
                => write!(f, "the server rejected the authentication"),
            Self::Spnego(e)
                => write!(f, "malformed SPNEGO token: {}", e),
            Self::Ntlm(e)
                => write!(f, "malformed NTLM message: {}", e),
            Self::Storing(e)
                => write!(f, "failed to encode NTLM message: {}", e),
            Self::Response(e)
                => write!(f, "failed to calculate the challenge response: {}", e),
        }
    }
}
impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spnego(e) => Some(e),
            Self::Ntlm(e) => Some(e),
            Self::Storing(e) => Some(e),
            Self::Response(e) => Some(e),
            Self::WrongState { .. } | Self::Rejected => None,
        }
    }
}
impl From<SpnegoError> for AuthError {
    fn from(e: SpnegoError) -> Self {
        Self::Spnego(e)
    }
}
impl From<ParsingError> for AuthError {
    fn from(e: ParsingError) -> Self {
        Self::Ntlm(e)
    }
}
impl From<StoringError> for AuthError {
    fn from(e: StoringError) -> Self {
        Self::Storing(e)
    }
}
impl From<ResponseError> for AuthError {
    fn from(e: ResponseError) -> Self {
        Self::Response(e)
    }
}


/// A single NTLM handshake.
///
/// The random source supplies NTLMv2 client challenges and the clock supplies the NTLMv2
/// timestamp.
pub struct NtlmAuth<R = OsRng, C = SystemClock> {
    credentials: Credentials,
    config: AuthConfig,
    state: AuthState,
    rng: R,
    clock: C,
}
impl NtlmAuth<OsRng, SystemClock> {
    pub fn new(credentials: Credentials, config: AuthConfig) -> Self {
        Self::with_rng_and_clock(credentials, config, OsRng, SystemClock)
    }
}
impl<R: RngCore + CryptoRng, C: Clock> NtlmAuth<R, C> {
    pub fn with_rng_and_clock(credentials: Credentials, config: AuthConfig, rng: R, clock: C) -> Self {
        Self {
            credentials,
            config,
            state: AuthState::Initial,
            rng,
            clock,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated { .. })
    }

    fn wrong_state(&self, operation: &'static str) -> AuthError {
        AuthError::WrongState { operation, state: self.state.name() }
    }

    /// Builds the first token: a NegTokenInit carrying the Negotiate message.
    pub fn create_negotiate_token(&mut self) -> Result<Vec<u8>, AuthError> {
        if self.state != AuthState::Initial {
            return Err(self.wrong_state("create_negotiate_token"));
        }

        let mut negotiate = NegotiateMessage::new(&self.credentials.domain, &self.config.workstation, self.config.unicode);
        negotiate.os_version = self.config.os_version;
        let negotiate_bytes = match negotiate.to_bytes() {
            Ok(nb) => nb,
            Err(e) => {
                self.state = AuthState::Failed;
                return Err(e.into());
            },
        };

        let token = create_neg_token_init(&negotiate_bytes);
        debug!(flags = ?negotiate.flags, token_len = token.len(), "NTLM: sending NEGOTIATE");
        self.state = AuthState::Negotiated { negotiate_flags: negotiate.flags };
        Ok(token)
    }

    /// Unwraps and stores the server's Challenge message.
    pub fn accept_challenge(&mut self, token: &[u8]) -> Result<(), AuthError> {
        let negotiate_flags = match &self.state {
            AuthState::Negotiated { negotiate_flags } => *negotiate_flags,
            _ => return Err(self.wrong_state("accept_challenge")),
        };

        match parse_challenge_token(token) {
            Ok(challenge) => {
                debug!(
                    requested = ?negotiate_flags,
                    offered = ?challenge.flags,
                    target_name = %challenge.target_name,
                    target_info_entries = challenge.target_information.len(),
                    "NTLM: received CHALLENGE",
                );
                if challenge.av_flags().map_or(false, |f| f & AV_FLAG_MIC_PRESENT != 0) {
                    debug!("NTLM: server expects a MIC, sending zeros");
                }
                self.state = AuthState::Challenged { challenge };
                Ok(())
            },
            Err(AuthError::Rejected) => {
                warn!("NTLM: server rejected the negotiation");
                self.state = AuthState::Rejected;
                Err(AuthError::Rejected)
            },
            Err(e) => {
                warn!(error = %e, "NTLM: unusable CHALLENGE token");
                self.state = AuthState::Failed;
                Err(e)
            },
        }
    }

    /// Builds the token carrying the Authenticate message in answer to the stored challenge.
    pub fn create_authenticate_token(&mut self) -> Result<Vec<u8>, AuthError> {
        // stays Failed unless the token is built
        let challenge = match mem::replace(&mut self.state, AuthState::Failed) {
            AuthState::Challenged { challenge } => challenge,
            other => {
                self.state = other;
                return Err(self.wrong_state("create_authenticate_token"));
            },
        };

        let authenticate_bytes = self.build_authenticate(&challenge)
            .and_then(|am| am.to_bytes().map_err(AuthError::from))?;

        let token = create_neg_token_resp(None, None, Some(&authenticate_bytes));
        debug!(token_len = token.len(), "NTLM: sending AUTHENTICATE");
        self.state = AuthState::Authenticated { challenge };
        Ok(token)
    }

    /// Processes the server's Challenge token and returns the Authenticate token.
    pub fn process_challenge_token(&mut self, token: &[u8]) -> Result<Vec<u8>, AuthError> {
        self.accept_challenge(token)?;
        self.create_authenticate_token()
    }

    /// Processes the server's last token, which only carries the outcome.
    pub fn process_final_token(&mut self, token: &[u8]) -> Result<(), AuthError> {
        if !self.is_authenticated() {
            return Err(self.wrong_state("process_final_token"));
        }

        let response = match NegTokenResp::parse(token) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "NTLM: unusable final token");
                self.state = AuthState::Failed;
                return Err(e.into());
            },
        };
        match response.neg_state {
            Some(NegState::Reject) => {
                warn!("NTLM: server rejected the authentication");
                self.state = AuthState::Rejected;
                Err(AuthError::Rejected)
            },
            Some(NegState::RequestMic) => {
                warn!("NTLM: server requests a MIC, which is not supported");
                Ok(())
            },
            other => {
                debug!(neg_state = ?other, "NTLM: handshake complete");
                Ok(())
            },
        }
    }

    fn build_authenticate(&mut self, challenge: &ChallengeMessage) -> Result<AuthenticateMessage, AuthError> {
        let mut flags = challenge.flags;
        let unicode = flags.contains(Flags::NEGOTIATE_UNICODE);
        if unicode {
            flags.remove(Flags::NEGOTIATE_OEM);
        }

        let provider: Box<dyn ResponseProvider> = if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY) {
            let mut client_challenge = [0u8; 8];
            self.rng.fill_bytes(&mut client_challenge);
            let mut context = NtlmV2Context::new(&self.credentials, &challenge.challenge, &client_challenge, &self.clock)?;
            if flags.contains(Flags::NEGOTIATE_TARGET_INFO) && !challenge.target_information.is_empty() {
                context = context.with_target_info(challenge.target_info_bytes()?);
            }
            debug!(timestamp = context.timestamp(), "NTLM: answering with NTLMv2");
            Box::new(context)
        } else {
            debug!("NTLM: answering with NTLMv1");
            Box::new(NtlmV1Response::new(&self.credentials, &challenge.challenge)?)
        };

        let (domain_name, workstation_name) = if unicode {
            (self.credentials.domain.clone(), self.config.workstation.clone())
        } else {
            (oem_uppercase(&self.credentials.domain), oem_uppercase(&self.config.workstation))
        };

        Ok(AuthenticateMessage {
            lm_response: provider.lm_challenge_response(),
            ntlm_response: provider.nt_challenge_response(),
            domain_name,
            user_name: self.credentials.username.clone(),
            workstation_name,
            session_key: Vec::new(),
            flags,
            os_version: self.config.os_version,
            mic: [0u8; 16],
        })
    }
}
impl<R, C> fmt::Debug for NtlmAuth<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmAuth")
            .field("credentials", &self.credentials)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}


/// Unwraps the server's second-leg token into its Challenge message.
fn parse_challenge_token(token: &[u8]) -> Result<ChallengeMessage, AuthError> {
    let negotiation = NegotiationToken::parse(token)?;
    if let NegotiationToken::Resp(resp) = &negotiation {
        if resp.neg_state == Some(NegState::Reject) {
            return Err(AuthError::Rejected);
        }
        if let Some(mech) = &resp.supported_mech {
            if mech.as_slice() != NTLMSSP_OID {
                return Err(SpnegoError::UnexpectedOid { obtained: mech.clone() }.into());
            }
        }
    }
    let inner = negotiation.inner_token()
        .ok_or(SpnegoError::NoInnerToken)?;
    let challenge = ChallengeMessage::try_from(inner)?;
    if !challenge.flags.intersects(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_OEM) {
        return Err(ParsingError::NeitherUnicodeNorOem.into());
    }
    Ok(challenge)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, TargetInfoEntry, TargetInfoType};
    use crate::response::FixedClock;
    use crate::spnego::extract_inner_token;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn auth() -> NtlmAuth<StdRng, FixedClock> {
        NtlmAuth::with_rng_and_clock(
            Credentials::with_password("Alice", "Contoso", "Passw0rd"),
            AuthConfig { workstation: "ws01".to_owned(), ..AuthConfig::default() },
            StdRng::seed_from_u64(7),
            FixedClock(0x01d7_f653_9602_d200),
        )
    }

    fn challenge(flags: Flags) -> ChallengeMessage {
        ChallengeMessage {
            target_name: "CONTOSO".to_owned(),
            flags,
            challenge: [1, 2, 3, 4, 5, 6, 7, 8],
            context: [0; 8],
            target_information: vec![
                TargetInfoEntry::from_string(TargetInfoType::NbDomainName, "CONTOSO"),
            ],
            os_version: OsVersion::default(),
        }
    }

    fn server_token(challenge: &ChallengeMessage) -> Vec<u8> {
        create_neg_token_resp(
            Some(NegState::AcceptIncomplete),
            Some(&NTLMSSP_OID),
            Some(&challenge.to_bytes().unwrap()),
        )
    }

    fn authenticate_message(token: &[u8]) -> AuthenticateMessage {
        match Message::try_from(&extract_inner_token(token).unwrap()[..]).unwrap() {
            Message::Authenticate(am) => am,
            other => panic!("expected AUTHENTICATE, obtained {:?}", other),
        }
    }

    #[test]
    fn negotiate_token_carries_negotiate_message() {
        let mut auth = auth();
        let token = auth.create_negotiate_token().unwrap();
        let inner = extract_inner_token(&token).unwrap();
        let negotiate = NegotiateMessage::try_from(&inner[..]).unwrap();
        assert_eq!(negotiate.supplied_domain, "Contoso");
        assert_eq!(negotiate.supplied_workstation, "ws01");
        assert!(matches!(auth.state(), AuthState::Negotiated { .. }));
    }

    #[test]
    fn v2_when_server_offers_extended_session_security() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        let flags = Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_EXTENDED_SESSIONSECURITY | Flags::NEGOTIATE_TARGET_INFO;
        let token = auth.process_challenge_token(&server_token(&challenge(flags))).unwrap();

        let am = authenticate_message(&token);
        assert_eq!(am.lm_response.len(), 24);
        assert!(am.ntlm_response.len() > 24);
        assert_eq!(am.user_name, "Alice");
        assert_eq!(am.domain_name, "Contoso");
        assert_eq!(am.mic, [0u8; 16]);
        // the blob replays the target information
        let target_info = challenge(flags).target_info_bytes().unwrap();
        assert_eq!(&am.ntlm_response[44..44 + target_info.len()], target_info.as_slice());
        assert!(auth.is_authenticated());
    }

    #[test]
    fn v1_without_extended_session_security() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        let token = auth.process_challenge_token(&server_token(&challenge(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM))).unwrap();

        let am = authenticate_message(&token);
        let expected = NtlmV1Response::new(&Credentials::with_password("Alice", "Contoso", "Passw0rd"), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(am.ntlm_response, expected.response().to_vec());
        assert_eq!(am.lm_response, expected.lm_response().unwrap().to_vec());
    }

    #[test]
    fn oem_strings() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        let token = auth.process_challenge_token(&server_token(&challenge(Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_NTLM))).unwrap();

        let am = authenticate_message(&token);
        assert_eq!(am.domain_name, "CONTOSO");
        assert_eq!(am.workstation_name, "WS01");
        assert_eq!(am.user_name, "Alice");
    }

    #[test]
    fn out_of_order_calls() {
        let mut auth = auth();
        assert_eq!(
            auth.process_challenge_token(&[]),
            Err(AuthError::WrongState { operation: "accept_challenge", state: "Initial" }),
        );
        assert_eq!(auth.state(), &AuthState::Initial);
        auth.create_negotiate_token().unwrap();
        assert_eq!(
            auth.create_negotiate_token(),
            Err(AuthError::WrongState { operation: "create_negotiate_token", state: "Negotiated" }),
        );
        assert_eq!(
            auth.create_authenticate_token(),
            Err(AuthError::WrongState { operation: "create_authenticate_token", state: "Negotiated" }),
        );
    }

    #[test]
    fn reject() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        let token = create_neg_token_resp(Some(NegState::Reject), None, None);
        assert_eq!(auth.process_challenge_token(&token), Err(AuthError::Rejected));
        assert_eq!(auth.state(), &AuthState::Rejected);
    }

    #[test]
    fn garbage_fails() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        assert!(matches!(auth.process_challenge_token(&[0xa1, 0x05]), Err(AuthError::Spnego(_))));
        assert_eq!(auth.state(), &AuthState::Failed);
    }

    #[test]
    fn foreign_mechanism_fails() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        // Kerberos
        let kerberos_oid = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
        let message = challenge(Flags::NEGOTIATE_UNICODE).to_bytes().unwrap();
        let token = create_neg_token_resp(Some(NegState::AcceptIncomplete), Some(&kerberos_oid), Some(&message));
        assert_eq!(
            auth.process_challenge_token(&token),
            Err(AuthError::Spnego(SpnegoError::UnexpectedOid { obtained: kerberos_oid.to_vec() })),
        );
        assert_eq!(auth.state(), &AuthState::Failed);
    }

    #[test]
    fn challenge_without_encoding_fails() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        let mut message = challenge(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM).to_bytes().unwrap();
        message[20..24].copy_from_slice(&Flags::NEGOTIATE_NTLM.bits().to_le_bytes());
        let token = create_neg_token_resp(Some(NegState::AcceptIncomplete), None, Some(&message));
        assert_eq!(
            auth.process_challenge_token(&token),
            Err(AuthError::Ntlm(ParsingError::NeitherUnicodeNorOem)),
        );
        assert_eq!(auth.state(), &AuthState::Failed);
    }

    #[test]
    fn missing_secret_fails() {
        let mut auth = NtlmAuth::with_rng_and_clock(
            Credentials::with_password("Alice", "Contoso", ""),
            AuthConfig::default(),
            StdRng::seed_from_u64(7),
            FixedClock(0),
        );
        auth.create_negotiate_token().unwrap();
        assert_eq!(
            auth.process_challenge_token(&server_token(&challenge(Flags::NEGOTIATE_UNICODE))),
            Err(AuthError::Response(ResponseError::MissingSecret)),
        );
        assert_eq!(auth.state(), &AuthState::Failed);
    }

    #[test]
    fn final_token() {
        let mut auth = auth();
        auth.create_negotiate_token().unwrap();
        auth.process_challenge_token(&server_token(&challenge(Flags::NEGOTIATE_UNICODE))).unwrap();

        auth.process_final_token(&create_neg_token_resp(Some(NegState::AcceptCompleted), None, None)).unwrap();
        assert!(auth.is_authenticated());

        assert_eq!(
            auth.process_final_token(&create_neg_token_resp(Some(NegState::Reject), None, None)),
            Err(AuthError::Rejected),
        );
        assert_eq!(auth.state(), &AuthState::Rejected);
    }
}
