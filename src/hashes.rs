//! Password hashes: NT, LM and the domain cached credentials derived from them.


use std::fmt;
use std::str::FromStr;

use crate::crypto::{des_encrypt_block, expand_des_key, pbkdf2_hmac_sha1};
use crate::md4::Md4;
use crate::oem::rust_string_to_oem_uppercase;


/// The fixed plaintext encrypted by the LM hash.
const LM_MAGIC: [u8; 8] = *b"KGS!@#$%";

/// The number of password bytes that contribute to the LM hash.
const LM_PASSWORD_LEN: usize = 14;


/// An NT hash: MD4 over the UTF-16LE encoding of a password.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NtHash([u8; 16]);
impl NtHash {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}
impl From<[u8; 16]> for NtHash {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}
impl From<NtHash> for [u8; 16] {
    fn from(hash: NtHash) -> Self {
        hash.0
    }
}
impl fmt::Display for NtHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
impl FromStr for NtHash {
    type Err = NtHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(NtHashParseError::InvalidLength { obtained: s.len() });
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)
            .or(Err(NtHashParseError::InvalidHex))?;
        Ok(Self(bytes))
    }
}
impl TryFrom<&str> for NtHash {
    type Error = NtHashParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}
impl TryFrom<&[u8]> for NtHash {
    type Error = NtHashParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 16] = value.try_into()
            .or(Err(NtHashParseError::InvalidLength { obtained: value.len() }))?;
        Ok(Self(bytes))
    }
}

/// An error that may occur while reading an NT hash.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NtHashParseError {
    /// The value does not have the length of an NT hash (16 bytes or 32 hex digits).
    InvalidLength { obtained: usize },

    /// The value contains characters that are not hex digits.
    InvalidHex,
}
impl fmt::Display for NtHashParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { obtained }
                => write!(f, "an NT hash is 16 bytes or 32 hex digits long, obtained {}", obtained),
            Self::InvalidHex
                => write!(f, "the NT hash contains non-hex characters"),
        }
    }
}
impl std::error::Error for NtHashParseError {
}


/// Encodes a string as UTF-16 in little-endian byte order, without a Byte Order Mark.
pub(crate) fn utf16_le_bytes(string: &str) -> Vec<u8> {
    string.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}


/// Calculates the NT hash of a password.
///
/// The password is encoded as UTF-16 in little-endian byte order (without the Byte Order Mark)
/// and hashed using MD4.
pub fn nt_hash(password: &str) -> NtHash {
    NtHash(Md4::digest(&utf16_le_bytes(password)))
}


/// Calculates the LM hash of a password.
///
/// ```plain
///            ┌────────────┐  ┌───────────────┐  ┌─────────────┐
/// password ──┤ convert to ├──┤ encode using  ├──┤ truncate or ├──┐
///            │ uppercase  │  │ OEM codepage  │  │ pad to 14 B │  │
///            └────────────┘  └───────────────┘  └─────────────┘  │
///           ┌────────────────────────────────────────────────────┘
///           │┌───────┐
///           └┤ split │           "KGS!@#$%"
///            └─┬───┬─┘               │ input
///         0..7 │   │ 7..14    key ┌──┴──┐ output
///              │   └──────────────┤ DES ├────────────┐
///              │                  └─────┘            │ 0..8
///              │                                  ┌──┴───┐
///              │                 "KGS!@#$%"       │ join ├──── hash
///              │                     │ input      └──┬───┘
///              │              key ┌──┴──┐ output     │ 8..16
///              └──────────────────┤ DES ├────────────┘
///                                 └─────┘
/// ```
///
/// Each 7-byte half becomes a DES key by spreading its bits over 8 bytes; parity bits are left
/// clear.
pub fn lm_hash(password: &str) -> [u8; 16] {
    let mut password_bytes = rust_string_to_oem_uppercase(password);
    password_bytes.resize(LM_PASSWORD_LEN, 0x00);

    let mut output = [0u8; 16];
    for (half, out) in password_bytes.chunks_exact(7).zip(output.chunks_exact_mut(8)) {
        let mut key = [0u8; 7];
        key.copy_from_slice(half);
        out.copy_from_slice(&des_encrypt_block(expand_des_key(key), LM_MAGIC));
    }
    output
}


/// Calculates the Domain Cached Credentials (DCC, "MS-Cache v1") hash from a password.
pub fn dcc_hash(password: &str, username: &str) -> [u8; 16] {
    dcc_hash_from_nt_hash(&nt_hash(password), username)
}

/// Calculates the Domain Cached Credentials hash from an NT hash.
///
/// The hash is MD4 over the NT hash followed by the lowercased username in UTF-16LE.
pub fn dcc_hash_from_nt_hash(nt_hash: &NtHash, username: &str) -> [u8; 16] {
    let mut md4 = Md4::new();
    md4.write(nt_hash.as_bytes());
    md4.write(&utf16_le_bytes(&username.to_lowercase()));
    md4.sum()
}

/// Renders the DCC hash in the Hashcat format (mode 1100): `<hex>:<lowercase username>`.
pub fn dcc_hashcat(password: &str, username: &str) -> String {
    format!("{}:{}", hex::encode(dcc_hash(password, username)), username.to_lowercase())
}


/// Calculates the Domain Cached Credentials v2 (DCC2, "MS-Cache v2") hash.
///
/// The DCC hash is stretched with PBKDF2-HMAC-SHA1 over `rounds` iterations, salted with the
/// lowercased username in UTF-16LE.
pub fn dcc2_hash(username: &str, password: &str, rounds: u32) -> [u8; 16] {
    let dcc = dcc_hash(password, username);
    let salt = utf16_le_bytes(&username.to_lowercase());
    pbkdf2_hmac_sha1(&dcc, &salt, rounds)
}

/// Renders the DCC2 hash in the Hashcat format (mode 2100): `$DCC2$<rounds>#<username>#<hex>`.
///
/// The username appears as given even though the hash itself was calculated from its lowercase
/// form.
pub fn dcc2_hashcat(username: &str, password: &str, rounds: u32) -> String {
    format!("$DCC2${}#{}#{}", rounds, username, hex::encode(dcc2_hash(username, password, rounds)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("", hex!("31d6cfe0d16ae931b73c59d7e0c089c0"))]
    #[case("password", hex!("8846f7eaee8fb117ad06bdd830b7586c"))]
    #[case("Password", hex!("a4f49c406510bdcab6824ee7c30fd852"))]
    #[case("cG9kYWxpcml1cwo", hex!("625d671c4b67f53df60c694e690bf5ac"))]
    fn nt_hashes(#[case] password: &str, #[case] expected: [u8; 16]) {
        assert_eq!(nt_hash(password).as_bytes(), &expected);
    }

    #[rstest]
    #[case("", hex!("aad3b435b51404eeaad3b435b51404ee"))]
    #[case("password", hex!("e52cac67419a9a224a3b108f3fa6cb6d"))]
    #[case("PASSWORD", hex!("e52cac67419a9a224a3b108f3fa6cb6d"))]
    fn lm_hashes(#[case] password: &str, #[case] expected: [u8; 16]) {
        assert_eq!(lm_hash(password), expected);
    }

    #[test]
    fn lm_truncates_at_fourteen() {
        let reference = lm_hash("0123456789abcd");
        assert_eq!(lm_hash("0123456789abcde"), reference);
        assert_eq!(lm_hash("0123456789abcdef"), reference);
        assert_eq!(lm_hash("0123456789ABCD"), reference);
    }

    #[test]
    fn dcc_hashcat_format() {
        assert_eq!(
            dcc_hashcat("cG9kYWxpcml1cwo", "podalirius"),
            "72c257413870227435b474b3542a5c4b:podalirius",
        );
    }

    #[test]
    fn dcc2_hashcat_format() {
        assert_eq!(
            dcc2_hashcat("podalirius", "TheManticoreProject", 10240),
            "$DCC2$10240#podalirius#3c66bcdbefb145a04296693e42e79a91",
        );
        assert_eq!(
            dcc2_hashcat("pOdAlIrIuS", "TheManticoreProject", 10240),
            "$DCC2$10240#pOdAlIrIuS#3c66bcdbefb145a04296693e42e79a91",
        );
    }

    #[test]
    fn nt_hash_text_roundtrip() {
        let hash: NtHash = "8846F7EAEE8FB117AD06BDD830B7586C".parse().unwrap();
        assert_eq!(hash, nt_hash("password"));
        assert_eq!(hash.to_string(), "8846f7eaee8fb117ad06bdd830b7586c");
        assert_eq!(NtHash::try_from("8846f7"), Err(NtHashParseError::InvalidLength { obtained: 6 }));
        assert_eq!(NtHash::try_from("zz46f7eaee8fb117ad06bdd830b7586c"), Err(NtHashParseError::InvalidHex));
        assert_eq!(NtHash::try_from(&[0u8; 15][..]), Err(NtHashParseError::InvalidLength { obtained: 15 }));
    }

    proptest! {
        #[test]
        fn lm_depends_on_first_fourteen_only(prefix in "[ -~]{14}", suffix_a in "[ -~]{0,8}", suffix_b in "[ -~]{0,8}") {
            prop_assert_eq!(lm_hash(&format!("{}{}", prefix, suffix_a)), lm_hash(&format!("{}{}", prefix, suffix_b)));
        }

        #[test]
        fn dcc_ignores_username_case(password in ".{0,20}", username in "[A-Za-z0-9]{1,20}") {
            prop_assert_eq!(dcc_hash(&password, &username), dcc_hash(&password, &username.to_lowercase()));
        }
    }
}
