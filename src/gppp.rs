//! Group Policy Preferences passwords.
//!
//! Group Policy Preferences stored passwords (the `cpassword` attribute) encrypted with AES-CBC
//! under a key that Microsoft published in [MS-GPPREF] 2.2.1.1.4, and an all-zero IV. The
//! plaintext is UTF-16LE with PKCS#7 padding; the ciphertext is base64-encoded.


use std::fmt;

use aes::Aes256;
use base64::prelude::{BASE64_STANDARD, Engine};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cipher::block_padding::NoPadding;

use crate::hashes::utf16_le_bytes;
use crate::pkcs7::{self, PaddingError};


type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;


/// The published Group Policy Preferences key.
pub const GPPP_KEY: [u8; 32] = [
    0x4e, 0x99, 0x06, 0xe8, 0xfc, 0xb6, 0x6c, 0xc9, 0xfa, 0xf4, 0x93, 0x10, 0x62, 0x0f, 0xfe, 0xe8,
    0xf4, 0x96, 0xe8, 0x06, 0xcc, 0x05, 0x79, 0x90, 0x20, 0x9b, 0x09, 0xa4, 0x33, 0xb6, 0x6c, 0x1b,
];

const GPPP_IV: [u8; 16] = [0; 16];

const AES_BLOCK_SIZE: usize = 16;


/// An error that may occur while encrypting or decrypting a Group Policy Preferences password.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum GpppError {
    /// The input is not valid base64, even after its padding has been repaired.
    Base64Decode { message: String },

    /// The ciphertext is not a whole number of AES blocks.
    BlockAlign { length: usize },

    /// The cipher rejected the key or IV.
    CipherInit,

    /// The decrypted plaintext does not end in valid PKCS#7 padding.
    Unpad(PaddingError),

    /// The decrypted plaintext is not valid UTF-16.
    InvalidUtf16,
}
impl fmt::Display for GpppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64Decode { message }
                => write!(f, "failed to decode base64: {}", message),
            Self::BlockAlign { length }
                => write!(f, "ciphertext length {} is not a multiple of {}", length, AES_BLOCK_SIZE),
            Self::CipherInit
                => write!(f, "failed to initialize the AES cipher"),
            Self::Unpad(e)
                => write!(f, "failed to remove padding: {}", e),
            Self::InvalidUtf16
                => write!(f, "the decrypted password is not valid UTF-16"),
        }
    }
}
impl std::error::Error for GpppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unpad(e) => Some(e),
            _ => None,
        }
    }
}
impl From<PaddingError> for GpppError {
    fn from(e: PaddingError) -> Self {
        Self::Unpad(e)
    }
}


/// Repairs the padding of base64 taken from a `cpassword` attribute, which is usually stored
/// without its trailing `=` characters.
fn repair_base64_padding(encoded: &str) -> String {
    let mut ret = encoded.trim().to_owned();
    match ret.len() % 4 {
        2 => ret.push_str("=="),
        3 => ret.push('='),
        1 => { ret.pop(); },
        _ => {},
    }
    ret
}


/// Encrypts a password the way Group Policy Preferences store it.
pub fn encrypt(plaintext: &str) -> Result<String, GpppError> {
    let padded = pkcs7::pad(&utf16_le_bytes(plaintext), AES_BLOCK_SIZE)?;

    let cipher = Aes256CbcEnc::new_from_slices(&GPPP_KEY, &GPPP_IV)
        .or(Err(GpppError::CipherInit))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&padded);

    Ok(BASE64_STANDARD.encode(ciphertext))
}


/// Decrypts a Group Policy Preferences password.
pub fn decrypt(encoded: &str) -> Result<String, GpppError> {
    let ciphertext = BASE64_STANDARD.decode(repair_base64_padding(encoded))
        .map_err(|e| GpppError::Base64Decode { message: e.to_string() })?;
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(GpppError::BlockAlign { length: ciphertext.len() });
    }

    let cipher = Aes256CbcDec::new_from_slices(&GPPP_KEY, &GPPP_IV)
        .or(Err(GpppError::CipherInit))?;
    let padded = cipher.decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .or(Err(GpppError::BlockAlign { length: ciphertext.len() }))?;
    let plaintext = pkcs7::unpad(&padded, AES_BLOCK_SIZE)?;

    if plaintext.len() % 2 != 0 {
        return Err(GpppError::InvalidUtf16);
    }
    let words: Vec<u16> = plaintext.chunks_exact(2)
        .map(|chk| u16::from_le_bytes([chk[0], chk[1]]))
        .collect();
    String::from_utf16(&words)
        .or(Err(GpppError::InvalidUtf16))
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const PODALIRIUS: &str = "bdajdgpjZqolVYI3h2O2mp+JpxDuZd0xoi2M86z7JuI=";

    #[test]
    fn known_ciphertext() {
        assert_eq!(decrypt(PODALIRIUS).unwrap(), "Podalirius");
        assert_eq!(encrypt("Podalirius").unwrap(), PODALIRIUS);
    }

    #[rstest]
    #[case("bdajdgpjZqolVYI3h2O2mp+JpxDuZd0xoi2M86z7JuI")]
    #[case("bdajdgpjZqolVYI3h2O2mp+JpxDuZd0xoi2M86z7JuI=")]
    #[case(" bdajdgpjZqolVYI3h2O2mp+JpxDuZd0xoi2M86z7JuI=\n")]
    fn tolerates_missing_padding(#[case] encoded: &str) {
        assert_eq!(decrypt(encoded).unwrap(), "Podalirius");
    }

    #[rstest]
    #[case("QUJD", "QUJD")]
    #[case("QUI", "QUI=")]
    #[case("QQ", "QQ==")]
    #[case("QUJDR", "QUJD")]
    fn padding_repair(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(repair_base64_padding(input), expected);
    }

    #[test]
    fn rejects_misaligned_ciphertext() {
        // 12 bytes of ciphertext
        assert_eq!(decrypt("AAAAAAAAAAAAAAAA"), Err(GpppError::BlockAlign { length: 12 }));
        assert_eq!(decrypt(""), Err(GpppError::BlockAlign { length: 0 }));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(decrypt("!!!!"), Err(GpppError::Base64Decode { .. })));
    }

    #[test]
    fn rejects_unpadded_plaintext() {
        let cipher = Aes256CbcEnc::new_from_slices(&GPPP_KEY, &GPPP_IV).unwrap();
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&[0u8; 16]);
        assert_eq!(
            decrypt(&BASE64_STANDARD.encode(ciphertext)),
            Err(GpppError::Unpad(PaddingError::InvalidPadding)),
        );
    }

    #[test]
    fn rejects_odd_length_plaintext() {
        let padded = pkcs7::pad(b"abc", AES_BLOCK_SIZE).unwrap();
        let cipher = Aes256CbcEnc::new_from_slices(&GPPP_KEY, &GPPP_IV).unwrap();
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&padded);
        assert_eq!(decrypt(&BASE64_STANDARD.encode(ciphertext)), Err(GpppError::InvalidUtf16));
    }

    proptest! {
        #[test]
        fn roundtrip(password in "\\PC{0,40}") {
            let encrypted = encrypt(&password).unwrap();
            prop_assert_eq!(decrypt(&encrypted).unwrap(), password);
        }
    }
}
