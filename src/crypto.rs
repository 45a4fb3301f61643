//! Cipher and MAC building blocks shared by the hash and response calculations.


use cipher::{BlockEncrypt, Key, KeyInit};
use cipher::generic_array::GenericArray;
use des::Des;
use digest::Digest;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;


type HmacMd5 = Hmac<Md5>;


/// Calculates HMAC-MD5 over the concatenation of `parts`.
pub fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    // keys are zero-padded to the block size; longer keys are hashed first
    let mut key_block = Key::<HmacMd5>::default();
    if key.len() > key_block.len() {
        key_block[..16].copy_from_slice(&Md5::digest(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut mac = <HmacMd5 as KeyInit>::new(&key_block);
    for part in parts {
        mac.update(part);
    }
    let mut ret = [0u8; 16];
    ret.copy_from_slice(mac.finalize().into_bytes().as_slice());
    ret
}


/// Derives `N` bytes from `password` and `salt` using PBKDF2 with HMAC-SHA1.
pub fn pbkdf2_hmac_sha1<const N: usize>(password: &[u8], salt: &[u8], rounds: u32) -> [u8; N] {
    let mut ret = [0u8; N];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, rounds, &mut ret);
    ret
}


/// Spreads 56 key bits over 8 bytes, leaving the least significant bit of every byte clear.
///
/// DES ignores that bit, so the result is a valid key even though its parity is not set.
pub fn expand_des_key(key: [u8; 7]) -> [u8; 8] {
    let mut wide = [0u8; 8];
    wide[1..].copy_from_slice(&key);
    let stream = u64::from_be_bytes(wide);

    let mut ret = [0u8; 8];
    for (i, b) in ret.iter_mut().enumerate() {
        // 7-bit groups, most significant first
        let group = (stream >> (49 - 7 * i)) & 0x7F;
        *b = (group as u8) << 1;
    }
    ret
}


/// Expands a 7-byte key to 8 bytes and sets every byte to odd parity.
pub fn parity_adjust(key: [u8; 7]) -> [u8; 8] {
    let mut ret = expand_des_key(key);
    for b in &mut ret {
        if b.count_ones() % 2 == 0 {
            *b |= 0x01;
        }
    }
    ret
}


/// Encrypts a single block with DES.
pub fn des_encrypt_block(key: [u8; 8], data: [u8; 8]) -> [u8; 8] {
    let des = Des::new(&GenericArray::from(key));
    let mut block = GenericArray::from(data);
    des.encrypt_block(&mut block);
    let mut ret = [0u8; 8];
    ret.copy_from_slice(block.as_slice());
    ret
}


/// Performs the DESL operation: encrypts `data` three times under a 16-byte key zero-padded to
/// 21 bytes and split into three 7-byte DES keys.
pub fn des_long(key: [u8; 16], data: [u8; 8]) -> [u8; 24] {
    let mut padded_key = [0u8; 21];
    padded_key[..16].copy_from_slice(&key);

    let mut ret = [0u8; 24];
    for (key_chunk, out_chunk) in padded_key.chunks_exact(7).zip(ret.chunks_exact_mut(8)) {
        let mut key7 = [0u8; 7];
        key7.copy_from_slice(key_chunk);
        out_chunk.copy_from_slice(&des_encrypt_block(parity_adjust(key7), data));
    }
    ret
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn expansion_spreads_bits() {
        assert_eq!(expand_des_key([0xFF; 7]), [0xFE; 8]);
        assert_eq!(expand_des_key([0x00; 7]), [0x00; 8]);
        // the leading bit lands in the top of the first byte, the trailing bit in the last byte
        assert_eq!(expand_des_key([0x80, 0, 0, 0, 0, 0, 0]), [0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(expand_des_key([0, 0, 0, 0, 0, 0, 0x01]), [0, 0, 0, 0, 0, 0, 0, 0x02]);
    }

    #[test]
    fn parity_is_odd() {
        for key in [[0x00; 7], [0xFF; 7], hex!("0123456789abcd"), hex!("a4f49c406510bd")] {
            for b in parity_adjust(key) {
                assert_eq!(b.count_ones() % 2, 1, "byte {:#04x} of {:02x?}", b, key);
            }
            // parity only touches the low bit
            let expanded = expand_des_key(key);
            for (adjusted, plain) in parity_adjust(key).iter().zip(expanded.iter()) {
                assert_eq!(adjusted & 0xFE, *plain);
            }
        }
    }

    #[test]
    fn hmac_md5_rfc2202() {
        let mac = hmac_md5(b"Jefe", &[&b"what do ya want "[..], &b"for nothing?"[..]]);
        assert_eq!(mac, hex!("750c783e6ab0b503eaa86e310a5db738"));

        let long_key = [0xaa; 80];
        let mac = hmac_md5(&long_key, &[&b"Test Using Larger Than Block-Size Key - Hash Key First"[..]]);
        assert_eq!(mac, hex!("6b1ab7fe4bd7bf8f0b62e6ce61b9d0cd"));
    }

    #[test]
    fn pbkdf2_rfc6070() {
        let out: [u8; 20] = pbkdf2_hmac_sha1(b"password", b"salt", 2);
        assert_eq!(out, hex!("ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957"));
    }

    #[test]
    fn des_long_ms_nlmp_vector() {
        // NTOWFv1("Password") against server challenge 0123456789abcdef
        let nt_hash = hex!("a4f49c406510bdcab6824ee7c30fd852");
        let response = des_long(nt_hash, hex!("0123456789abcdef"));
        assert_eq!(response, hex!("67c43011f30298a2ad35ece64f16331c44bdbed927841f94"));
    }
}
