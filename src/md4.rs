//! Streaming MD4 (RFC 1320).
//!
//! Every NT-derived value in this crate starts with MD4. The state lives entirely within the
//! [`Md4`] value; a fresh hasher is created for every operation.


use digest::Digest;


/// A streaming MD4 hasher.
#[derive(Clone, Debug, Default)]
pub struct Md4 {
    state: md4::Md4,
}
impl Md4 {
    /// Creates a new hasher over the empty message.
    pub fn new() -> Self {
        Self {
            state: <md4::Md4 as Digest>::new(),
        }
    }

    /// Feeds more bytes into the hasher. May be called any number of times; partial blocks are
    /// buffered until the next call or [`Md4::sum`].
    pub fn write(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }

    /// Pads the message and returns its 16-byte digest.
    pub fn sum(self) -> [u8; 16] {
        let mut ret = [0u8; 16];
        ret.copy_from_slice(self.state.finalize().as_slice());
        ret
    }

    /// Hashes a single byte slice.
    pub fn digest(bytes: &[u8]) -> [u8; 16] {
        let mut md4 = Self::new();
        md4.write(bytes);
        md4.sum()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use rstest::rstest;

    #[rstest]
    #[case(b"", hex!("31d6cfe0d16ae931b73c59d7e0c089c0"))]
    #[case(b"a", hex!("bde52cb31de33e46245e05fbdbd6fb24"))]
    #[case(b"abc", hex!("a448017aaf21d8525fc10ae87aa6729d"))]
    #[case(b"message digest", hex!("d9130a8164549fe818874806e1c7014b"))]
    #[case(b"abcdefghijklmnopqrstuvwxyz", hex!("d79e1c308aa5bbcdeea8ed63df412da9"))]
    #[case(
        b"12345678901234567890123456789012345678901234567890123456789012345678901234567890",
        hex!("e33b4ddc9c38f2199c3e7b164fcc0536")
    )]
    fn rfc1320_vectors(#[case] input: &[u8], #[case] expected: [u8; 16]) {
        assert_eq!(Md4::digest(input), expected);
    }

    #[test]
    fn split_writes_match_single_write() {
        let message = b"12345678901234567890123456789012345678901234567890123456789012345678901234567890";
        let mut md4 = Md4::new();
        for chunk in message.chunks(7) {
            md4.write(chunk);
        }
        assert_eq!(md4.sum(), Md4::digest(message));
    }

    #[test]
    fn hashers_do_not_share_state() {
        let mut first = Md4::new();
        first.write(b"abc");
        let second = Md4::new();
        assert_eq!(second.sum(), hex!("31d6cfe0d16ae931b73c59d7e0c089c0"));
        assert_eq!(first.sum(), hex!("a448017aaf21d8525fc10ae87aa6729d"));
    }
}
