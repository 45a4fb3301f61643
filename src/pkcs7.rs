//! PKCS#7 padding.
//!
//! Unpadding runs in constant time with respect to the buffer contents: every candidate padding
//! byte is compared, the results are folded into a single [`Choice`], and only that is branched on.


use std::fmt;

use subtle::{Choice, ConstantTimeEq, ConstantTimeGreater, ConstantTimeLess};


/// An error that may occur while removing PKCS#7 padding.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PaddingError {
    /// The buffer is empty.
    EmptyBuffer,

    /// The padding is malformed.
    InvalidPadding,

    /// The block size is not in the range `1..=255`.
    InvalidBlockSize { block_size: usize },
}
impl fmt::Display for PaddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBuffer
                => write!(f, "cannot unpad an empty buffer"),
            Self::InvalidPadding
                => write!(f, "invalid padding"),
            Self::InvalidBlockSize { block_size }
                => write!(f, "block size {} is not between 1 and 255", block_size),
        }
    }
}
impl std::error::Error for PaddingError {
}


fn block_size_u8(block_size: usize) -> Result<u8, PaddingError> {
    match u8::try_from(block_size) {
        Ok(0) | Err(_) => Err(PaddingError::InvalidBlockSize { block_size }),
        Ok(bs) => Ok(bs),
    }
}


/// Returns a copy of `message` padded to a multiple of `block_size`.
///
/// At least one byte of padding is always added; a message that already fills its last block
/// receives a whole block of padding.
pub fn pad(message: &[u8], block_size: usize) -> Result<Vec<u8>, PaddingError> {
    let bs = block_size_u8(block_size)?;
    let pad_len = bs - (message.len() % block_size) as u8;

    let mut ret = Vec::with_capacity(message.len() + usize::from(pad_len));
    ret.extend_from_slice(message);
    ret.resize(message.len() + usize::from(pad_len), pad_len);
    Ok(ret)
}


/// Removes PKCS#7 padding from `buffer`, returning the message.
pub fn unpad(buffer: &[u8], block_size: usize) -> Result<&[u8], PaddingError> {
    let bs = block_size_u8(block_size)?;
    if buffer.is_empty() {
        return Err(PaddingError::EmptyBuffer);
    }
    if buffer.len() % block_size != 0 {
        return Err(PaddingError::InvalidPadding);
    }

    let pad_len = buffer[buffer.len() - 1];
    let mut good: Choice = !pad_len.ct_eq(&0) & !pad_len.ct_gt(&bs);

    // the last block is scanned in full whatever the padding length claims
    let last_block = &buffer[buffer.len() - block_size..];
    for (distance, b) in (0..bs).zip(last_block.iter().rev()) {
        let in_padding = distance.ct_lt(&pad_len);
        good &= !in_padding | b.ct_eq(&pad_len);
    }

    if bool::from(good) {
        Ok(&buffer[..buffer.len() - usize::from(pad_len)])
    } else {
        Err(PaddingError::InvalidPadding)
    }
}
