//! OEM code page conversion.
//!
//! The OEM code page of the machine that produced a message cannot be known from the message
//! itself. This crate treats it as ASCII, which is what every OEM code page agrees on.


/// The byte substituted for characters that the OEM code page cannot represent.
const DEFAULT_CHAR: u8 = b'?';


/// Converts the given OEM string into a Rust string.
pub fn oem_string_to_rust(oem_string: &[u8]) -> Option<String> {
    if !oem_string.is_ascii() {
        return None;
    }
    String::from_utf8(Vec::from(oem_string)).ok()
}


/// Converts the given Rust string into an OEM string.
///
/// Returns `None` if the string contains characters outside the OEM code page.
pub fn rust_string_to_oem(rust_str: &str) -> Option<Vec<u8>> {
    if !rust_str.is_ascii() {
        return None;
    }
    Some(Vec::from(rust_str.as_bytes()))
}


/// Uppercases the given string and converts it into an OEM string, replacing characters that
/// cannot be represented with `?` as the Windows best-fit conversion does.
pub fn rust_string_to_oem_uppercase(rust_str: &str) -> Vec<u8> {
    rust_str.chars()
        .map(|c| if c.is_ascii() { c.to_ascii_uppercase() as u8 } else { DEFAULT_CHAR })
        .collect()
}

/// Like [`rust_string_to_oem_uppercase`], but returns the OEM bytes as a string for fields that
/// are encoded later on.
pub fn oem_uppercase(rust_str: &str) -> String {
    rust_string_to_oem_uppercase(rust_str).into_iter()
        .map(char::from)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_roundtrip() {
        let bytes = rust_string_to_oem("WORKGROUP").unwrap();
        assert_eq!(bytes, b"WORKGROUP");
        assert_eq!(oem_string_to_rust(&bytes).unwrap(), "WORKGROUP");
    }

    #[test]
    fn non_ascii_is_rejected() {
        assert_eq!(rust_string_to_oem("Stra\u{DF}e"), None);
        assert_eq!(oem_string_to_rust(&[0x41, 0xE9]), None);
    }

    #[test]
    fn uppercase_replaces_unrepresentable() {
        assert_eq!(rust_string_to_oem_uppercase("p\u{E4}ss"), b"P?SS");
        assert_eq!(rust_string_to_oem_uppercase(""), b"");
        assert_eq!(oem_uppercase("ws-\u{E9}1"), "WS-?1");
    }
}
