// Character set conversion between on-disk DOS bytes and native characters.
// Real code page tables are supplied by callers; only the 7-bit table lives here.

/// Conversion table attached to a stream.
pub trait DosConvert {
    /// Map a native character to its on-disk byte, `None` if unrepresentable.
    fn to_dos(&self, c: char) -> Option<u8>;

    /// Map an on-disk byte to a native character.
    fn to_native(&self, b: u8) -> char;
}

/// Plain 7-bit ASCII; bytes above 0x7F decode to U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiConvert;

impl DosConvert for AsciiConvert {
    fn to_dos(&self, c: char) -> Option<u8> {
        if c.is_ascii() {
            Some(c as u8)
        } else {
            None
        }
    }

    fn to_native(&self, b: u8) -> char {
        if b.is_ascii() {
            char::from(b)
        } else {
            char::REPLACEMENT_CHARACTER
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_round_trip() {
        let cp = AsciiConvert;
        assert_eq!(cp.to_dos('A'), Some(b'A'));
        assert_eq!(cp.to_dos('é'), None);
        assert_eq!(cp.to_native(0x82), char::REPLACEMENT_CHARACTER);
    }
}
