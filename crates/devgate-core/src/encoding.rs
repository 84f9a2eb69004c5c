//! Text encodings for the text send/broadcast overloads.
//!
//! The wire is raw bytes.  When the embedding application hands the server a
//! string instead of bytes, it also names the encoding the devices expect.

/// Supported text encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// UTF-16, little-endian, no byte-order mark.
    Utf16Le,
    /// UTF-16, big-endian, no byte-order mark.
    Utf16Be,
    /// 7-bit ASCII; characters outside the range become `?`.
    Ascii,
}

impl TextEncoding {
    /// Encodes `text` into the bytes that go on the wire.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_is_passthrough() {
        assert_eq!(TextEncoding::Utf8.encode("hé"), "hé".as_bytes());
    }

    #[test]
    fn test_utf16_le_and_be_byte_order() {
        assert_eq!(TextEncoding::Utf16Le.encode("A"), vec![0x41, 0x00]);
        assert_eq!(TextEncoding::Utf16Be.encode("A"), vec![0x00, 0x41]);
    }

    #[test]
    fn test_ascii_replaces_non_ascii_chars() {
        assert_eq!(TextEncoding::Ascii.encode("a→b"), b"a?b");
    }

    #[test]
    fn test_default_is_utf8() {
        assert_eq!(TextEncoding::default(), TextEncoding::Utf8);
    }
}
