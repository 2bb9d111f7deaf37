//! Supported encodings and name normalization
//!
//! The catalog is deliberately closed: only the encodings listed in
//! [`SUPPORTED_ENCODINGS`] can be detected, converted from, or converted to.

use std::borrow::Cow;

use encoding_rs::Encoding;

/// Canonical name of UTF-8
pub const UTF_8: &str = "utf-8";
/// Canonical name of EUC-JP
pub const EUC_JP: &str = "euc-jp";
/// Canonical name of Shift_JIS (Windows-31J)
pub const SHIFT_JIS: &str = "shift-jis";
/// Canonical name of ISO-2022-JP (JIS)
pub const ISO_2022_JP: &str = "iso-2022-jp";
/// Pure 7-bit content, a strict subset of UTF-8
pub const ASCII: &str = "ascii";

/// Supported encodings in listing order
pub const SUPPORTED_ENCODINGS: &[&str] = &[UTF_8, EUC_JP, SHIFT_JIS, ISO_2022_JP, ASCII];

// alias -> canonical; keys are lower-case
const ENCODING_ALIASES: &[(&str, &str)] = &[
    ("utf8", UTF_8),
    ("shift_jis", SHIFT_JIS),
    ("sjis", SHIFT_JIS),
    ("windows-31j", SHIFT_JIS),
    ("cp932", SHIFT_JIS),
    ("eucjp", EUC_JP),
    ("euc_jp", EUC_JP),
    ("ujis", EUC_JP),
    ("jis", ISO_2022_JP),
    ("iso2022jp", ISO_2022_JP),
    ("us-ascii", ASCII),
];

/// Normalize an encoding name: lower-case it and resolve known aliases.
///
/// Total and idempotent. Unknown names come back lower-cased but otherwise
/// untouched, so `is_supported` can reject them afterwards.
pub fn normalize(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    ENCODING_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(lower)
}

/// Whether `name` (after normalization) is in the catalog
pub fn is_supported(name: &str) -> bool {
    let normalized = normalize(name);
    SUPPORTED_ENCODINGS.contains(&normalized.as_str())
}

/// Stable enumeration of the catalog for listing
pub fn list() -> Vec<&'static str> {
    SUPPORTED_ENCODINGS.to_vec()
}

/// Compare two encoding names after normalization
pub fn same_encoding(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// A concrete codec for one catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// 7-bit only; decodes and encodes like UTF-8 restricted to ASCII
    Ascii,
    /// Backed by `encoding_rs`
    Standard(&'static Encoding),
}

impl Codec {
    /// Look up the codec for a catalog name; `None` for unsupported names
    pub fn for_name(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            ASCII => Some(Codec::Ascii),
            UTF_8 => Some(Codec::Standard(encoding_rs::UTF_8)),
            EUC_JP => Some(Codec::Standard(encoding_rs::EUC_JP)),
            SHIFT_JIS => Some(Codec::Standard(encoding_rs::SHIFT_JIS)),
            ISO_2022_JP => Some(Codec::Standard(encoding_rs::ISO_2022_JP)),
            _ => None,
        }
    }

    /// Strict decode. BOMs are kept as content and malformed input yields `None`.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            Codec::Ascii => {
                if bytes.is_ascii() {
                    std::str::from_utf8(bytes).ok().map(Cow::Borrowed)
                } else {
                    None
                }
            }
            Codec::Standard(encoding) => {
                encoding.decode_without_bom_handling_and_without_replacement(bytes)
            }
        }
    }

    /// Strict encode; `None` if any character is unrepresentable
    pub fn encode<'a>(&self, text: &'a str) -> Option<Cow<'a, [u8]>> {
        match self {
            Codec::Ascii => text.is_ascii().then(|| Cow::Borrowed(text.as_bytes())),
            Codec::Standard(encoding) => {
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    None
                } else {
                    Some(bytes)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(normalize("CP932"), SHIFT_JIS);
        assert_eq!(normalize("Shift_JIS"), SHIFT_JIS);
        assert_eq!(normalize("ujis"), EUC_JP);
        assert_eq!(normalize("JIS"), ISO_2022_JP);
        assert_eq!(normalize("UTF-8"), UTF_8);
    }

    #[test]
    fn test_normalize_is_total_and_idempotent() {
        for name in ["cp932", "EUC-JP", "koi8-r", "", "Latin1"] {
            let once = normalize(name);
            assert_eq!(normalize(&once), once);
        }
        assert_eq!(normalize("KOI8-R"), "koi8-r");
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("sjis"));
        assert!(is_supported("ascii"));
        assert!(!is_supported("koi8-r"));
        assert!(!is_supported("utf-16le"));
    }

    #[test]
    fn test_list_is_stable() {
        assert_eq!(list(), vec!["utf-8", "euc-jp", "shift-jis", "iso-2022-jp", "ascii"]);
        assert!(list().iter().all(|name| Codec::for_name(name).is_some()));
    }

    #[test]
    fn test_ascii_codec_rejects_high_bytes() {
        assert!(Codec::Ascii.decode(b"plain").is_some());
        assert!(Codec::Ascii.decode(&[0x61, 0xA4]).is_none());
        assert!(Codec::Ascii.encode("caf\u{e9}").is_none());
    }

    #[test]
    fn test_standard_codec_is_strict() {
        let euc = Codec::for_name("euc-jp").unwrap();
        // lone lead byte
        assert!(euc.decode(&[0xA4]).is_none());
        // no EUC-JP mapping for an emoji
        assert!(euc.encode("\u{1F600}").is_none());
    }
}
