//! Byte-level transcoding between catalog encodings

use crate::catalog::{self, Codec};

/// Outcome of a conversion
///
/// On failure `bytes` holds the original input, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub bytes: Vec<u8>,
    pub success: bool,
}

impl Conversion {
    fn converted(bytes: Vec<u8>) -> Self {
        Self { bytes, success: true }
    }

    fn failed(original: &[u8]) -> Self {
        Self {
            bytes: original.to_vec(),
            success: false,
        }
    }
}

/// Re-encode `bytes` from `from` to `to`.
///
/// Identical encodings (after normalization) return the input as-is without
/// a decode/encode round trip, so even malformed bytes survive. Unsupported
/// names, malformed input, and unrepresentable characters all report
/// `success == false`; the caller decides whether to copy the file verbatim.
pub fn convert(bytes: &[u8], from: &str, to: &str) -> Conversion {
    if catalog::same_encoding(from, to) {
        return Conversion::converted(bytes.to_vec());
    }

    let (Some(decoder), Some(encoder)) = (Codec::for_name(from), Codec::for_name(to)) else {
        return Conversion::failed(bytes);
    };

    let Some(text) = decoder.decode(bytes) else {
        return Conversion::failed(bytes);
    };

    match encoder.encode(&text) {
        Some(encoded) => Conversion::converted(encoded.into_owned()),
        None => Conversion::failed(bytes),
    }
}
