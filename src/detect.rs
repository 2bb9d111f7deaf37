//! Encoding detection

use crate::catalog::{self, Codec};

/// Below this confidence a detection result is low trust and worth a warning
pub const LOW_CONFIDENCE: f64 = 0.7;

// chardetng gives a guess, not a score; a clean decode under the guess
// counts as this confident
const CLEAN_DECODE_CONFIDENCE: f64 = 0.99;

const ESC: u8 = 0x1B;

/// Result of encoding detection
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Normalized catalog name
    pub encoding: String,
    /// Confidence in [0, 1]; exactly 0.0 means detection failed
    pub confidence: f64,
}

impl Detection {
    fn new(encoding: impl Into<String>, confidence: f64) -> Self {
        Self {
            encoding: encoding.into(),
            confidence,
        }
    }

    /// Confidence is at or above [`LOW_CONFIDENCE`]
    pub fn is_confident(&self) -> bool {
        self.confidence >= LOW_CONFIDENCE
    }

    /// The detector produced nothing usable and `encoding` is the fallback
    pub fn failed(&self) -> bool {
        self.confidence == 0.0
    }
}

/// Pure 7-bit content carrying no ISO-2022 escape sequences.
///
/// ISO-2022-JP is itself 7-bit, so an `ESC` disqualifies the content from
/// the ASCII short-circuit and leaves it to the statistical detector.
pub fn is_ascii(bytes: &[u8]) -> bool {
    bytes.is_ascii() && !bytes.contains(&ESC)
}

/// Guess the encoding of `bytes`.
///
/// - empty input is trivially `fallback` with confidence 1.0
/// - pure 7-bit content is `ascii` with confidence 1.0
/// - otherwise `chardetng` guesses; a guess outside the catalog yields
///   `(fallback, 0.0)`
///
/// Never fails.
pub fn detect(bytes: &[u8], fallback: &str) -> Detection {
    let fallback = catalog::normalize(fallback);

    if bytes.is_empty() {
        return Detection::new(fallback, 1.0);
    }

    if is_ascii(bytes) {
        return Detection::new(catalog::ASCII, 1.0);
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, true);

    let name = catalog::normalize(guess.name());
    if !catalog::is_supported(&name) {
        return Detection::new(fallback, 0.0);
    }

    let confidence = match Codec::for_name(&name) {
        Some(Codec::Standard(encoding)) => {
            let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
            if had_errors {
                let total = text.chars().count().max(1);
                let malformed = text.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count();
                CLEAN_DECODE_CONFIDENCE * (1.0 - malformed as f64 / total as f64)
            } else {
                CLEAN_DECODE_CONFIDENCE
            }
        }
        // chardetng never guesses ASCII; non-ASCII bytes can't be it anyway
        Some(Codec::Ascii) | None => return Detection::new(fallback, 0.0),
    };

    Detection::new(name, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAPANESE: &str = "吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。\
        何でも薄暗いじめじめした所でニャーニャー泣いていた事だけは記憶している。";

    fn encode(text: &str, name: &str) -> Vec<u8> {
        Codec::for_name(name).unwrap().encode(text).unwrap().into_owned()
    }

    #[test]
    fn test_empty_is_fallback_with_full_confidence() {
        let detection = detect(b"", "EUC-JP");
        assert_eq!(detection.encoding, "euc-jp");
        assert_eq!(detection.confidence, 1.0);
    }

    #[test]
    fn test_ascii_short_circuit() {
        let detection = detect(b"Hello, world!", "utf-8");
        assert_eq!(detection.encoding, "ascii");
        assert_eq!(detection.confidence, 1.0);
        assert!(detection.is_confident());
    }

    #[test]
    fn test_detect_utf8() {
        let detection = detect(JAPANESE.as_bytes(), "euc-jp");
        assert_eq!(detection.encoding, "utf-8");
        assert!(detection.confidence > 0.0);
    }

    #[test]
    fn test_detect_euc_jp() {
        let detection = detect(&encode(JAPANESE, "euc-jp"), "utf-8");
        assert_eq!(detection.encoding, "euc-jp");
        assert!(detection.is_confident());
    }

    #[test]
    fn test_detect_shift_jis() {
        let detection = detect(&encode(JAPANESE, "shift-jis"), "utf-8");
        assert_eq!(detection.encoding, "shift-jis");
        assert!(detection.is_confident());
    }

    #[test]
    fn test_iso_2022_jp_escapes_skip_ascii_shortcut() {
        let bytes = encode(JAPANESE, "iso-2022-jp");
        assert!(bytes.is_ascii());
        assert!(!is_ascii(&bytes));
        assert_ne!(detect(&bytes, "utf-8").encoding, "ascii");
    }

    #[test]
    fn test_unsupported_guess_falls_back_with_zero_confidence() {
        // Cyrillic in windows-1251 is outside the catalog
        let (bytes, _, _) = encoding_rs::WINDOWS_1251
            .encode("Съешь же ещё этих мягких французских булок, да выпей чаю.");
        let detection = detect(&bytes, "euc-jp");
        assert_eq!(detection.encoding, "euc-jp");
        assert!(detection.failed());
        assert!(!detection.is_confident());
    }
}
