//! Conversion and watch configuration

use std::time::Duration;

use crate::catalog;
use crate::classify::ExcludeSet;
use crate::error::ConfigError;

/// Default target encoding
pub const DEFAULT_TO_ENCODING: &str = catalog::UTF_8;

/// Default poll interval in seconds
pub const DEFAULT_WATCH_INTERVAL_SECS: f64 = 1.0;

/// Options shared by one-shot conversion and the sync engine
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Source encoding; `None` means detect per file
    pub from_encoding: Option<String>,
    /// Encoding of the mirrored tree
    pub to_encoding: String,
    /// Files above this many bytes are copied, not converted
    pub max_size: Option<u64>,
    /// Paths never converted, scanned, or propagated
    pub exclude: ExcludeSet,
    /// Source encoding for content that gives no signal of its own
    pub fallback_charset: Option<String>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            from_encoding: None,
            to_encoding: DEFAULT_TO_ENCODING.to_string(),
            max_size: None,
            exclude: ExcludeSet::empty(),
            fallback_charset: None,
        }
    }
}

impl ConvertConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_from_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.from_encoding = Some(encoding.into());
        self
    }

    pub fn with_to_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.to_encoding = encoding.into();
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn with_exclude(mut self, exclude: ExcludeSet) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_fallback_charset(mut self, encoding: impl Into<String>) -> Self {
        self.fallback_charset = Some(encoding.into());
        self
    }

    /// Normalize every encoding name and reject those outside the catalog
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.to_encoding = checked_encoding(&self.to_encoding)?;
        self.from_encoding = self.from_encoding.as_deref().map(checked_encoding).transpose()?;
        self.fallback_charset = self.fallback_charset.as_deref().map(checked_encoding).transpose()?;
        Ok(self)
    }

    /// Fallback handed to the detector when it cannot decide
    pub fn detection_fallback(&self) -> &str {
        self.fallback_charset.as_deref().unwrap_or(catalog::UTF_8)
    }
}

fn checked_encoding(name: &str) -> Result<String, ConfigError> {
    if catalog::is_supported(name) {
        Ok(catalog::normalize(name))
    } else {
        Err(ConfigError::UnsupportedEncoding(name.to_string()))
    }
}

/// Sync engine timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchConfig {
    pub interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs_f64(DEFAULT_WATCH_INTERVAL_SECS),
        }
    }
}

impl WatchConfig {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Build from a seconds value as given on the command line
    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::InvalidInterval(secs));
        }
        Ok(Self::new(Duration::from_secs_f64(secs)))
    }
}

/// Parse a size like `500K`, `1M`, `2g` or `1024` into bytes
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidSize(input.to_string());

    let upper = input.trim().to_ascii_uppercase();
    let (digits, multiplier) = match upper.as_bytes().last() {
        Some(b'K') => (&upper[..upper.len() - 1], 1u64 << 10),
        Some(b'M') => (&upper[..upper.len() - 1], 1u64 << 20),
        Some(b'G') => (&upper[..upper.len() - 1], 1u64 << 30),
        _ => (upper.as_str(), 1),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("500K").unwrap(), 500 * 1024);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for bad in ["", "K", "1.5M", "10KB", "-1", "abc", "1T"] {
            assert!(matches!(parse_size(bad), Err(ConfigError::InvalidSize(_))), "{bad}");
        }
    }

    #[test]
    fn test_validate_normalizes_names() {
        let config = ConvertConfig::new()
            .with_from_encoding("CP932")
            .with_to_encoding("UTF8")
            .with_fallback_charset("ujis")
            .validate()
            .unwrap();
        assert_eq!(config.from_encoding.as_deref(), Some("shift-jis"));
        assert_eq!(config.to_encoding, "utf-8");
        assert_eq!(config.fallback_charset.as_deref(), Some("euc-jp"));
        assert_eq!(config.detection_fallback(), "euc-jp");
    }

    #[test]
    fn test_validate_rejects_unsupported() {
        let err = ConvertConfig::new().with_to_encoding("koi8-r").validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedEncoding(name) if name == "koi8-r"));
    }

    #[test]
    fn test_watch_interval() {
        assert_eq!(WatchConfig::default().interval, Duration::from_secs(1));
        assert_eq!(
            WatchConfig::from_secs_f64(0.25).unwrap().interval,
            Duration::from_millis(250)
        );
        assert!(WatchConfig::from_secs_f64(0.0).is_err());
        assert!(WatchConfig::from_secs_f64(f64::NAN).is_err());
    }
}
