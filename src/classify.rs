//! Text/binary sniffing and path exclusion

use std::fs;
use std::io::Read;
use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::ConfigError;

/// How much of a file is sniffed for binary content
pub const SNIFF_LEN: u64 = 4096;

/// Above this share of control bytes the sniffed prefix counts as binary
pub const CONTROL_BYTE_RATIO: f64 = 0.3;

const TAB: u8 = b'\t';
const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// Heuristic text sniff.
///
/// False for anything that is not a regular file, for files above
/// `max_size`, and for files whose first [`SNIFF_LEN`] bytes contain a NUL
/// or too many control bytes. Unreadable files are reported as binary.
pub fn is_text_file(path: &Path, max_size: Option<u64>) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    if let Some(limit) = max_size {
        if metadata.len() > limit {
            return false;
        }
    }

    let mut prefix = Vec::with_capacity(SNIFF_LEN as usize);
    let read = fs::File::open(path).and_then(|file| file.take(SNIFF_LEN).read_to_end(&mut prefix));
    if read.is_err() {
        return false;
    }

    looks_like_text(&prefix)
}

/// The byte-level half of [`is_text_file`]
pub fn looks_like_text(prefix: &[u8]) -> bool {
    if prefix.contains(&0) {
        return false;
    }
    if prefix.is_empty() {
        return true;
    }
    let control = prefix
        .iter()
        .filter(|&&b| b < 0x20 && b != TAB && b != NEWLINE && b != CARRIAGE_RETURN)
        .count();
    (control as f64 / prefix.len() as f64) <= CONTROL_BYTE_RATIO
}

/// Swap, backup and lock files editors leave next to the real file
pub fn is_transient_editor_artifact(file_name: &str) -> bool {
    file_name.ends_with(".swp")
        || file_name.ends_with(".swo")
        || file_name.ends_with('~')
        || (file_name.len() >= 2 && file_name.starts_with('#') && file_name.ends_with('#'))
        || (file_name.starts_with('.') && file_name.ends_with(".tmp"))
}

/// Compiled, ordered set of exclusion globs
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    globs: GlobSet,
}

impl ExcludeSet {
    /// Compile `patterns`; an invalid glob is a configuration error
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|source| ConfigError::InvalidPattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self { patterns, globs })
    }

    /// Parse a comma-separated pattern list, dropping empty entries
    pub fn from_comma_list(list: &str) -> Result<Self, ConfigError> {
        Self::new(list.split(',').map(str::trim).filter(|p| !p.is_empty()))
    }

    /// A set that excludes nothing
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            globs: GlobSet::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// See [`should_exclude`]
    pub fn matches(&self, relative_path: &Path) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.globs.is_match(relative_path) {
            return true;
        }
        relative_path.components().any(|component| match component {
            Component::Normal(segment) => {
                self.globs.is_match(Path::new(segment))
                    || self.patterns.iter().any(|p| segment == p.as_str())
            }
            _ => false,
        })
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Whether `relative_path` is excluded: the full path, any segment, or the
/// base name matches one of the patterns.
pub fn should_exclude(relative_path: &Path, patterns: &ExcludeSet) -> bool {
    patterns.matches(relative_path)
}
