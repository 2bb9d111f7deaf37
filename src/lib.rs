//! # emx-charsync
//!
//! Mirror a directory tree written in one text encoding into a second tree
//! in another encoding, and optionally keep both trees in sync so a legacy
//! encoded codebase and its UTF-8 mirror can be edited interchangeably.
//!
//! ## One-shot conversion
//!
//! ```no_run
//! use emx_charsync::{ConvertConfig, Converter, ExcludeSet};
//! use std::path::Path;
//!
//! let config = ConvertConfig::new()
//!     .with_to_encoding("utf-8")
//!     .with_exclude(ExcludeSet::from_comma_list(".git,*.bak")?);
//! let converter = Converter::new(config)?;
//! converter.convert_directory(Path::new("legacy"), Path::new("mirror"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Each file is sniffed: text files are re-encoded, binary (or oversized)
//! files are copied byte for byte, symlinks into the tree are remapped into
//! the mirror. A file that fails to transcode is copied unchanged rather than
//! partially converted.
//!
//! ## Watching
//!
//! [`SyncEngine`] polls both trees on an interval. Source edits are pushed
//! into the mirror; mirror edits are written back in whatever encoding the
//! source file uses.
//!
//! ## Encoding Detection
//!
//! Detection rules (in order):
//! 1. Empty content → the caller's fallback, confidence 1.0
//! 2. Pure 7-bit content without escape sequences → `ascii`, confidence 1.0
//! 3. Statistical guess via `chardetng`; outside the catalog → fallback, confidence 0.0
//!
//! Confidence below [`LOW_CONFIDENCE`] is logged as a warning and never aborts
//! a conversion.
//!
//! ## Logging
//!
//! Nothing here installs a global subscriber. [`Converter`] and [`SyncEngine`]
//! carry a [`tracing::Dispatch`] and emit every event through it.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod converter;
pub mod detect;
pub mod error;
pub mod metadata;
pub mod sync;
pub mod transcode;

pub use catalog::{Codec, SUPPORTED_ENCODINGS};
pub use classify::{
    is_text_file, is_transient_editor_artifact, should_exclude, ExcludeSet,
};
pub use config::{parse_size, ConvertConfig, WatchConfig};
pub use converter::{Converter, FileOutcome, WalkSummary};
pub use detect::{detect, Detection, LOW_CONFIDENCE};
pub use error::{ConfigError, ConvertError, Result};
pub use metadata::{copy_metadata, remap_symlink, SymlinkTarget};
pub use sync::{Side, Snapshot, SnapshotKey, SyncEngine, TickReport, WatchState};
pub use transcode::{convert, Conversion};
