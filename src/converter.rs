//! One-shot tree conversion

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn, Dispatch};
use walkdir::WalkDir;

use crate::catalog;
use crate::classify::{is_text_file, should_exclude};
use crate::config::ConvertConfig;
use crate::detect::{detect, LOW_CONFIDENCE};
use crate::error::{ConfigError, ConvertError, Result};
use crate::metadata::{copy_metadata, remap_symlink};
use crate::transcode::convert;

/// What happened to a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Content was re-encoded
    Converted { from: String, to: String },
    /// Not text (or too large); copied byte for byte
    CopiedBinary,
    /// Looked like text but did not transcode cleanly; copied byte for byte
    CopiedAfterFailure { from: String },
}

/// Counters from a [`Converter::convert_directory`] walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub converted: usize,
    pub copied: usize,
    pub symlinks: usize,
    pub excluded: usize,
    pub failed: usize,
}

/// Direction-specific encoding choice for a single conversion
#[derive(Debug, Clone, Copy)]
pub(crate) struct EncodingPlan<'a> {
    /// `None` means detect from content
    pub from: Option<&'a str>,
    pub to: &'a str,
    pub max_size: Option<u64>,
}

/// Converts files and trees from one encoding into another
#[derive(Debug, Clone)]
pub struct Converter {
    config: ConvertConfig,
    dispatch: Dispatch,
}

impl Converter {
    /// Validate `config` and build a converter that logs to the dispatcher
    /// current at construction time
    pub fn new(config: ConvertConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config: config.validate()?,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        })
    }

    /// Log through `dispatch` instead
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Convert one file from the configured source encoding (or the detected
    /// one) into the target encoding, then copy its metadata.
    pub fn convert_file(&self, source: &Path, destination: &Path) -> Result<FileOutcome> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            self.convert_file_with(source, destination, self.forward_plan())
        })
    }

    /// Mirror the tree under `source_root` into `destination_root`.
    ///
    /// Excluded directories are pruned before descent. A failure on one entry
    /// is logged and counted; the walk goes on.
    pub fn convert_directory(&self, source_root: &Path, destination_root: &Path) -> Result<WalkSummary> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            self.walk(source_root, destination_root)
        })
    }

    pub(crate) fn forward_plan(&self) -> EncodingPlan<'_> {
        EncodingPlan {
            from: self.config.from_encoding.as_deref(),
            to: &self.config.to_encoding,
            max_size: self.config.max_size,
        }
    }

    fn walk(&self, source_root: &Path, destination_root: &Path) -> Result<WalkSummary> {
        fs::create_dir_all(destination_root)
            .map_err(|e| ConvertError::io("create directory", destination_root, e))?;

        let exclude = &self.config.exclude;
        let mut summary = WalkSummary::default();
        let mut created_dirs: Vec<(PathBuf, PathBuf)> = Vec::new();

        let walker = WalkDir::new(source_root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                let relative = entry.path().strip_prefix(source_root).unwrap_or(entry.path());
                let keep = !should_exclude(relative, exclude);
                if !keep {
                    debug!(path = %relative.display(), "skipping excluded directory");
                }
                keep
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    error!(error = %err, "error walking source tree");
                    summary.failed += 1;
                    continue;
                }
            };

            let Ok(relative) = entry.path().strip_prefix(source_root) else {
                continue;
            };
            let destination = destination_root.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                match Self::mirror_directory(&destination) {
                    Ok(true) => created_dirs.push((entry.path().to_path_buf(), destination)),
                    Ok(false) => {}
                    Err(err) => {
                        error!(path = %relative.display(), error = %err, "error creating directory");
                        summary.failed += 1;
                    }
                }
                continue;
            }

            if should_exclude(relative, exclude) {
                debug!(path = %relative.display(), "skipping excluded file");
                summary.excluded += 1;
                continue;
            }

            let result = if file_type.is_symlink() {
                debug!(path = %relative.display(), "processing symlink");
                remap_symlink(entry.path(), &destination, source_root, destination_root).map(|_| {
                    summary.symlinks += 1;
                })
            } else {
                self.convert_file_with(entry.path(), &destination, self.forward_plan())
                    .map(|outcome| match outcome {
                        FileOutcome::Converted { .. } => summary.converted += 1,
                        _ => summary.copied += 1,
                    })
            };

            if let Err(err) = result {
                error!(path = %relative.display(), error = %err, "error processing file");
                summary.failed += 1;
            }
        }

        // writing children bumps a directory's mtime, so stamp them last,
        // deepest first
        for (source, destination) in created_dirs.iter().rev() {
            if let Err(err) = copy_metadata(source, destination) {
                error!(path = %destination.display(), error = %err, "error copying directory metadata");
                summary.failed += 1;
            }
        }

        info!(
            source = %source_root.display(),
            destination = %destination_root.display(),
            converted = summary.converted,
            copied = summary.copied,
            failed = summary.failed,
            "directory converted"
        );
        Ok(summary)
    }

    /// Create `destination` if missing; `true` when it was created here
    fn mirror_directory(destination: &Path) -> Result<bool> {
        if destination.exists() {
            return Ok(false);
        }
        fs::create_dir_all(destination)
            .map_err(|e| ConvertError::io("create directory", destination, e))?;
        Ok(true)
    }

    /// Shared by the tree walk and both sync directions
    pub(crate) fn convert_file_with(
        &self,
        source: &Path,
        destination: &Path,
        plan: EncodingPlan<'_>,
    ) -> Result<FileOutcome> {
        let outcome = if is_text_file(source, plan.max_size) {
            let content = fs::read(source).map_err(|e| ConvertError::io("read", source, e))?;

            let (from, confidence) = match plan.from {
                Some(explicit) => (catalog::normalize(explicit), 1.0),
                None => {
                    let detection = detect(&content, self.config.detection_fallback());
                    (detection.encoding, detection.confidence)
                }
            };

            if confidence < LOW_CONFIDENCE {
                warn!(
                    path = %source.display(),
                    encoding = %from,
                    confidence,
                    "low confidence in encoding detection"
                );
            }

            let conversion = convert(&content, &from, plan.to);
            if conversion.success {
                fs::write(destination, &conversion.bytes)
                    .map_err(|e| ConvertError::io("write", destination, e))?;
                info!(path = %source.display(), from = %from, to = %plan.to, "converted");
                FileOutcome::Converted {
                    from,
                    to: plan.to.to_string(),
                }
            } else {
                copy_verbatim(source, destination)?;
                warn!(path = %source.display(), from = %from, to = %plan.to, "conversion failed, copied as binary");
                FileOutcome::CopiedAfterFailure { from }
            }
        } else {
            copy_verbatim(source, destination)?;
            debug!(path = %source.display(), "copied binary file");
            FileOutcome::CopiedBinary
        };

        copy_metadata(source, destination)?;
        Ok(outcome)
    }
}

fn copy_verbatim(source: &Path, destination: &Path) -> Result<()> {
    fs::copy(source, destination)
        .map(|_| ())
        .map_err(|e| ConvertError::io("copy", source, e))
}
