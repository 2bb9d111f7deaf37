//! Metadata preservation and symlink remapping between trees

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;

use crate::error::{ConvertError, Result};

/// Copy permission bits, access/modify times and (where permitted) owner
/// and group from `source` to `destination`.
///
/// Ownership changes usually need privileges and their failure is ignored.
pub fn copy_metadata(source: &Path, destination: &Path) -> Result<()> {
    let metadata =
        fs::metadata(source).map_err(|e| ConvertError::io("inspect metadata of", source, e))?;

    fs::set_permissions(destination, metadata.permissions())
        .map_err(|e| ConvertError::io("preserve permissions on", destination, e))?;

    let accessed = FileTime::from_last_access_time(&metadata);
    let modified = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(destination, accessed, modified)
        .map_err(|e| ConvertError::io("preserve timestamps on", destination, e))?;

    copy_ownership(&metadata, destination, true);
    Ok(())
}

/// Best-effort metadata copy onto a symlink itself (not its target)
pub fn copy_symlink_metadata(source: &Path, destination: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(source)
        .map_err(|e| ConvertError::io("inspect metadata of", source, e))?;

    let accessed = FileTime::from_last_access_time(&metadata);
    let modified = FileTime::from_last_modification_time(&metadata);
    filetime::set_symlink_file_times(destination, accessed, modified)
        .map_err(|e| ConvertError::io("preserve timestamps on", destination, e))?;

    copy_ownership(&metadata, destination, false);
    Ok(())
}

#[cfg(unix)]
fn copy_ownership(metadata: &fs::Metadata, destination: &Path, follow_symlinks: bool) {
    use std::os::unix::fs::MetadataExt;

    let (uid, gid) = (Some(metadata.uid()), Some(metadata.gid()));
    let outcome = if follow_symlinks {
        std::os::unix::fs::chown(destination, uid, gid)
    } else {
        std::os::unix::fs::lchown(destination, uid, gid)
    };
    if let Err(error) = outcome {
        tracing::trace!(path = %destination.display(), %error, "ownership not preserved");
    }
}

#[cfg(not(unix))]
fn copy_ownership(_metadata: &fs::Metadata, _destination: &Path, _follow_symlinks: bool) {}

/// Where a recreated link ended up pointing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymlinkTarget {
    /// Target was inside the source tree and now points into the destination tree
    Remapped(PathBuf),
    /// Target was outside the source tree and was copied unchanged
    Verbatim(PathBuf),
}

/// Recreate the symlink `source_link` at `destination_link`.
///
/// A target inside `source_root` is rewritten to the analogous path under
/// `destination_root`, relative to the new link's directory. Anything else
/// is kept verbatim. An existing non-directory entry at `destination_link`
/// is replaced.
pub fn remap_symlink(
    source_link: &Path,
    destination_link: &Path,
    source_root: &Path,
    destination_root: &Path,
) -> Result<SymlinkTarget> {
    let symlink_err = |source: io::Error| ConvertError::Symlink {
        path: source_link.to_path_buf(),
        source,
    };

    let link_target = fs::read_link(source_link).map_err(symlink_err)?;
    let link_dir = source_link.parent().unwrap_or(Path::new(""));
    let absolute_target = lexical_absolute(&link_dir.join(&link_target)).map_err(symlink_err)?;
    let source_root = lexical_absolute(source_root).map_err(symlink_err)?;

    let target = match absolute_target.strip_prefix(&source_root) {
        Ok(inside) => {
            let destination_root = lexical_absolute(destination_root).map_err(symlink_err)?;
            let new_link = lexical_absolute(destination_link).map_err(symlink_err)?;
            let new_link_dir = new_link.parent().unwrap_or(Path::new("/"));
            SymlinkTarget::Remapped(relative_to(&destination_root.join(inside), new_link_dir))
        }
        Err(_) => SymlinkTarget::Verbatim(link_target),
    };

    if let Ok(existing) = fs::symlink_metadata(destination_link) {
        if !existing.is_dir() {
            fs::remove_file(destination_link).map_err(symlink_err)?;
        }
    }

    let new_target = match &target {
        SymlinkTarget::Remapped(path) | SymlinkTarget::Verbatim(path) => path,
    };
    create_symlink(new_target, destination_link).map_err(symlink_err)?;

    if let Err(error) = copy_symlink_metadata(source_link, destination_link) {
        tracing::debug!(path = %destination_link.display(), %error, "symlink metadata not preserved");
    }

    Ok(target)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Absolute path with `.` and `..` resolved textually, without touching
/// the filesystem (a link target may not exist).
fn lexical_absolute(path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// `target` expressed relative to the directory `base`; both absolute and normalized
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target_parts: Vec<Component<'_>> = target.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = target_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to(Path::new("/d/a/b.txt"), Path::new("/d/c")), Path::new("../a/b.txt"));
        assert_eq!(relative_to(Path::new("/d/a.txt"), Path::new("/d")), Path::new("a.txt"));
        assert_eq!(relative_to(Path::new("/d"), Path::new("/d")), Path::new("."));
    }

    #[test]
    fn test_lexical_absolute_resolves_dots() {
        let path = lexical_absolute(Path::new("/a/b/../c/./d")).unwrap();
        assert_eq!(path, Path::new("/a/c/d"));
    }

    #[test]
    fn test_copy_metadata_preserves_mode_and_mtime() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, "a").unwrap();
        fs::write(&dst, "b").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let mtime = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&src, mtime).unwrap();

        copy_metadata(&src, &dst).unwrap();

        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);
    }

    #[test]
    fn test_internal_link_is_remapped() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::create_dir_all(dst.join("lib")).unwrap();
        fs::write(src.join("target.txt"), "t").unwrap();
        std::os::unix::fs::symlink("../target.txt", src.join("lib/link")).unwrap();

        let target =
            remap_symlink(&src.join("lib/link"), &dst.join("lib/link"), &src, &dst).unwrap();

        assert_eq!(target, SymlinkTarget::Remapped(PathBuf::from("../target.txt")));
        assert_eq!(fs::read_link(dst.join("lib/link")).unwrap(), Path::new("../target.txt"));
    }

    #[test]
    fn test_absolute_internal_link_becomes_relative() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        std::os::unix::fs::symlink(src.join("a.txt"), src.join("abs")).unwrap();

        remap_symlink(&src.join("abs"), &dst.join("abs"), &src, &dst).unwrap();

        assert_eq!(fs::read_link(dst.join("abs")).unwrap(), Path::new("a.txt"));
    }

    #[test]
    fn test_external_link_is_verbatim() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        std::os::unix::fs::symlink("/etc/hosts", src.join("hosts")).unwrap();
        std::os::unix::fs::symlink("../outside", src.join("up")).unwrap();

        let hosts = remap_symlink(&src.join("hosts"), &dst.join("hosts"), &src, &dst).unwrap();
        let up = remap_symlink(&src.join("up"), &dst.join("up"), &src, &dst).unwrap();

        assert_eq!(hosts, SymlinkTarget::Verbatim(PathBuf::from("/etc/hosts")));
        assert_eq!(up, SymlinkTarget::Verbatim(PathBuf::from("../outside")));
        assert_eq!(fs::read_link(dst.join("up")).unwrap(), Path::new("../outside"));
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_external() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        std::os::unix::fs::symlink("../src2/file", src.join("link")).unwrap();

        let target = remap_symlink(&src.join("link"), &dst.join("link"), &src, &dst).unwrap();
        assert!(matches!(target, SymlinkTarget::Verbatim(_)));
    }
}
