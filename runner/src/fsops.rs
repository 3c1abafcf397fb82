//! Workspace file operations.
//!
//! Every client-supplied path is resolved against the workspace root with
//! [`resolve_path`] before it touches the filesystem. Parent-directory
//! components are always rejected, even when they would land back inside the
//! root; leading slashes are treated as workspace-relative.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use codepod_proto::FileInfo;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path escapes the workspace root")]
    PathTraversal,

    #[error("failed to apply patch")]
    PatchRejected,

    #[error("invalid patch: {0}")]
    PatchParse(String),

    #[error("nothing to paste")]
    EmptyClipboard,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Pending cut/copy marker. At most one per runtime; cleared on paste.
#[derive(Debug, Clone)]
pub struct Clipboard {
    pub source: PathBuf,
    pub operation: ClipboardOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardOp {
    Cut,
    Copy,
}

/// Resolve `relative` against `root`, rejecting traversal.
///
/// The path is rebuilt component-by-component so the check does not depend on
/// filesystem state: `..` and NUL bytes are rejected outright, `.` is
/// skipped, and a leading `/` is stripped rather than honored.
pub fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, FsError> {
    let relative = relative.trim_start_matches('/');

    if relative.is_empty() || relative == "." {
        return Ok(root.to_path_buf());
    }

    let mut result = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("path component contains NUL byte");
                    return Err(FsError::PathTraversal);
                }
                result.push(name);
            }
            Component::ParentDir => {
                warn!(path = relative, "rejected parent-directory traversal");
                return Err(FsError::PathTraversal);
            }
            Component::CurDir => continue,
            Component::RootDir | Component::Prefix(_) => {
                return Err(FsError::PathTraversal);
            }
        }
    }

    if !result.starts_with(root) {
        return Err(FsError::PathTraversal);
    }

    Ok(result)
}

/// List the entries of a directory under the workspace root.
pub fn fetch_dir(root: &Path, relative: &str) -> Result<Vec<FileInfo>, FsError> {
    let full = resolve_path(root, relative)?;
    let mut entries = Vec::new();
    for entry in fs::read_dir(&full)? {
        let entry = entry?;
        entries.push(FileInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type()?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Read a file as UTF-8 text.
pub fn fetch_content(root: &Path, relative: &str) -> Result<String, FsError> {
    let full = resolve_path(root, relative)?;
    Ok(fs::read_to_string(full)?)
}

/// Overwrite a file with new content, creating parent directories as needed.
pub fn save_file(root: &Path, relative: &str, content: &str) -> Result<(), FsError> {
    let full = resolve_path(root, relative)?;
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(full, content)?;
    Ok(())
}

/// Apply a unified-diff patch to a file.
///
/// Either every hunk applies and the file is rewritten, or the call fails and
/// the file is left bytewise unchanged.
pub fn save_file_diffs(root: &Path, relative: &str, patch_text: &str) -> Result<(), FsError> {
    let full = resolve_path(root, relative)?;
    let current = fs::read_to_string(&full)?;

    let patch =
        diffy::Patch::from_str(patch_text).map_err(|e| FsError::PatchParse(e.to_string()))?;
    let updated = diffy::apply(&current, &patch).map_err(|_| FsError::PatchRejected)?;

    fs::write(full, updated)?;
    Ok(())
}

/// Create an empty file, creating parent directories as needed.
pub fn create_file(root: &Path, relative: &str) -> Result<(), FsError> {
    let full = resolve_path(root, relative)?;
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::File::create(full)?;
    Ok(())
}

pub fn create_folder(root: &Path, relative: &str) -> Result<(), FsError> {
    let full = resolve_path(root, relative)?;
    fs::create_dir_all(full)?;
    Ok(())
}

/// Remove a file or directory tree.
pub fn delete(root: &Path, relative: &str) -> Result<(), FsError> {
    let full = resolve_path(root, relative)?;
    let meta = fs::symlink_metadata(&full)?;
    if meta.is_dir() {
        fs::remove_dir_all(full)?;
    } else {
        fs::remove_file(full)?;
    }
    Ok(())
}

pub fn rename(root: &Path, old_relative: &str, new_relative: &str) -> Result<(), FsError> {
    let old = resolve_path(root, old_relative)?;
    let new = resolve_path(root, new_relative)?;
    if let Some(parent) = new.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(old, new)?;
    Ok(())
}

/// Copy a file or directory tree.
pub fn copy(root: &Path, source_relative: &str, target_relative: &str) -> Result<(), FsError> {
    let source = resolve_path(root, source_relative)?;
    let target = resolve_path(root, target_relative)?;
    copy_any(&source, &target)
}

/// Record a cut marker for `source`. Verifies the source exists.
pub fn cut(root: &Path, source_relative: &str) -> Result<Clipboard, FsError> {
    let source = resolve_path(root, source_relative)?;
    fs::symlink_metadata(&source)?;
    Ok(Clipboard {
        source,
        operation: ClipboardOp::Cut,
    })
}

/// Complete a pending cut/copy by materializing it at `target`.
pub fn paste(
    root: &Path,
    clipboard: Option<Clipboard>,
    target_relative: &str,
) -> Result<(), FsError> {
    let clipboard = clipboard.ok_or(FsError::EmptyClipboard)?;
    let target = resolve_path(root, target_relative)?;

    copy_any(&clipboard.source, &target)?;
    if clipboard.operation == ClipboardOp::Cut {
        let meta = fs::symlink_metadata(&clipboard.source)?;
        if meta.is_dir() {
            fs::remove_dir_all(&clipboard.source)?;
        } else {
            fs::remove_file(&clipboard.source)?;
        }
    }
    Ok(())
}

fn copy_any(source: &Path, target: &Path) -> Result<(), FsError> {
    let meta = fs::metadata(source)?;
    if meta.is_dir() {
        copy_dir(source, target)?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target)?;
    }
    Ok(())
}

fn copy_dir(source: &Path, target: &Path) -> Result<(), FsError> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
