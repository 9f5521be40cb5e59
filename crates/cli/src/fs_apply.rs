use sift_core::planner::FileSystem;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `FileSystem` over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        copy_then_rename(from, to)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            // Typically EXDEV: intake on another device.
            Err(err) if from.exists() => {
                debug!(from = %from.display(), error = %err, "rename failed, copying instead");
                copy_then_rename(from, to)?;
                fs::remove_file(from)
            }
            Err(err) => Err(err),
        }
    }
}

/// Copies into a hidden sibling of `to` and renames it into place, so an
/// interrupted copy never leaves a partial file under the final name.
fn copy_then_rename(from: &Path, to: &Path) -> io::Result<()> {
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = to.with_file_name(format!(".{name}.part"));
    let result = fs::copy(from, &partial).and_then(|_| fs::rename(&partial, to));
    if result.is_err() && partial.exists() {
        if let Err(err) = fs::remove_file(&partial) {
            debug!(path = %partial.display(), error = %err, "could not remove partial copy");
        }
    }
    result
}
