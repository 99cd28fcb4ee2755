//! Common file system operations with unified error handling

use std::fs;
use std::path::Path;

/// Copy a directory recursively, preserving the tree shape.
pub fn copy_dir_recursive<P1, P2>(src: P1, dst: P2) -> std::io::Result<()>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
{
    let src_ref = src.as_ref();
    let dst_ref = dst.as_ref();

    if !dst_ref.exists() {
        fs::create_dir_all(dst_ref)?;
    }

    for entry in fs::read_dir(src_ref)? {
        let entry = entry?;
        let entry_path = entry.path();
        let dst_path = dst_ref.join(entry.file_name());

        if entry_path.is_dir() {
            copy_dir_recursive(&entry_path, &dst_path)?;
        } else {
            fs::copy(&entry_path, &dst_path)?;
        }
    }

    Ok(())
}

/// Copy a file or a directory tree to `dst`, replacing whatever is there
/// when `overwrite` is set.
pub fn copy_path(src: &Path, dst: &Path, overwrite: bool) -> std::io::Result<()> {
    if overwrite {
        remove_path(dst)?;
    }
    if src.is_dir() {
        copy_dir_recursive(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }
}

/// Remove a file or directory tree; missing paths are not an error.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Move a file or directory, falling back to copy+remove across devices.
pub fn move_path(src: &Path, dst: &Path, overwrite: bool) -> std::io::Result<()> {
    if overwrite {
        remove_path(dst)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_path(src, dst, false)?;
            remove_path(src)
        }
    }
}
