use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use walkdir::WalkDir;

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// The file either has the old contents or the new contents, never a partial write.
/// Parent directories are created as needed.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    // Same directory as the target so the rename stays on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Windows refuses to rename over an existing file
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Recursively copy a directory tree.
///
/// Symlinks are skipped. Entries whose name matches `skip` at the top level
/// of `src` are not copied (used to keep nested `node_modules` out of a cache copy).
///
/// # Errors
/// Returns an error if any directory cannot be read or file cannot be copied.
pub fn copy_dir_all(src: &Path, dst: &Path, skip: &[&str]) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() == 1 && skip.iter().any(|s| e.file_name() == std::ffi::OsStr::new(s)))
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);

        let ty = entry.file_type();
        if ty.is_dir() {
            fs::create_dir_all(&target)?;
        } else if ty.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}
