use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// First `len` hex characters of the BLAKE3 digest of `data`.
#[must_use]
pub fn short_hash(data: &[u8], len: usize) -> String {
    let mut hex = blake3_bytes(data);
    hex.truncate(len);
    hex
}

/// Hash every regular file under `dir` into one digest.
///
/// Files are visited in sorted order and both the relative path and the
/// content feed the hasher, so the result only depends on the tree itself.
///
/// # Errors
/// Returns an error if the directory cannot be walked or a file cannot be read.
pub fn blake3_dir(dir: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(dir).map_err(io::Error::other)?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&[0]);

        let mut reader = BufReader::new(File::open(entry.path())?);
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}
