//! Owner-only persistence helpers for identity and credential material.

use std::io::Write as _;
use std::path::Path;

use crate::CryptoError;

/// Read a small credential file, trimming trailing whitespace.
pub fn read_trimmed(path: &Path) -> Result<String, CryptoError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CryptoError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(raw.trim().to_string())
}

/// Write `contents` to `path` with mode 0600, creating parent directories.
pub fn write_owner_only(path: &Path, contents: &str) -> Result<(), CryptoError> {
    use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

    let wrap = |source: std::io::Error| CryptoError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(wrap)?;
    file.write_all(contents.as_bytes()).map_err(wrap)?;

    // `mode` above only applies when the open creates the inode; an
    // overwritten file keeps whatever bits it had, so clamp explicitly.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(wrap)
}
