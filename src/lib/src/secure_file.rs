//! Private key file handling with restrictive permissions
//!
//! Private key blobs are created with mode 0600 on Unix. Reading a key file
//! that group or others can access still succeeds, with a warning.

use crate::error::VbError;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Owner read/write only.
#[cfg(unix)]
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Warn if a key file is readable by group or others.
#[cfg(unix)]
pub fn check_permissions(path: &Path) -> Result<(), VbError> {
    use std::os::unix::fs::PermissionsExt;

    let perm_bits = fs::metadata(path)?.permissions().mode() & 0o777;
    if perm_bits & 0o077 != 0 {
        log::warn!(
            "Key file '{}' has overly permissive permissions (mode {:o}). \
             Consider running: chmod 600 '{}'",
            path.display(),
            perm_bits,
            path.display()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_permissions(path: &Path) -> Result<(), VbError> {
    log::debug!(
        "Permission check skipped for '{}' on this platform",
        path.display()
    );
    Ok(())
}

#[cfg(unix)]
fn create_secure_file(path: &Path) -> Result<File, VbError> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SECURE_FILE_MODE)
        .open(path)?;
    // An existing file keeps its mode through open(), tighten it.
    fs::set_permissions(path, fs::Permissions::from_mode(SECURE_FILE_MODE))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_secure_file(path: &Path) -> Result<File, VbError> {
    log::warn!(
        "Creating key file '{}' without restrictive permissions: not supported on this platform",
        path.display()
    );
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

/// Write a key file readable by the owner only.
pub fn write_secure(path: &Path, data: &[u8]) -> Result<(), VbError> {
    let mut file = create_secure_file(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Read a key file, warning about permissive modes.
pub fn read_secure(path: &Path) -> Result<Vec<u8>, VbError> {
    check_permissions(path)?;
    let mut file = File::open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}
