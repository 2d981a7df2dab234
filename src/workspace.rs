//! Workspace archive construction.
//!
//! Each execution gets an in-memory tar archive holding the program entry
//! file, decoded user inputs under `files/`, an empty `output/` directory,
//! and the writable cache directories a read-only-rootfs Python process
//! needs. The archive is extracted into the ephemeral volume by the helper
//! container.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::warn;

use crate::types::ExecutionRequest;

/// Program entry file inside the workspace.
pub const ENTRY_FILE: &str = "main.py";

/// Directory user input files are decoded into.
pub const FILES_DIR: &str = "files";

/// Owner of every archive entry; matches the sandbox image's non-root user.
const SANDBOX_UID: u64 = 1000;

/// Writable directories pre-created so caches have somewhere to land on a
/// read-only root filesystem.
const WRITABLE_DIRS: [&str; 5] = [
    "output",
    ".cache",
    ".config",
    ".config/matplotlib",
    "__pycache__",
];

/// Errors from workspace construction.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// A user-supplied filename tried to escape `files/`.
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    /// The tar stream could not be encoded.
    #[error("failed to encode workspace archive: {0}")]
    Archive(#[from] std::io::Error),
}

/// Build the workspace archive for one request.
///
/// Invalid base64 content is tolerated: the file is still created, empty,
/// so the program sees every filename the caller sent.
///
/// # Errors
///
/// Returns [`WorkspaceError::InvalidFilename`] for filenames containing
/// path separators or traversal components.
pub fn build_archive(request: &ExecutionRequest) -> Result<Vec<u8>, WorkspaceError> {
    if let Some(files) = &request.files {
        for name in files.keys() {
            validate_filename(name)?;
        }
    }

    let mtime = unix_now();
    let mut builder = tar::Builder::new(Vec::new());

    append_file(&mut builder, ENTRY_FILE, request.code.as_bytes(), mtime)?;
    append_dir(&mut builder, FILES_DIR, 0o755, mtime)?;

    if let Some(files) = &request.files {
        // Sorted so the archive layout is deterministic for a given request.
        let mut names: Vec<&String> = files.keys().collect();
        names.sort();
        for name in names {
            let content = match BASE64.decode(&files[name]) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %name, error = %e, "invalid base64 input; writing empty file");
                    Vec::new()
                }
            };
            append_file(&mut builder, &format!("{FILES_DIR}/{name}"), &content, mtime)?;
        }
    }

    for dir in WRITABLE_DIRS {
        append_dir(&mut builder, dir, 0o777, mtime)?;
    }

    Ok(builder.into_inner()?)
}

/// Reject filenames that could land outside `files/`.
fn validate_filename(name: &str) -> Result<(), WorkspaceError> {
    let traversal = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if traversal {
        return Err(WorkspaceError::InvalidFilename(name.to_owned()));
    }
    Ok(())
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    content: &[u8],
    mtime: u64,
) -> Result<(), WorkspaceError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_uid(SANDBOX_UID);
    header.set_gid(SANDBOX_UID);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append_data(&mut header, path, content)?;
    Ok(())
}

fn append_dir(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    mode: u32,
    mtime: u64,
) -> Result<(), WorkspaceError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    header.set_uid(SANDBOX_UID);
    header.set_gid(SANDBOX_UID);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append_data(&mut header, format!("{path}/"), std::io::empty())?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
