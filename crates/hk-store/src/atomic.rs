use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Write `data` to `path` via a sibling temp file and rename, so readers see
/// either the old content or the new, never a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    write_via_temp(path, data, None)
}

/// Like `write_atomic`, but the file is owner-only from the moment it exists.
pub fn write_atomic_private(path: &Path, data: &[u8]) -> Result<()> {
    write_via_temp(path, data, Some(0o600))
}

fn write_via_temp(path: &Path, data: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating dir: {}", parent.display()))?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    // Leftover from a crash; its permissions must not carry over
    match std::fs::remove_file(&tmp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("removing stale temp: {}", tmp_path.display()))
        }
    }

    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = opts
        .open(&tmp_path)
        .with_context(|| format!("creating temp: {}", tmp_path.display()))?;
    file.write_all(data)
        .with_context(|| format!("writing temp: {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("syncing temp: {}", tmp_path.display()))?;
    drop(file);

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming into place: {}", path.display()))?;
    Ok(())
}
