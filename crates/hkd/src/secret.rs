//! Server secret: loaded from disk, generated on first start.

use anyhow::{Context, Result};
use hk_crypto::generate_server_secret;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use tracing::info;

pub fn load_or_create(path: &Path) -> Result<SecretString> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading server secret: {}", path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            anyhow::bail!("server secret file is empty: {}", path.display());
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    let secret = generate_server_secret();
    hk_store::write_atomic_private(path, secret.expose_secret().as_bytes())
        .with_context(|| format!("writing server secret: {}", path.display()))?;
    info!(path = %path.display(), "generated new server secret");
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_once_then_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("server.secret");
        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(first.expose_secret(), second.expose_secret());
        assert_eq!(first.expose_secret().len(), 44);
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.secret");
        std::fs::write(&path, "\n").unwrap();
        assert!(load_or_create(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn secret_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.secret");
        // Leftover temp from an interrupted start, readable by everyone
        let stale = dir.path().join(".server.secret.tmp");
        std::fs::write(&stale, "old").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        load_or_create(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!stale.exists());
    }
}
