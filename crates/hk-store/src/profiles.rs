//! Canonical server-side profiles, one file per (identity, character name).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::archive::{ArchiveEntry, BackupArchive};
use crate::atomic::write_atomic;

const PROFILE_EXT: &str = "fch";

/// File stem for a profile: `{identity}_{name}` with spaces in the name
/// turned into underscores. Identity characters outside `[A-Za-z0-9.-]`
/// become `-` so transport addresses are safe as file names.
pub fn profile_file_stem(identity: &str, name: &str) -> String {
    let identity: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    format!("{identity}_{}", name.replace(' ', "_"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub file_name: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// What an accepted write did besides replacing the profile.
#[derive(Debug, Default)]
pub struct SaveReport {
    /// Archive entry holding the previous payload, if one was made
    pub archived: Option<ArchiveEntry>,
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    archive: BackupArchive,
}

impl ProfileStore {
    /// Profiles live in `{save_dir}/characters`, archives in
    /// `{save_dir}/characters/backups`.
    pub fn new(save_dir: impl AsRef<Path>, backups_to_keep: usize) -> Self {
        let dir = save_dir.as_ref().join("characters");
        let archive = BackupArchive::new(dir.join("backups"), backups_to_keep);
        Self { dir, archive }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive(&self) -> &BackupArchive {
        &self.archive
    }

    pub fn path_for(&self, identity: &str, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{PROFILE_EXT}", profile_file_stem(identity, name)))
    }

    pub fn load(&self, identity: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(identity, name);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading profile: {}", path.display())),
        }
    }

    /// Last-write time of the stored profile, if there is one.
    pub fn last_write(&self, identity: &str, name: &str) -> Result<Option<SystemTime>> {
        let path = self.path_for(identity, name);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(
                meta.modified()
                    .with_context(|| format!("mtime: {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat: {}", path.display())),
        }
    }

    /// Replace the stored profile, then move the previous payload into the
    /// rotation archive. Archive failures are logged and do not fail the save.
    pub fn save(&self, identity: &str, name: &str, payload: &[u8]) -> Result<SaveReport> {
        let previous = self.load(identity, name)?;
        let path = self.path_for(identity, name);
        write_atomic(&path, payload)?;

        let mut report = SaveReport::default();
        if let Some(previous) = previous {
            let stem = profile_file_stem(identity, name);
            match self.archive.push(&stem, &previous) {
                Ok(archived) => report.archived = archived,
                Err(e) => {
                    tracing::warn!(profile = %stem, "profile rotation failed: {e:#}");
                }
            }
        }

        tracing::info!(
            profile = %path.display(),
            bytes = payload.len(),
            archived = report.archived.is_some(),
            "profile saved"
        );
        Ok(report)
    }

    /// Every canonical profile file, sorted by name.
    pub fn list(&self) -> Result<Vec<ProfileEntry>> {
        let read = match std::fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing: {}", self.dir.display())),
        };

        let mut profiles = Vec::new();
        for entry in read {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if !meta.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXT) {
                continue;
            }
            profiles.push(ProfileEntry {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: meta.modified()?,
            });
        }
        profiles.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_rules() {
        assert_eq!(profile_file_stem("76561198", "Ivar the Boneless"), "76561198_Ivar_the_Boneless");
        assert_eq!(profile_file_stem("::1", "Bjorn"), "--1_Bjorn");
        assert_eq!(profile_file_stem("10.0.0.7", "Bjorn"), "10.0.0.7_Bjorn");
    }

    #[test]
    fn missing_profile_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path(), 5);
        assert!(store.load("id", "Nobody").unwrap().is_none());
        assert!(store.last_write("id", "Nobody").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn first_save_does_not_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path(), 5);
        let report = store.save("id", "Bjorn", b"v1").unwrap();
        assert!(report.archived.is_none());
        assert_eq!(store.load("id", "Bjorn").unwrap().unwrap(), b"v1");
        assert!(store.last_write("id", "Bjorn").unwrap().is_some());
    }

    #[test]
    fn later_saves_archive_previous_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path(), 5);
        store.save("id", "Bjorn", b"v1").unwrap();
        let report = store.save("id", "Bjorn", b"v2").unwrap();

        let archived = report.archived.unwrap();
        assert_eq!(store.archive().read(&archived).unwrap(), b"v1");
        assert_eq!(store.load("id", "Bjorn").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn rotation_failure_does_not_fail_save() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path(), 5);
        store.save("id", "Bjorn", b"v1").unwrap();
        // A plain file where the archive directory should be
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("backups"), b"not a dir").unwrap();

        let report = store.save("id", "Bjorn", b"v2").unwrap();
        assert!(report.archived.is_none());
        assert_eq!(store.load("id", "Bjorn").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn list_skips_archives_and_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(tmp.path(), 5);
        store.save("a", "Astrid", b"12345").unwrap();
        store.save("a", "Astrid", b"123456").unwrap();
        store.save("b", "Bjorn", b"1").unwrap();
        std::fs::write(store.dir().join("readme.txt"), b"x").unwrap();

        let listed = store.list().unwrap();
        let names: Vec<_> = listed.iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_Astrid.fch", "b_Bjorn.fch"]);
        assert_eq!(listed[0].size, 6);
    }
}
