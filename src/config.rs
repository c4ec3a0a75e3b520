//! Settings/store file loading glue (spec §6 on-disk layout, §7
//! "configuration loading" policy): resolves the well-known paths under
//! `--config-dir` and applies the `--config-version-check` policy when the
//! group/user store's version doesn't match what this binary expects.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::auth::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMismatchPolicy {
    Error,
    Ignore,
    Backup,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--config-dir {0:?} must be an absolute path")]
    RootNotAbsolute(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The well-known paths under a config root (spec §6's on-disk layout).
#[derive(Debug, Clone)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: PathBuf) -> Result<Self, ConfigError> {
        if !root.is_absolute() {
            return Err(ConfigError::RootNotAbsolute(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn groups_path(&self) -> PathBuf {
        self.root.join("groups.toml")
    }

    pub fn users_path(&self) -> PathBuf {
        self.root.join("users.toml")
    }

    pub fn certificates_dir(&self) -> PathBuf {
        self.root.join("certificates")
    }

    pub fn webui_tokens_db(&self) -> PathBuf {
        self.root.join("webui").join("tokens.db")
    }

    /// Loads the group/user store, applying `policy` when the on-disk
    /// version doesn't match `Store`'s expected version (spec §7: "root-node
    /// missing", "flavour-or-version mismatch... can be backed up and
    /// migrated", "other errors hard-fail unless ignore").
    pub fn load_store(&self, policy: VersionMismatchPolicy) -> Result<Store, ConfigError> {
        let groups_path = self.groups_path();
        let users_path = self.users_path();

        if !groups_path.exists() && !users_path.exists() {
            return Ok(Store::default());
        }

        match Store::load(&groups_path, &users_path) {
            Ok(store) => Ok(store),
            Err(StoreError::VersionMismatch { found, expected }) => match policy {
                VersionMismatchPolicy::Ignore => {
                    warn!(found, expected, "ignoring store version mismatch per --config-version-check=ignore");
                    Ok(Store::default())
                }
                VersionMismatchPolicy::Backup => {
                    self.backup_and_reset(&groups_path, &users_path);
                    Ok(Store::default())
                }
                VersionMismatchPolicy::Error => Err(ConfigError::Store(StoreError::VersionMismatch { found, expected })),
            },
            Err(e) => Err(ConfigError::Store(e)),
        }
    }

    fn backup_and_reset(&self, groups_path: &Path, users_path: &Path) {
        for path in [groups_path, users_path] {
            if path.exists() {
                let backup = path.with_extension("toml.bak");
                if let Err(e) = std::fs::rename(path, &backup) {
                    warn!(error = %e, ?path, "failed to back up store file before reset");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_relative_root() {
        assert!(ConfigDir::new(PathBuf::from("relative")).is_err());
    }

    #[test]
    fn well_known_paths_are_joined_under_the_root() {
        let dir = ConfigDir::new(PathBuf::from("/etc/fz-serverd")).unwrap();
        assert_eq!(dir.groups_path(), PathBuf::from("/etc/fz-serverd/groups.toml"));
        assert_eq!(dir.users_path(), PathBuf::from("/etc/fz-serverd/users.toml"));
        assert_eq!(dir.certificates_dir(), PathBuf::from("/etc/fz-serverd/certificates"));
        assert_eq!(dir.webui_tokens_db(), PathBuf::from("/etc/fz-serverd/webui/tokens.db"));
    }

    #[test]
    fn missing_store_files_load_as_an_empty_default_store() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = ConfigDir::new(tempdir.path().to_path_buf()).unwrap();
        let store = dir.load_store(VersionMismatchPolicy::Error).unwrap();
        assert!(store.users.is_empty());
    }
}
