//! Ties a mount tree, a backend, and quota counters together into the set
//! of operations a protocol handler actually calls (spec §4.2).

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::backend::{Backend, MkdirPermissions, OpenMode};
use super::entry::{Entry, EntryType};
use super::limits::{OpenLimits, UNLIMITED};
use super::perms::Permissions;
use super::tree::MountTree;
use super::validation::{validate_tvfs_path, NativeFormat};
use super::{TvfsError, TvfsResult};
use crate::util::CopiesCounter;

/// An open file plus the live-copy guard that counts it against the open
/// files quota; closing (dropping) it frees the slot.
pub struct FileHandle {
    file: tokio::fs::File,
    _counter: CopiesCounter,
}

impl Deref for FileHandle {
    type Target = tokio::fs::File;
    fn deref(&self) -> &Self::Target {
        &self.file
    }
}

impl DerefMut for FileHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.file
    }
}

struct ResolvedPath {
    native_path: String,
    perms: Permissions,
}

pub struct Engine {
    mount_tree: RwLock<Arc<MountTree>>,
    backend: Arc<dyn Backend>,
    current_directory: Mutex<String>,
    open_files_counter: CopiesCounter,
    open_directories_counter: CopiesCounter,
    open_limits: RwLock<OpenLimits>,
    host: NativeFormat,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>, host: NativeFormat) -> Self {
        Self {
            mount_tree: RwLock::new(Arc::new(MountTree::new())),
            backend,
            current_directory: Mutex::new("/".to_string()),
            open_files_counter: CopiesCounter::new("tvfs-open-files"),
            open_directories_counter: CopiesCounter::new("tvfs-open-directories"),
            open_limits: RwLock::new(OpenLimits::default()),
            host,
        }
    }

    pub fn set_mount_tree(&self, mt: Arc<MountTree>) {
        *self.mount_tree.write().unwrap() = mt;
    }

    pub fn set_open_limits(&self, limits: OpenLimits) {
        *self.open_limits.write().unwrap() = limits;
    }

    pub fn get_current_directory(&self) -> String {
        self.current_directory.lock().unwrap().clone()
    }

    fn resolve(&self, tvfs_path: &str) -> TvfsResult<ResolvedPath> {
        validate_tvfs_path(tvfs_path, self.host).map_err(|_| TvfsError::InvalidPath)?;
        let tree = self.mount_tree.read().unwrap();
        let (node, _level, native_path) = tree.resolve_path(tvfs_path, self.host);
        Ok(ResolvedPath { native_path, perms: node.perms })
    }

    fn node_children(&self, tvfs_path: &str) -> Vec<(String, Permissions, Option<String>)> {
        let tree = self.mount_tree.read().unwrap();
        let (node, _, _) = tree.resolve_path(tvfs_path, self.host);
        node.children
            .iter()
            .map(|(name, child)| (name.clone(), child.perms, child.target.clone()))
            .collect()
    }

    pub async fn open_file(&self, tvfs_path: &str, mode: OpenMode, rest: i64) -> TvfsResult<FileHandle> {
        let resolved = self.resolve(tvfs_path)?;
        let needed = if mode == OpenMode::Read { Permissions::READ } else { Permissions::WRITE };
        if !resolved.perms.contains(needed) {
            return Err(TvfsError::NoPermission);
        }
        if resolved.native_path.is_empty() {
            return Err(TvfsError::NotFound);
        }

        let limits = *self.open_limits.read().unwrap();
        if limits.files != UNLIMITED && self.open_files_counter.count() > limits.files as usize {
            return Err(TvfsError::QuotaReached);
        }

        let file = self.backend.open_file(&resolved.native_path, mode, rest).await?;
        Ok(FileHandle { file, _counter: self.open_files_counter.clone() })
    }

    pub async fn get_entry(&self, tvfs_path: &str) -> TvfsResult<Entry> {
        let resolved = self.resolve(tvfs_path)?;
        if resolved.perms.is_empty() {
            return Err(TvfsError::NoPermission);
        }

        let name = last_element(tvfs_path);
        let children = self.node_children(tvfs_path);

        if !children.is_empty() {
            let tree = self.mount_tree.read().unwrap();
            let (node, _, _) = tree.resolve_path(tvfs_path, self.host);
            return Ok(Entry::from_node(name, node));
        }

        if resolved.native_path.is_empty() {
            return Err(TvfsError::NotFound);
        }

        let info = self.backend.info(&resolved.native_path, true).await?;
        let mut e = Entry {
            name: name.to_string(),
            native_name: resolved.native_path.clone(),
            entry_type: if info.is_link { EntryType::Link } else { info.entry_type },
            size: info.size,
            mtime: info.mtime,
            perms: resolved.perms,
        };
        e.fixup_perms(resolved.perms);
        Ok(e)
    }

    pub async fn get_entries(&self, tvfs_path: &str) -> TvfsResult<Vec<Entry>> {
        let resolved = self.resolve(tvfs_path)?;
        let children = self.node_children(tvfs_path);

        let must_open = resolved.perms.contains(Permissions::READ) && !resolved.native_path.is_empty();
        let can_list_mounts = resolved.perms.contains(Permissions::LIST_MOUNTS) && !children.is_empty();

        if !must_open && !can_list_mounts {
            return Err(TvfsError::NoPermission);
        }

        if must_open {
            let limits = *self.open_limits.read().unwrap();
            if limits.directories != UNLIMITED && self.open_directories_counter.count() > limits.directories as usize {
                return Err(TvfsError::QuotaReached);
            }

            match self.backend.read_directory(&resolved.native_path).await {
                Ok(raw) => {
                    let mut out: Vec<Entry> = raw
                        .into_iter()
                        .map(|r| {
                            let mut e = Entry {
                                name: r.name,
                                native_name: String::new(),
                                entry_type: if r.info.is_link { EntryType::Link } else { r.info.entry_type },
                                size: r.info.size,
                                mtime: r.info.mtime,
                                perms: resolved.perms,
                            };
                            e.fixup_perms(resolved.perms);
                            e
                        })
                        .collect();

                    if can_list_mounts {
                        let seen: HashSet<&str> = out.iter().map(|e| e.name.as_str()).collect();
                        for (name, perms, target) in &children {
                            if !seen.contains(name.as_str()) {
                                out.push(pseudo_entry(name, *perms, target.clone()));
                            }
                        }
                    }

                    return Ok(out);
                }
                Err(e) => {
                    if can_list_mounts {
                        return Ok(children
                            .into_iter()
                            .map(|(name, perms, target)| pseudo_entry(&name, perms, target))
                            .collect());
                    }
                    return Err(e);
                }
            }
        }

        Ok(children
            .into_iter()
            .map(|(name, perms, target)| pseudo_entry(&name, perms, target))
            .collect())
    }

    pub async fn make_directory(&self, tvfs_path: &str) -> TvfsResult<String> {
        let resolved = self.resolve(tvfs_path)?;
        if !resolved.perms.contains(Permissions::WRITE) {
            return Err(TvfsError::NoPermission);
        }
        if resolved.native_path.is_empty() {
            return Err(TvfsError::InvalidPath);
        }
        self.backend.mkdir(&resolved.native_path, false, MkdirPermissions::Normal).await?;
        Ok(tvfs_path.to_string())
    }

    pub async fn set_mtime(&self, tvfs_path: &str, mtime: DateTime<Utc>) -> TvfsResult<Entry> {
        let resolved = self.resolve(tvfs_path)?;
        if !resolved.perms.contains(Permissions::WRITE) {
            return Err(TvfsError::NoPermission);
        }
        if resolved.native_path.is_empty() {
            return Err(TvfsError::NotFound);
        }
        self.backend.set_mtime(&resolved.native_path, mtime).await?;
        self.get_entry(tvfs_path).await
    }

    pub async fn remove_file(&self, tvfs_path: &str) -> TvfsResult<()> {
        let resolved = self.resolve(tvfs_path)?;
        if !resolved.perms.contains(Permissions::REMOVE) {
            return Err(TvfsError::NoPermission);
        }
        if resolved.native_path.is_empty() {
            return Err(TvfsError::NotFound);
        }
        self.backend.remove_file(&resolved.native_path).await
    }

    pub async fn remove_directory(&self, tvfs_path: &str, recursive: bool) -> TvfsResult<()> {
        let resolved = self.resolve(tvfs_path)?;
        if !resolved.perms.contains(Permissions::REMOVE) {
            return Err(TvfsError::NoPermission);
        }
        if recursive && !resolved.perms.contains(Permissions::ALLOW_STRUCTURE_MODIFICATION) {
            return Err(TvfsError::NoPermission);
        }
        if resolved.native_path.is_empty() {
            return Err(TvfsError::NotFound);
        }

        if recursive {
            self.remove_directory_recursive(tvfs_path).await?;
        }

        self.backend.remove_directory(&resolved.native_path).await
    }

    fn remove_directory_recursive<'a>(
        &'a self,
        tvfs_path: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = TvfsResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.get_entries(tvfs_path).await?;
            for e in entries {
                let child_path = format!("{}/{}", tvfs_path.trim_end_matches('/'), e.name);
                if e.is_directory() {
                    self.remove_directory_recursive(&child_path).await?;
                    let resolved = self.resolve(&child_path)?;
                    if !resolved.native_path.is_empty() {
                        self.backend.remove_directory(&resolved.native_path).await?;
                    }
                } else {
                    self.remove_file(&child_path).await?;
                }
            }
            Ok(())
        })
    }

    pub async fn rename(&self, from: &str, to: &str) -> TvfsResult<()> {
        let from_resolved = self.resolve(from)?;
        let to_resolved = self.resolve(to)?;
        if !from_resolved.perms.contains(Permissions::RENAME) {
            return Err(TvfsError::NoPermission);
        }
        if !to_resolved.perms.contains(Permissions::WRITE) {
            return Err(TvfsError::NoPermission);
        }
        if from_resolved.native_path.is_empty() || to_resolved.native_path.is_empty() {
            return Err(TvfsError::NotFound);
        }
        self.backend.rename(&from_resolved.native_path, &to_resolved.native_path).await
    }

    pub async fn set_current_directory(&self, tvfs_path: &str) -> TvfsResult<()> {
        let entry = self.get_entry(tvfs_path).await?;
        if !entry.is_directory() {
            return Err(TvfsError::NotADirectory);
        }
        *self.current_directory.lock().unwrap() = tvfs_path.to_string();
        Ok(())
    }
}

fn pseudo_entry(name: &str, perms: Permissions, target: Option<String>) -> Entry {
    Entry {
        name: name.to_string(),
        native_name: target.unwrap_or_default(),
        entry_type: EntryType::Dir,
        size: -1,
        mtime: Utc::now(),
        perms: perms & !(Permissions::REMOVE | Permissions::RENAME),
    }
}

fn last_element(tvfs_path: &str) -> &str {
    tvfs_path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("/")
}
