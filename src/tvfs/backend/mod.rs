//! The storage abstraction TVFS operations run against: a plain local
//! filesystem, or one mediated through [`crate::impersonator`].

pub mod impersonated;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::EntryType;
use super::TvfsError;

pub type BackendResult<T> = Result<T, TvfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub is_link: bool,
    pub entry_type: EntryType,
    pub size: i64,
    pub mtime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDirEntry {
    pub name: String,
    pub info: FileInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MkdirPermissions {
    Normal,
    Restricted,
}

/// A place TVFS native paths actually live. `local` talks to the
/// filesystem directly; `impersonated` runs the same operations as a
/// different OS user via the impersonation channel.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn info(&self, native_path: &str, follow_symlink: bool) -> BackendResult<FileInfo>;

    async fn open_file(&self, native_path: &str, mode: OpenMode, rest: i64) -> BackendResult<tokio::fs::File>;

    /// Reads a whole directory listing at once. Directories on an FTP-style
    /// server are not expected to hold enough entries for this to matter,
    /// and it keeps the backend trait object-safe without a boxed stream.
    async fn read_directory(&self, native_path: &str) -> BackendResult<Vec<RawDirEntry>>;

    async fn mkdir(&self, native_path: &str, recurse: bool, perms: MkdirPermissions) -> BackendResult<()>;

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()>;

    async fn remove_file(&self, native_path: &str) -> BackendResult<()>;

    async fn remove_directory(&self, native_path: &str) -> BackendResult<()>;

    async fn set_mtime(&self, native_path: &str, mtime: DateTime<Utc>) -> BackendResult<()>;
}
