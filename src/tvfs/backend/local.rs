//! Direct local filesystem backend.

use std::io::ErrorKind;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::{Backend, BackendResult, FileInfo, MkdirPermissions, OpenMode, RawDirEntry};
use crate::tvfs::entry::EntryType;
use crate::tvfs::TvfsError;

#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn map_io_err(e: std::io::Error) -> TvfsError {
    match e.kind() {
        ErrorKind::NotFound => TvfsError::NotFound,
        ErrorKind::PermissionDenied => TvfsError::NoPermission,
        ErrorKind::AlreadyExists => TvfsError::AlreadyExists,
        _ => TvfsError::Io(e),
    }
}

fn to_datetime(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

async fn stat_to_info(meta: &std::fs::Metadata, is_link: bool) -> FileInfo {
    let entry_type = if meta.is_dir() {
        EntryType::Dir
    } else if meta.is_file() {
        EntryType::File
    } else {
        EntryType::Link
    };

    FileInfo {
        is_link,
        entry_type,
        size: meta.len() as i64,
        mtime: meta.modified().map(to_datetime).unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn info(&self, native_path: &str, follow_symlink: bool) -> BackendResult<FileInfo> {
        let meta = if follow_symlink {
            fs::metadata(native_path).await.map_err(map_io_err)?
        } else {
            fs::symlink_metadata(native_path).await.map_err(map_io_err)?
        };
        Ok(stat_to_info(&meta, meta.is_symlink()).await)
    }

    async fn open_file(&self, native_path: &str, mode: OpenMode, rest: i64) -> BackendResult<tokio::fs::File> {
        let mut opts = fs::OpenOptions::new();
        match mode {
            OpenMode::Read => {
                opts.read(true);
            }
            OpenMode::Write => {
                opts.write(true).create(true).truncate(rest <= 0);
            }
            OpenMode::Append => {
                opts.write(true).create(true).append(true);
            }
        }

        let file = opts.open(native_path).await.map_err(map_io_err)?;

        if mode != OpenMode::Read && rest > 0 {
            use tokio::io::{AsyncSeekExt, SeekFrom};
            let mut file = file;
            file.seek(SeekFrom::Start(rest as u64)).await.map_err(map_io_err)?;
            return Ok(file);
        }

        Ok(file)
    }

    async fn read_directory(&self, native_path: &str) -> BackendResult<Vec<RawDirEntry>> {
        let mut rd = fs::read_dir(native_path).await.map_err(map_io_err)?;
        let mut out = Vec::new();

        while let Some(entry) = rd.next_entry().await.map_err(map_io_err)? {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push(RawDirEntry {
                name,
                info: stat_to_info(&meta, meta.is_symlink()).await,
            });
        }

        Ok(out)
    }

    async fn mkdir(&self, native_path: &str, recurse: bool, _perms: MkdirPermissions) -> BackendResult<()> {
        if recurse {
            fs::create_dir_all(native_path).await.map_err(map_io_err)
        } else {
            fs::create_dir(native_path).await.map_err(map_io_err)
        }
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        fs::rename(from, to).await.map_err(map_io_err)
    }

    async fn remove_file(&self, native_path: &str) -> BackendResult<()> {
        fs::remove_file(native_path).await.map_err(map_io_err)
    }

    async fn remove_directory(&self, native_path: &str) -> BackendResult<()> {
        fs::remove_dir(native_path).await.map_err(map_io_err)
    }

    async fn set_mtime(&self, native_path: &str, mtime: DateTime<Utc>) -> BackendResult<()> {
        let path = native_path.to_string();
        let mtime: SystemTime = mtime.into();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(mtime)
        })
        .await
        .map_err(|e| TvfsError::Backend(e.to_string()))?
        .map_err(map_io_err)
    }
}
