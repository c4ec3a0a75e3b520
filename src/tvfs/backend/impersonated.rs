//! Backend that runs every operation as a different OS user, via the
//! impersonation channel (spec §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Backend, BackendResult, FileInfo, MkdirPermissions, OpenMode, RawDirEntry};
use crate::impersonator::pool::Pool;
use crate::impersonator::protocol::{Request, Response};
use crate::tvfs::TvfsError;

/// Shares one impersonator pool across every user that needs it; the pool
/// itself keeps separate sub-pools of idle helper processes per OS user.
pub struct ImpersonatedBackend {
    pool: Arc<Pool>,
    user: String,
}

impl ImpersonatedBackend {
    pub fn new(pool: Arc<Pool>, user: impl Into<String>) -> Self {
        Self { pool, user: user.into() }
    }

    async fn call(&self, req: Request) -> Result<Response, TvfsError> {
        self.pool
            .call(&self.user, req)
            .await
            .map_err(|e| TvfsError::Backend(e.to_string()))
    }
}

#[async_trait]
impl Backend for ImpersonatedBackend {
    async fn info(&self, native_path: &str, follow_symlink: bool) -> BackendResult<FileInfo> {
        match self
            .call(Request::Info {
                native_path: native_path.to_string(),
                follow_symlink,
            })
            .await?
        {
            Response::Info(info) => Ok(info),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to info".into())),
        }
    }

    async fn open_file(&self, native_path: &str, mode: OpenMode, rest: i64) -> BackendResult<tokio::fs::File> {
        match self
            .call(Request::OpenFile {
                native_path: native_path.to_string(),
                mode,
                rest,
            })
            .await?
        {
            Response::File(file) => Ok(file),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to open_file".into())),
        }
    }

    async fn read_directory(&self, native_path: &str) -> BackendResult<Vec<RawDirEntry>> {
        match self
            .call(Request::ReadDirectory {
                native_path: native_path.to_string(),
            })
            .await?
        {
            Response::Directory(entries) => Ok(entries),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to read_directory".into())),
        }
    }

    async fn mkdir(&self, native_path: &str, recurse: bool, perms: MkdirPermissions) -> BackendResult<()> {
        match self
            .call(Request::Mkdir {
                native_path: native_path.to_string(),
                recurse,
                perms,
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to mkdir".into())),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        match self
            .call(Request::Rename {
                from: from.to_string(),
                to: to.to_string(),
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to rename".into())),
        }
    }

    async fn remove_file(&self, native_path: &str) -> BackendResult<()> {
        match self
            .call(Request::RemoveFile {
                native_path: native_path.to_string(),
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to remove_file".into())),
        }
    }

    async fn remove_directory(&self, native_path: &str) -> BackendResult<()> {
        match self
            .call(Request::RemoveDirectory {
                native_path: native_path.to_string(),
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to remove_directory".into())),
        }
    }

    async fn set_mtime(&self, native_path: &str, mtime: DateTime<Utc>) -> BackendResult<()> {
        match self
            .call(Request::SetMtime {
                native_path: native_path.to_string(),
                mtime,
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Error(e) => Err(e.into()),
            _ => Err(TvfsError::Backend("unexpected impersonator response to set_mtime".into())),
        }
    }
}
