//! The wire protocol spoken between the server process and an
//! impersonated helper child (spec §4.5).
//!
//! Messages are newline-delimited JSON, one [`Request`] per line in,
//! one [`Response`] per line out. JSON (rather than a binary codec) keeps
//! the helper binary trivial to reimplement on any platform the server
//! supports, and framing cost doesn't matter at this call rate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tvfs::backend::{FileInfo, MkdirPermissions, OpenMode, RawDirEntry};
use crate::tvfs::TvfsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Info { native_path: String, follow_symlink: bool },
    OpenFile { native_path: String, mode: OpenMode, rest: i64 },
    ReadDirectory { native_path: String },
    Mkdir { native_path: String, recurse: bool, perms: MkdirPermissions },
    Rename { from: String, to: String },
    RemoveFile { native_path: String },
    RemoveDirectory { native_path: String },
    SetMtime { native_path: String, mtime: DateTime<Utc> },
}

/// What travels the wire as one line of JSON. A successfully opened file
/// does not go through here: [`WireResponse::FileOpened`] just announces
/// that a descriptor follows out-of-band (an `SCM_RIGHTS` ancillary message
/// on POSIX), which [`super::pool::Pool`] reassembles into [`Response::File`].
#[derive(Debug, Serialize, Deserialize)]
pub enum WireResponse {
    Ok,
    Info(FileInfo),
    Directory(Vec<RawDirEntry>),
    FileOpened,
    Error(RemoteError),
}

/// What a caller in this process actually gets back.
#[derive(Debug)]
pub enum Response {
    Ok,
    Info(FileInfo),
    Directory(Vec<RawDirEntry>),
    File(tokio::fs::File),
    Error(RemoteError),
}

/// [`TvfsError`], flattened to something that survives a trip through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteError {
    InvalidPath,
    NoPermission,
    NotFound,
    NotADirectory,
    IsADirectory,
    AlreadyExists,
    QuotaReached,
    Io(String),
    Other(String),
}

impl From<&TvfsError> for RemoteError {
    fn from(e: &TvfsError) -> Self {
        match e {
            TvfsError::InvalidPath => RemoteError::InvalidPath,
            TvfsError::NoPermission => RemoteError::NoPermission,
            TvfsError::NotFound => RemoteError::NotFound,
            TvfsError::NotADirectory => RemoteError::NotADirectory,
            TvfsError::IsADirectory => RemoteError::IsADirectory,
            TvfsError::AlreadyExists => RemoteError::AlreadyExists,
            TvfsError::QuotaReached => RemoteError::QuotaReached,
            TvfsError::Io(e) => RemoteError::Io(e.to_string()),
            TvfsError::Backend(s) => RemoteError::Other(s.clone()),
        }
    }
}

impl From<RemoteError> for TvfsError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::InvalidPath => TvfsError::InvalidPath,
            RemoteError::NoPermission => TvfsError::NoPermission,
            RemoteError::NotFound => TvfsError::NotFound,
            RemoteError::NotADirectory => TvfsError::NotADirectory,
            RemoteError::IsADirectory => TvfsError::IsADirectory,
            RemoteError::AlreadyExists => TvfsError::AlreadyExists,
            RemoteError::QuotaReached => TvfsError::QuotaReached,
            RemoteError::Io(s) | RemoteError::Other(s) => TvfsError::Backend(s),
        }
    }
}

