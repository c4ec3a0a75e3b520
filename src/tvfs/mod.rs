//! The Translated Virtual File System: a mount tree mapping client-visible
//! virtual paths onto native storage, with per-node permissions (spec §4.2).

pub mod backend;
pub mod engine;
pub mod entry;
pub mod limits;
pub mod mount;
pub mod perms;
pub mod placeholders;
pub mod tree;
pub mod validation;

use thiserror::Error;

pub use backend::Backend;
pub use engine::Engine;
pub use entry::{Entry, EntryType};
pub use mount::{MountAccess, MountFlags, MountPoint, MountTable, Recursion};
pub use perms::Permissions;
pub use tree::{MountTree, Node};
pub use validation::NativeFormat;

pub type TvfsResult<T> = Result<T, TvfsError>;

/// Everything a TVFS operation can fail with. Mirrors the small, closed
/// result set the engine reports to protocol handlers: callers branch on
/// the variant, not on message text.
#[derive(Debug, Error)]
pub enum TvfsError {
    #[error("path is invalid")]
    InvalidPath,
    #[error("permission denied")]
    NoPermission,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("open file/directory quota reached")]
    QuotaReached,
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}
