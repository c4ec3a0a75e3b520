//! Running TVFS operations as a different OS user than the server process,
//! via a pool of helper child processes (spec §4.5).

pub mod pool;
pub mod protocol;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

pub use pool::{Pool, PoolError};
