//! Mount points and mount tables (spec §3, §4.2).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountAccess {
    ReadOnly,
    ReadWrite,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recursion {
    None,
    Apply,
    ApplyAndAllowStructureMod,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MountFlags: u8 {
        const AUTOCREATE = 1 << 0;
    }
}

/// One `(virtual, native, access, recursion, flags)` tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountPoint {
    /// Absolute unix-style virtual path the client sees.
    pub virtual_path: String,
    /// Native path, possibly containing `%<placeholder>` tokens.
    pub native_path: String,
    pub access: MountAccess,
    pub recursion: Recursion,
    pub flags: MountFlags,
}

impl MountPoint {
    pub fn new(virtual_path: impl Into<String>, native_path: impl Into<String>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            native_path: native_path.into(),
            access: MountAccess::ReadWrite,
            recursion: Recursion::ApplyAndAllowStructureMod,
            flags: MountFlags::empty(),
        }
    }
}

/// A set of mount points, deduplicated by virtual path on merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountTable(pub Vec<MountPoint>);

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mp: MountPoint) {
        self.0.push(mp);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountPoint> {
        self.0.iter()
    }
}

impl FromIterator<MountPoint> for MountTable {
    fn from_iter<I: IntoIterator<Item = MountPoint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
