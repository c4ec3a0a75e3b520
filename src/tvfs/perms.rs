//! Permission bitmap (spec §4.2).

use bitflags::bitflags;

use super::mount::{MountAccess, Recursion};

bitflags! {
    /// Effective permissions granted on a resolved TVFS node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permissions: u16 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const REMOVE = 1 << 2;
        const RENAME = 1 << 3;
        const LIST_MOUNTS = 1 << 4;
        const APPLY_RECURSIVELY = 1 << 5;
        const ALLOW_STRUCTURE_MODIFICATION = 1 << 6;
    }
}

impl Permissions {
    /// Derives the access-driven subset of permissions, per spec §4.2.
    pub fn from_access(access: MountAccess) -> Self {
        match access {
            MountAccess::ReadOnly => Permissions::READ | Permissions::LIST_MOUNTS,
            MountAccess::ReadWrite => {
                Permissions::READ | Permissions::LIST_MOUNTS | Permissions::WRITE
            }
            MountAccess::Disabled => Permissions::empty(),
        }
    }

    /// Derives the recursion-driven subset of permissions.
    pub fn from_recursion(recursion: Recursion) -> Self {
        match recursion {
            Recursion::None => Permissions::empty(),
            Recursion::Apply => Permissions::APPLY_RECURSIVELY,
            Recursion::ApplyAndAllowStructureMod => {
                Permissions::APPLY_RECURSIVELY | Permissions::ALLOW_STRUCTURE_MODIFICATION
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_recursive_structure_mod_implies_rename_and_remove() {
        let perms = Permissions::from_access(MountAccess::ReadWrite)
            | Permissions::from_recursion(Recursion::ApplyAndAllowStructureMod);
        assert!(perms.contains(Permissions::READ));
        assert!(perms.contains(Permissions::WRITE));
        assert!(perms.contains(Permissions::APPLY_RECURSIVELY));
        assert!(perms.contains(Permissions::ALLOW_STRUCTURE_MODIFICATION));
    }

    #[test]
    fn disabled_access_has_no_permissions() {
        assert_eq!(Permissions::from_access(MountAccess::Disabled), Permissions::empty());
    }
}
