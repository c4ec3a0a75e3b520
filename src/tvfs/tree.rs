//! The mount tree: virtual-to-native path resolution (spec §4.2).
//!
//! Mount points are merged into a tree of [`Node`]s keyed by path element.
//! Intermediate nodes (those with no mount point of their own) inherit a
//! target and a restricted set of permissions from their nearest mounted
//! ancestor, so that e.g. `/srv/ftp/docs` being world-readable doesn't
//! silently make `/srv` world-listable unless the ancestor mount was marked
//! recursive.

use tracing::warn;

use super::mount::{MountAccess, MountFlags, MountPoint, MountTable};
use super::perms::Permissions;
use super::placeholders::{substitute_placeholders, PlaceholderMap};
use super::validation::{validate_native_path, validate_tvfs_path, NativeFormat, ValidationFailure};

/// One node in the mount tree.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub children: Vec<(String, Node)>,
    /// The native path this node maps to, if any; `None` for an
    /// intermediate node with no ancestor target to inherit.
    pub target: Option<String>,
    pub perms: Permissions,
    pub flags: MountFlags,
}

impl Node {
    pub fn find(&self, name: &str, host: NativeFormat) -> Option<&Node> {
        self.children
            .iter()
            .find(|(n, _)| names_equal(n, name, host))
            .map(|(_, n)| n)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MountTree {
    root: Node,
}

impl MountTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Walks as far down the tree as `elements` allows, returning the
    /// deepest matching node and how many elements were consumed.
    fn find_node<'a>(&'a self, elements: &[String], host: NativeFormat) -> (&'a Node, usize) {
        let mut node = &self.root;
        let mut consumed = 0;
        for e in elements {
            match node.find(e, host) {
                Some(next) => {
                    node = next;
                    consumed += 1;
                }
                None => break,
            }
        }
        (node, consumed)
    }

    /// Resolves a validated, absolute virtual path to the deepest matching
    /// node, that node's depth below the tvfs path (0 if it's a leaf), and
    /// the corresponding native path. Returns an empty native path if no
    /// ancestor node carries a target.
    pub fn resolve_path(&self, tvfs_path: &str, host: NativeFormat) -> (&Node, usize, String) {
        let elements = split_elements(tvfs_path);
        let (node, consumed) = self.find_node(&elements, host);
        let node_level = elements.len() - consumed;

        let mut native_path = node.target.clone().unwrap_or_default();
        if !native_path.is_empty() {
            for e in &elements[consumed..] {
                native_path = join_native(&native_path, e, host);
            }
        }

        (node, node_level, native_path)
    }

    /// Re-roots the tree at `tvfs_path`: the node found there becomes the
    /// new root, with its target replaced by the fully resolved native path.
    pub fn set_root(&mut self, tvfs_path: &str, host: NativeFormat) -> bool {
        if tvfs_path.is_empty() {
            return false;
        }
        let (node, _, native_path) = self.resolve_path(tvfs_path, host);
        let mut new_root = node.clone();
        new_root.target = if native_path.is_empty() { None } else { Some(native_path) };
        self.root = new_root;
        true
    }

    /// Prunes every child at each level that doesn't match `elements`,
    /// stopping early (leaving deeper levels untouched) the first time a
    /// level has no matching child at all.
    pub fn prune_all_except(&mut self, elements: &[String], host: NativeFormat) {
        let mut node = &mut self.root;
        for e in elements {
            let found = node.children.iter().any(|(n, _)| names_equal(n, e, host));
            if !found {
                break;
            }
            node.children.retain(|(n, _)| names_equal(n, e, host));
            node = &mut node.children[0].1;
        }
    }

    /// Validates, sorts, and merges a mount table into the tree, in place.
    /// Mount points that fail path validation are dropped with a warning
    /// (mirroring what a bad config line should do: degrade, don't crash).
    pub fn merge_with(&mut self, mt: &MountTable, placeholders: &PlaceholderMap, host: NativeFormat) {
        let mut valid: Vec<MountPoint> = Vec::new();

        for (i, mp) in mt.iter().enumerate() {
            let row = i + 1;
            let mut mp = mp.clone();
            let native_path = substitute_placeholders(&mp.native_path, placeholders);

            if mp.access != MountAccess::Disabled {
                if let Err(e) = validate_native_path(&native_path, host) {
                    warn_skipped(row, "native", &mp.native_path, &e);
                    continue;
                }
            }
            if let Err(e) = validate_tvfs_path(&mp.virtual_path, host) {
                warn_skipped(row, "virtual", &mp.virtual_path, &e);
                continue;
            }

            mp.native_path = native_path;
            valid.push(mp);
        }

        valid.sort_by(|a, b| split_elements(&a.virtual_path).cmp(&split_elements(&b.virtual_path)));

        for mp in &valid {
            let elements = split_elements(&mp.virtual_path);
            let last = elements.len().saturating_sub(1);

            let mut node = &mut self.root;
            for (i, e) in elements.iter().enumerate() {
                let idx = node.children.iter().position(|(n, _)| names_equal(n, e, host));
                let idx = idx.unwrap_or_else(|| {
                    let mut child = Node::default();
                    if i != last {
                        if let Some(target) = node.target.clone() {
                            child.target = Some(join_native(&target, e, host));
                            child.perms = if node.perms.contains(Permissions::APPLY_RECURSIVELY) {
                                node.perms
                            } else {
                                Permissions::LIST_MOUNTS
                            };
                        } else {
                            child.perms = Permissions::LIST_MOUNTS;
                        }
                    }
                    node.children.push((e.clone(), child));
                    node.children.len() - 1
                });
                node = &mut node.children[idx].1;
            }

            node.target = Some(mp.native_path.clone());
            node.perms = Permissions::from_access(mp.access) | Permissions::from_recursion(mp.recursion);
            node.flags = mp.flags;
        }
    }
}

fn warn_skipped(row: usize, kind: &str, path: &str, err: &ValidationFailure) {
    match err {
        ValidationFailure::InvalidPlaceholderValues { explanations } => {
            warn!(row, kind, path, ?explanations, "mount point has placeholder expansion issues, ignoring it");
        }
        ValidationFailure::PathHasInvalidCharacters => {
            warn!(row, kind, path, "mount point path has invalid characters, ignoring it");
        }
        ValidationFailure::PathIsNotAbsolute => {
            warn!(row, kind, path, "mount point path is not absolute, ignoring it");
        }
        ValidationFailure::PathIsEmpty => {
            warn!(row, kind, path, "mount point path is empty, ignoring it");
        }
    }
}

fn names_equal(a: &str, b: &str, host: NativeFormat) -> bool {
    if host == NativeFormat::Windows {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn split_elements(path: &str) -> Vec<String> {
    path.split('/').filter(|e| !e.is_empty()).map(str::to_string).collect()
}

fn join_native(base: &str, element: &str, host: NativeFormat) -> String {
    let sep = if host == NativeFormat::Windows { '\\' } else { '/' };
    if base.ends_with(sep) {
        format!("{base}{element}")
    } else {
        format!("{base}{sep}{element}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvfs::mount::Recursion;

    fn mp(v: &str, n: &str, access: MountAccess, recursion: Recursion) -> MountPoint {
        let mut m = MountPoint::new(v, n);
        m.access = access;
        m.recursion = recursion;
        m
    }

    #[test]
    fn resolves_exact_mount_point() {
        let mut mt = MountTable::new();
        mt.push(mp("/docs", "/srv/ftp/docs", MountAccess::ReadWrite, Recursion::Apply));
        let mut tree = MountTree::new();
        tree.merge_with(&mt, &PlaceholderMap::new(), NativeFormat::Posix);

        let (node, level, native) = tree.resolve_path("/docs", NativeFormat::Posix);
        assert_eq!(level, 0);
        assert_eq!(native, "/srv/ftp/docs");
        assert!(node.perms.contains(Permissions::READ | Permissions::WRITE));
    }

    #[test]
    fn resolves_path_beneath_mount_point_by_appending_elements() {
        let mut mt = MountTable::new();
        mt.push(mp("/docs", "/srv/ftp/docs", MountAccess::ReadOnly, Recursion::Apply));
        let mut tree = MountTree::new();
        tree.merge_with(&mt, &PlaceholderMap::new(), NativeFormat::Posix);

        let (_node, level, native) = tree.resolve_path("/docs/a/b.txt", NativeFormat::Posix);
        assert_eq!(level, 2);
        assert_eq!(native, "/srv/ftp/docs/a/b.txt");
    }

    #[test]
    fn intermediate_node_inherits_list_mounts_only_without_recursion() {
        let mut mt = MountTable::new();
        mt.push(mp("/a/b", "/srv/b", MountAccess::ReadWrite, Recursion::None));
        let mut tree = MountTree::new();
        tree.merge_with(&mt, &PlaceholderMap::new(), NativeFormat::Posix);

        let (node, level, _) = tree.resolve_path("/a", NativeFormat::Posix);
        assert_eq!(level, 0);
        assert_eq!(node.perms, Permissions::LIST_MOUNTS);
    }

    #[test]
    fn intermediate_node_inherits_full_perms_when_ancestor_is_recursive() {
        let mut mt = MountTable::new();
        mt.push(mp("/a", "/srv/a", MountAccess::ReadWrite, Recursion::Apply));
        mt.push(mp("/a/b/c", "/srv/a/b/c", MountAccess::ReadOnly, Recursion::None));
        let mut tree = MountTree::new();
        tree.merge_with(&mt, &PlaceholderMap::new(), NativeFormat::Posix);

        let (node, _, native) = tree.resolve_path("/a/b", NativeFormat::Posix);
        assert!(node.perms.contains(Permissions::APPLY_RECURSIVELY));
        assert_eq!(native, "/srv/a/b");
    }

    #[test]
    fn invalid_mount_point_is_dropped_not_fatal() {
        let mut mt = MountTable::new();
        mt.push(mp("docs", "/srv/ftp/docs", MountAccess::ReadWrite, Recursion::Apply));
        mt.push(mp("/ok", "/srv/ftp/ok", MountAccess::ReadWrite, Recursion::Apply));
        let mut tree = MountTree::new();
        tree.merge_with(&mt, &PlaceholderMap::new(), NativeFormat::Posix);

        let (_, level, native) = tree.resolve_path("/ok", NativeFormat::Posix);
        assert_eq!(level, 0);
        assert_eq!(native, "/srv/ftp/ok");
        assert!(tree.root().find("docs", NativeFormat::Posix).is_none());
    }

    #[test]
    fn set_root_rebases_tree() {
        let mut mt = MountTable::new();
        mt.push(mp("/a/b", "/srv/a/b", MountAccess::ReadWrite, Recursion::Apply));
        let mut tree = MountTree::new();
        tree.merge_with(&mt, &PlaceholderMap::new(), NativeFormat::Posix);

        assert!(tree.set_root("/a", NativeFormat::Posix));
        let (_, level, native) = tree.resolve_path("/b", NativeFormat::Posix);
        assert_eq!(level, 0);
        assert_eq!(native, "/srv/a/b");
    }
}
