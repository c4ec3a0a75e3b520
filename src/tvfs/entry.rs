//! A single resolved TVFS entry: a file, directory, symlink, or bare mount
//! node with no backing native path (spec §4.2).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::perms::Permissions;
use super::tree::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Unknown,
    File,
    Dir,
    Link,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub native_name: String,
    pub entry_type: EntryType,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    pub perms: Permissions,
}

impl Entry {
    /// A pseudo-entry standing in for a mount node that has no backend
    /// file behind it — only its children make it a directory.
    pub fn from_node(name: impl Into<String>, node: &Node) -> Self {
        Self {
            name: name.into(),
            native_name: node.target.clone().unwrap_or_default(),
            entry_type: EntryType::Dir,
            size: -1,
            mtime: Utc::now(),
            perms: node.perms & !(Permissions::REMOVE | Permissions::RENAME),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type == EntryType::Link
    }

    pub fn can_rename(&self) -> bool {
        self.perms.contains(Permissions::RENAME)
    }

    /// Restricts a child entry's permissions against its parent directory's
    /// recursion settings: no recursion means no permissions at all; a
    /// recursive mount without structure modification still forbids
    /// renaming or removing the children.
    pub fn fixup_perms(&mut self, parent_perms: Permissions) {
        if self.entry_type != EntryType::Dir {
            return;
        }
        if !parent_perms.contains(Permissions::APPLY_RECURSIVELY) {
            self.perms = Permissions::empty();
        } else if !parent_perms.contains(Permissions::ALLOW_STRUCTURE_MODIFICATION) {
            self.perms.remove(Permissions::REMOVE | Permissions::RENAME);
        }
    }

    /// Formats an entry time as `YYYYMMDDHHMMSS[.mmm]`, the format used by
    /// `MDTM`/`MLSD` style directory listings.
    pub fn format_timeval(t: &DateTime<Utc>) -> String {
        let millis = t.timestamp_subsec_millis();
        if millis == 0 {
            t.format("%Y%m%d%H%M%S").to_string()
        } else {
            format!("{}.{millis:03}", t.format("%Y%m%d%H%M%S"))
        }
    }

    /// The inverse of [`Self::format_timeval`]; returns `None` on anything
    /// that doesn't parse as a well-formed timestamp.
    pub fn parse_timeval(s: &str) -> Option<DateTime<Utc>> {
        if s.len() < 14 {
            return None;
        }

        let digits = |r: std::ops::Range<usize>| s.get(r)?.parse::<u32>().ok();

        let year = digits(0..4)?;
        let month = digits(4..6)?;
        let day = digits(6..8)?;
        let hour = digits(8..10)?;
        let minute = digits(10..12)?;
        let second = digits(12..14)?;

        let millis = if s.len() > 14 {
            if s.as_bytes().get(14) != Some(&b'.') {
                return None;
            }
            s.get(15..)?.parse::<u32>().ok()?
        } else {
            0
        };

        if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || minute > 59 || second > 59 {
            return None;
        }

        Utc.with_ymd_and_hms(year as i32, month, day, hour, minute, second)
            .single()
            .map(|dt| dt + chrono::Duration::milliseconds(millis as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_perms_clears_all_without_recursion() {
        let mut e = Entry {
            name: "d".into(),
            native_name: "/srv/d".into(),
            entry_type: EntryType::Dir,
            size: -1,
            mtime: Utc::now(),
            perms: Permissions::all(),
        };
        e.fixup_perms(Permissions::READ);
        assert_eq!(e.perms, Permissions::empty());
    }

    #[test]
    fn fixup_perms_strips_remove_rename_without_structure_mod() {
        let mut e = Entry {
            name: "d".into(),
            native_name: "/srv/d".into(),
            entry_type: EntryType::Dir,
            size: -1,
            mtime: Utc::now(),
            perms: Permissions::all(),
        };
        e.fixup_perms(Permissions::READ | Permissions::APPLY_RECURSIVELY);
        assert!(!e.perms.contains(Permissions::REMOVE));
        assert!(!e.perms.contains(Permissions::RENAME));
        assert!(e.perms.contains(Permissions::READ));
    }

    #[test]
    fn timeval_round_trips() {
        let t = Utc.with_ymd_and_hms(2024, 3, 7, 1, 2, 3).unwrap();
        let s = Entry::format_timeval(&t);
        assert_eq!(s, "20240307010203");
        assert_eq!(Entry::parse_timeval(&s), Some(t));
    }

    #[test]
    fn timeval_rejects_garbage() {
        assert_eq!(Entry::parse_timeval("not-a-date"), None);
        assert_eq!(Entry::parse_timeval("20241301010203"), None);
    }
}
