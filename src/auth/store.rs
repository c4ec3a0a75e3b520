//! File-backed group/user store (spec §4.1 "Store operations",
//! §4.1 "Sanitization"). Grounded on
//! `authentication/file_based_authenticator.cpp`'s `sanitize`/`update`/
//! `add_user`/`remove_user`/`make_temp_user`/`remove_temp_user`; the XML
//! archiver there is replaced with toml + serde, per this crate's config
//! format (the literal XML grammar is explicitly out of scope).

use std::collections::HashMap;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::credentials::{AnyPassword, Credentials, ImpersonationToken, PasswordWithImpersonation};
use super::group::{Group, RateLimits};
use super::method::{AuthMethod, AvailableMethods, MethodsSet};
use super::user::{DefaultImpersonator, User, SYSTEM_USER_NAME};
use crate::tvfs::limits::OpenLimits;
use crate::tvfs::MountTable;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("unsupported store version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct GroupsDoc {
    version: u32,
    #[serde(default)]
    groups: HashMap<String, GroupDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UsersDoc {
    version: u32,
    #[serde(default)]
    users: HashMap<String, UserDoc>,
    #[serde(default)]
    default_impersonator: ImpersonatorDoc,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImpersonatorDoc {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RateLimitsDoc {
    #[serde(default)]
    inbound: u64,
    #[serde(default)]
    outbound: u64,
    #[serde(default)]
    session_inbound: u64,
    #[serde(default)]
    session_outbound: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OpenLimitsDoc {
    #[serde(default)]
    files: u16,
    #[serde(default)]
    directories: u16,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupDoc {
    #[serde(default)]
    description: String,
    #[serde(default)]
    mount_table: MountTable,
    #[serde(default)]
    rate_limits: RateLimitsDoc,
    #[serde(default)]
    session_count_limit: usize,
    #[serde(default)]
    allowed_ips: Vec<String>,
    #[serde(default)]
    disallowed_ips: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PasswordDoc {
    /// `"plain"` for a legacy verbatim password, `"salted"` (hex-encoded
    /// salt/hash) for the default upgraded kind.
    kind: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    salt: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImpersonationDoc {
    os_user: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    login_only: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserDoc {
    #[serde(default)]
    description: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    password: Option<PasswordDoc>,
    #[serde(default)]
    impersonation: Option<ImpersonationDoc>,
    /// Each inner list is one alternative method-set route.
    #[serde(default)]
    methods: Vec<Vec<String>>,
    #[serde(default)]
    mount_table: MountTable,
    #[serde(default)]
    rate_limits: RateLimitsDoc,
    #[serde(default)]
    session_count_limit: usize,
    #[serde(default)]
    open_limits: OpenLimitsDoc,
    #[serde(default)]
    allowed_ips: Vec<String>,
    #[serde(default)]
    disallowed_ips: Vec<String>,
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

impl From<&RateLimits> for RateLimitsDoc {
    fn from(r: &RateLimits) -> Self {
        Self {
            inbound: r.inbound,
            outbound: r.outbound,
            session_inbound: r.session_inbound,
            session_outbound: r.session_outbound,
        }
    }
}

impl From<&RateLimitsDoc> for RateLimits {
    fn from(d: &RateLimitsDoc) -> Self {
        Self {
            inbound: d.inbound,
            outbound: d.outbound,
            session_inbound: d.session_inbound,
            session_outbound: d.session_outbound,
        }
    }
}

fn group_to_doc(g: &Group) -> GroupDoc {
    GroupDoc {
        description: g.description.clone(),
        mount_table: g.mount_table.clone(),
        rate_limits: (&g.rate_limits).into(),
        session_count_limit: g.session_count_limit,
        allowed_ips: g.allowed_ips.clone(),
        disallowed_ips: g.disallowed_ips.clone(),
    }
}

fn group_from_doc(name: &str, d: GroupDoc) -> Group {
    Group {
        name: name.to_string(),
        description: d.description,
        mount_table: d.mount_table,
        rate_limits: (&d.rate_limits).into(),
        session_count_limit: d.session_count_limit,
        allowed_ips: d.allowed_ips,
        disallowed_ips: d.disallowed_ips,
    }
}

fn password_to_doc(p: &AnyPassword) -> PasswordDoc {
    match p {
        AnyPassword::Plain(v) => PasswordDoc { kind: "plain".into(), value: v.clone(), salt: String::new() },
        AnyPassword::Salted { salt, hash } => PasswordDoc {
            kind: "salted".into(),
            value: hex_encode(hash),
            salt: hex_encode(salt),
        },
    }
}

fn password_from_doc(d: &PasswordDoc) -> Option<AnyPassword> {
    match d.kind.as_str() {
        "plain" => Some(AnyPassword::Plain(d.value.clone())),
        "salted" => {
            let salt_bytes = hex_decode(&d.salt);
            let hash_bytes = hex_decode(&d.value);
            if salt_bytes.len() == 16 && hash_bytes.len() == 32 {
                let mut salt = [0u8; 16];
                let mut hash = [0u8; 32];
                salt.copy_from_slice(&salt_bytes);
                hash.copy_from_slice(&hash_bytes);
                Some(AnyPassword::Salted { salt, hash })
            } else {
                None
            }
        }
        _ => None,
    }
}

fn user_to_doc(u: &User) -> UserDoc {
    let password = u.credentials.password.password.as_ref().map(password_to_doc);
    let impersonation = u.credentials.password.impersonation.as_ref().map(|t| ImpersonationDoc {
        os_user: t.os_user.clone(),
        password: t.password.clone(),
        group: t.group.clone(),
        login_only: t.login_only,
    });
    let methods = u
        .methods
        .sets()
        .iter()
        .map(|set| {
            [AuthMethod::None, AuthMethod::Password, AuthMethod::Token]
                .into_iter()
                .filter(|m| set.has(*m))
                .map(|m| m.to_string())
                .collect()
        })
        .collect();

    UserDoc {
        description: u.description.clone(),
        enabled: u.enabled,
        groups: u.groups.clone(),
        password,
        impersonation,
        methods,
        mount_table: u.mount_table.clone(),
        rate_limits: (&u.rate_limits).into(),
        session_count_limit: u.session_count_limit,
        open_limits: OpenLimitsDoc { files: u.open_limits.files, directories: u.open_limits.directories },
        allowed_ips: u.allowed_ips.clone(),
        disallowed_ips: u.disallowed_ips.clone(),
    }
}

fn user_from_doc(name: &str, d: UserDoc) -> User {
    let password = d.password.as_ref().and_then(password_from_doc);
    let impersonation = d.impersonation.map(|t| ImpersonationToken {
        os_user: t.os_user,
        password: t.password,
        group: t.group,
        login_only: t.login_only,
    });
    let methods = AvailableMethods::new(d.methods.iter().map(|route| {
        MethodsSet::from_methods(route.iter().filter_map(|s| AuthMethod::from_str(s).ok()))
    }));

    User {
        name: name.to_string(),
        description: d.description,
        enabled: d.enabled,
        groups: d.groups,
        credentials: Credentials { password: PasswordWithImpersonation { password, impersonation } },
        methods,
        mount_table: d.mount_table,
        rate_limits: (&d.rate_limits).into(),
        session_count_limit: d.session_count_limit,
        open_limits: OpenLimits { files: d.open_limits.files, directories: d.open_limits.directories },
        allowed_ips: d.allowed_ips,
        disallowed_ips: d.disallowed_ips,
    }
}

/// The in-memory group/user store: sanitized on load and after every
/// mutation (spec §4.1).
#[derive(Default)]
pub struct Store {
    pub groups: HashMap<String, Group>,
    pub users: HashMap<String, User>,
    /// Random-name, memory-only, used by the FTP self-tester (spec §3
    /// User lifecycle, §2 supplemented feature).
    pub temp_users: HashMap<String, User>,
    pub default_impersonator: DefaultImpersonator,
}

impl Store {
    pub fn load(groups_path: &std::path::Path, users_path: &std::path::Path) -> Result<Self, StoreError> {
        let groups_doc: GroupsDoc = toml::from_str(&std::fs::read_to_string(groups_path)?)?;
        if groups_doc.version != CURRENT_VERSION {
            return Err(StoreError::VersionMismatch { found: groups_doc.version, expected: CURRENT_VERSION });
        }
        let users_doc: UsersDoc = toml::from_str(&std::fs::read_to_string(users_path)?)?;
        if users_doc.version != CURRENT_VERSION {
            return Err(StoreError::VersionMismatch { found: users_doc.version, expected: CURRENT_VERSION });
        }

        let groups = groups_doc.groups.into_iter().map(|(name, d)| (name.clone(), group_from_doc(&name, d))).collect();
        let users = users_doc.users.into_iter().map(|(name, d)| (name.clone(), user_from_doc(&name, d))).collect();
        let default_impersonator = DefaultImpersonator {
            enabled: users_doc.default_impersonator.enabled,
            name: users_doc.default_impersonator.name,
            password: users_doc.default_impersonator.password,
            group: users_doc.default_impersonator.group,
        };

        let mut store = Self { groups, users, temp_users: HashMap::new(), default_impersonator };
        store.sanitize();
        Ok(store)
    }

    pub fn save(&self, groups_path: &std::path::Path, users_path: &std::path::Path) -> Result<(), StoreError> {
        let groups_doc = GroupsDoc {
            version: CURRENT_VERSION,
            groups: self.groups.iter().map(|(n, g)| (n.clone(), group_to_doc(g))).collect(),
        };
        let users_doc = UsersDoc {
            version: CURRENT_VERSION,
            users: self.users.iter().map(|(n, u)| (n.clone(), user_to_doc(u))).collect(),
            default_impersonator: ImpersonatorDoc {
                enabled: self.default_impersonator.enabled,
                name: self.default_impersonator.name.clone(),
                password: self.default_impersonator.password.clone(),
                group: self.default_impersonator.group.clone(),
            },
        };
        std::fs::write(groups_path, toml::to_string_pretty(&groups_doc)?)?;
        std::fs::write(users_path, toml::to_string_pretty(&users_doc)?)?;
        Ok(())
    }

    /// Drops groups/users with invalid names, force-installs the
    /// system-user sentinel, prunes dangling/duplicate group references,
    /// and defaults unrealizable method lists, in that order (spec §4.1).
    pub fn sanitize(&mut self) {
        self.groups.retain(|name, g| {
            let ok = !name.is_empty() && !g.has_invalid_name();
            if !ok {
                warn!(group = name, "group has invalid name, removing it from the list");
            }
            ok
        });

        let system_user = self.users.entry(SYSTEM_USER_NAME.to_string()).or_insert_with(User::system_user_default);
        if system_user.credentials.password.impersonation.is_none() {
            warn!("{SYSTEM_USER_NAME} doesn't have impersonation set; forcing credentials to impersonation");
            system_user.credentials.password.impersonation = Some(ImpersonationToken {
                os_user: String::new(),
                password: None,
                group: None,
                login_only: false,
            });
        }
        if system_user.methods.has(&MethodsSet::from_methods([AuthMethod::None])) {
            warn!("{SYSTEM_USER_NAME} was wrongly allowed to log in without credentials, fixed");
            system_user.methods.remove(&MethodsSet::from_methods([AuthMethod::None]));
        }

        let group_names: std::collections::HashSet<String> = self.groups.keys().cloned().collect();
        self.users.retain(|name, _| {
            let is_system = name == SYSTEM_USER_NAME;
            let ok = is_system || (!name.is_empty() && !name.contains(|c: char| super::user::INVALID_CHARS_IN_NAME.contains(c)));
            if !ok {
                warn!(user = name, "user has invalid name, removing it from the list");
            }
            ok
        });

        for (name, u) in self.users.iter_mut() {
            let mut seen = std::collections::HashSet::new();
            u.groups.retain(|g| {
                let exists = group_names.contains(g);
                let duplicate = !seen.insert(g.clone());
                if !exists {
                    warn!(user = name.as_str(), group = g.as_str(), "group referenced does not exist, ignoring");
                }
                if duplicate {
                    warn!(user = name.as_str(), group = g.as_str(), "group referenced multiple times, ignoring excess references");
                }
                exists && !duplicate
            });

            if !u.methods.is_auth_possible() {
                u.methods = u.credentials.most_secure_methods();
                debug!(user = name.as_str(), "defaulted auth methods to the most secure ones derivable from credentials");
            } else if !u.credentials.is_valid_for(&u.methods) {
                warn!(user = name.as_str(), "auth methods do not match the credentials, login will not be possible");
            }
        }

        self.default_impersonator.reset_if_wrong_platform();
    }

    pub fn add_user(&mut self, name: String, u: User) -> bool {
        if self.users.contains_key(&name) {
            return false;
        }
        self.users.insert(name, u);
        self.sanitize();
        true
    }

    pub fn remove_user(&mut self, name: &str) -> bool {
        let removed = self.users.remove(name).is_some();
        if removed {
            self.sanitize();
        }
        removed
    }

    /// Random 128-bit name + password, memory-only; used by the FTP
    /// self-tester (spec §3, §2 supplemented feature).
    pub fn make_temp_user(&mut self, mount_table: MountTable) -> Option<(String, String)> {
        let password = random_hex(16);

        let mut u = User {
            mount_table,
            methods: AvailableMethods::new([MethodsSet::from_methods([AuthMethod::Password])]),
            ..Default::default()
        };
        u.credentials.password.password = Some(AnyPassword::default_password(&password));

        const MAX_TRIES: u32 = 5;
        for _ in 0..MAX_TRIES {
            let name = random_hex(16);
            if !self.users.contains_key(&name) && !self.temp_users.contains_key(&name) {
                u.name = name.clone();
                self.temp_users.insert(name.clone(), u);
                return Some((name, password));
            }
        }
        None
    }

    pub fn remove_temp_user(&mut self, name: &str) -> bool {
        self.temp_users.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_installs_system_user_with_impersonation() {
        let mut store = Store::default();
        store.sanitize();
        let sys = &store.users[SYSTEM_USER_NAME];
        assert!(sys.credentials.password.impersonation.is_some());
        assert!(!sys.enabled);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut store = Store::default();
        store.groups.insert("".to_string(), Group::default());
        store.users.insert("bad\0name".to_string(), User { name: "bad\0name".into(), ..Default::default() });
        store.sanitize();
        let user_count = store.users.len();
        let group_count = store.groups.len();
        store.sanitize();
        assert_eq!(store.users.len(), user_count);
        assert_eq!(store.groups.len(), group_count);
    }

    #[test]
    fn sanitize_prunes_dangling_and_duplicate_group_refs() {
        let mut store = Store::default();
        store.groups.insert("staff".into(), Group { name: "staff".into(), ..Default::default() });
        store.users.insert(
            "alice".into(),
            User {
                name: "alice".into(),
                groups: vec!["staff".into(), "staff".into(), "ghost".into()],
                ..Default::default()
            },
        );
        store.sanitize();
        assert_eq!(store.users["alice"].groups, vec!["staff".to_string()]);
    }

    #[test]
    fn sanitize_defaults_unrealizable_methods_from_credentials() {
        let mut store = Store::default();
        let mut u = User { name: "alice".into(), ..Default::default() };
        u.credentials.password.password = Some(AnyPassword::Plain("x".into()));
        store.users.insert("alice".into(), u);
        store.sanitize();
        assert!(store.users["alice"].methods.sets()[0].has(AuthMethod::Password));
    }

    #[test]
    fn make_temp_user_is_memory_only_and_removable() {
        let mut store = Store::default();
        let (name, password) = store.make_temp_user(MountTable::new()).unwrap();
        assert!(!password.is_empty());
        assert!(store.temp_users.contains_key(&name));
        assert!(!store.users.contains_key(&name));
        assert!(store.remove_temp_user(&name));
        assert!(!store.temp_users.contains_key(&name));
    }

    #[test]
    fn doc_roundtrip_preserves_password_and_methods() {
        let mut u = User { name: "alice".into(), enabled: true, ..Default::default() };
        u.credentials.password.password = Some(AnyPassword::default_password("hunter2"));
        u.methods = AvailableMethods::new([MethodsSet::from_methods([AuthMethod::Password])]);

        let doc = user_to_doc(&u);
        let back = user_from_doc("alice", doc);
        assert_eq!(back.credentials.password.password, u.credentials.password.password);
        assert!(back.methods.sets()[0].has(AuthMethod::Password));
    }
}
