//! SQLite-backed refresh token store for the WebUI (spec §3 `TokenDB`).
//! Grounded on `authentication/sqlite_token_db.{hpp,cpp}` and
//! `token_manager.{hpp,cpp}`: a `tokens` table keyed by an id whose
//! `refresh_id` increments on every refresh, plus a single-row
//! `key_storage` table holding the symmetric key used to encrypt tokens
//! handed to the browser. `rusqlite` replaces the original's raw
//! `sqlite3_*` C API calls; everything else (the replay-attack check in
//! [`TokenManager::verify`]) follows the original's logic unchanged.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum TokenDbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u64,
    pub refresh_id: u64,
    pub username: String,
    pub path: String,
    pub must_impersonate: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Utc::now())
    }
}

/// The 32-byte key used to encrypt `(id, refresh_id)` pairs handed out as
/// browser cookies; persisted so tokens survive a server restart.
pub struct SymmetricKey(pub [u8; 32]);

impl SymmetricKey {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Owns the sqlite connection backing [`TokenManager`]. Blocking calls are
/// fine here: every caller already holds the manager's async mutex, so
/// there's no separate executor-starvation risk worth a `spawn_blocking`
/// indirection for a single-row key lookup or a handful-of-rows table.
pub struct TokenDb {
    conn: Connection,
    key: SymmetricKey,
}

impl TokenDb {
    pub fn open(path: &std::path::Path) -> Result<Self, TokenDbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY,
                refresh_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                path TEXT NOT NULL,
                must_impersonate INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS key_storage (key BLOB NOT NULL);",
        )?;

        let key = Self::load_or_create_key(&conn)?;
        Ok(Self { conn, key })
    }

    pub fn open_in_memory() -> Result<Self, TokenDbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE tokens (
                id INTEGER PRIMARY KEY,
                refresh_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                path TEXT NOT NULL,
                must_impersonate INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            );
            CREATE TABLE key_storage (key BLOB NOT NULL);",
        )?;
        let key = Self::load_or_create_key(&conn)?;
        Ok(Self { conn, key })
    }

    fn load_or_create_key(conn: &Connection) -> Result<SymmetricKey, TokenDbError> {
        let existing: Option<Vec<u8>> = conn
            .query_row("SELECT key FROM key_storage LIMIT 1", [], |row| row.get(0))
            .optional()?;

        if let Some(bytes) = existing {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return Ok(SymmetricKey(key));
            }
        }

        let key = SymmetricKey::generate();
        conn.execute("DELETE FROM key_storage", [])?;
        conn.execute("INSERT INTO key_storage (key) VALUES (?1)", params![key.0.to_vec()])?;
        Ok(key)
    }

    pub fn symmetric_key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn select(&self, id: u64) -> Result<Option<Token>, TokenDbError> {
        self.conn
            .query_row(
                "SELECT id, refresh_id, username, path, must_impersonate, created_at, expires_at FROM tokens WHERE id = ?1",
                params![id as i64],
                row_to_token,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn insert(&self, username: String, path: String, must_impersonate: bool, expires_in: Option<chrono::Duration>) -> Result<Token, TokenDbError> {
        let now = Utc::now();
        let expires_at = expires_in.map(|d| now + d);

        self.conn.execute(
            "INSERT INTO tokens (refresh_id, username, path, must_impersonate, created_at, expires_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![username, path, must_impersonate as i64, now.timestamp(), expires_at.map(|d| d.timestamp())],
        )?;
        let id = self.conn.last_insert_rowid() as u64;

        Ok(Token { id, refresh_id: 1, username, path, must_impersonate, created_at: now, expires_at })
    }

    pub fn update(&self, token: &Token) -> Result<bool, TokenDbError> {
        let changed = self.conn.execute(
            "UPDATE tokens SET refresh_id = ?1, username = ?2, path = ?3, must_impersonate = ?4, expires_at = ?5 WHERE id = ?6",
            params![
                token.refresh_id,
                token.username,
                token.path,
                token.must_impersonate as i64,
                token.expires_at.map(|d| d.timestamp()),
                token.id as i64,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn remove(&self, id: u64) -> Result<bool, TokenDbError> {
        let changed = self.conn.execute("DELETE FROM tokens WHERE id = ?1", params![id as i64])?;
        Ok(changed > 0)
    }

    pub fn reset(&mut self) -> Result<(), TokenDbError> {
        self.conn.execute("DELETE FROM tokens", [])?;
        self.conn.execute("DELETE FROM key_storage", [])?;
        self.key = Self::load_or_create_key(&self.conn)?;
        Ok(())
    }
}

fn row_to_token(row: &rusqlite::Row) -> rusqlite::Result<Token> {
    let created_at_ts: i64 = row.get(5)?;
    let expires_at_ts: Option<i64> = row.get(6)?;
    Ok(Token {
        id: row.get::<_, i64>(0)? as u64,
        refresh_id: row.get::<_, i64>(1)? as u64,
        username: row.get(2)?,
        path: row.get(3)?,
        must_impersonate: row.get::<_, i64>(4)? != 0,
        created_at: DateTime::from_timestamp(created_at_ts, 0).unwrap_or_else(Utc::now),
        expires_at: expires_at_ts.and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}

/// A refresh-token handed to the browser: `(id, refresh_id)` plus the
/// username and optional path restriction it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: u64,
    pub refresh_id: u64,
    pub username: String,
    pub path: String,
}

/// Verifies and mints refresh tokens against a [`TokenDb`], serializing
/// access the way the original's `scoped_lock mutex_` does.
pub struct TokenManager {
    db: Mutex<TokenDb>,
}

impl TokenManager {
    pub fn new(db: TokenDb) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Checks `presented` against the stored token for `username`. A
    /// `refresh_id` mismatch means the token was already refreshed (or is
    /// forged); per the original, this invalidates the current stored
    /// token too, since the presented one is either stale or an attacker's
    /// replay of an old one.
    pub async fn verify(&self, username: &str, presented: &RefreshToken) -> bool {
        let db = self.db.lock().await;
        let our = match db.select(presented.id) {
            Ok(Some(t)) => t,
            Ok(None) => {
                warn!(%username, "could not find the token in the database");
                return false;
            }
            Err(e) => {
                error!(%username, error = %e, "token lookup failed");
                return false;
            }
        };

        if username != our.username {
            warn!(%username, stored = %our.username, "token belongs to a different user");
            return false;
        }

        if presented.refresh_id != our.refresh_id {
            warn!(%username, "presented an invalid refresh token, invalidating the stored one as a precaution");
            let _ = db.remove(our.id);
            return false;
        }

        if our.is_expired() {
            warn!(%username, "token has expired, invalidating it");
            let _ = db.remove(our.id);
            return false;
        }

        true
    }

    pub async fn create(&self, username: &str, path: &str, must_impersonate: bool, expiration: Option<chrono::Duration>) -> Option<RefreshToken> {
        let db = self.db.lock().await;
        let token = db.insert(username.to_string(), path.to_string(), must_impersonate, expiration).ok()?;
        Some(RefreshToken { id: token.id, refresh_id: token.refresh_id, username: token.username, path: token.path })
    }

    /// Bumps the stored `refresh_id`, invalidating the token just
    /// presented and minting the next one in the chain.
    pub async fn refresh(&self, old: &RefreshToken) -> Option<RefreshToken> {
        let db = self.db.lock().await;
        let mut our = db.select(old.id).ok().flatten()?;

        if old.username != our.username || old.refresh_id != our.refresh_id {
            return None;
        }

        our.refresh_id += 1;
        if db.update(&our).ok()? {
            Some(RefreshToken { id: our.id, refresh_id: our.refresh_id, username: our.username, path: our.path })
        } else {
            None
        }
    }

    pub async fn destroy(&self, token: &RefreshToken) -> bool {
        let db = self.db.lock().await;
        match db.select(token.id) {
            Ok(Some(our)) if our.username == token.username => db.remove(our.id).unwrap_or(false),
            _ => false,
        }
    }

    pub async fn reset(&self) {
        let mut db = self.db.lock().await;
        let _ = db.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new(TokenDb::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn create_then_verify_succeeds() {
        let mgr = manager();
        let token = mgr.create("alice", "/", false, None).await.unwrap();
        assert!(mgr.verify("alice", &token).await);
    }

    #[tokio::test]
    async fn verify_fails_for_a_different_username() {
        let mgr = manager();
        let token = mgr.create("alice", "/", false, None).await.unwrap();
        assert!(!mgr.verify("bob", &token).await);
    }

    #[tokio::test]
    async fn refresh_invalidates_the_old_token() {
        let mgr = manager();
        let token = mgr.create("alice", "/", false, None).await.unwrap();
        let refreshed = mgr.refresh(&token).await.unwrap();

        assert!(!mgr.verify("alice", &token).await);
        assert!(mgr.verify("alice", &refreshed).await);
    }

    #[tokio::test]
    async fn replaying_an_invalidated_token_removes_the_current_one_too() {
        let mgr = manager();
        let token = mgr.create("alice", "/", false, None).await.unwrap();
        let refreshed = mgr.refresh(&token).await.unwrap();

        assert!(!mgr.verify("alice", &token).await);
        assert!(!mgr.verify("alice", &refreshed).await);
    }

    #[tokio::test]
    async fn expired_tokens_fail_verification() {
        let mgr = manager();
        let token = mgr.create("alice", "/", false, Some(ChronoDuration::seconds(-1))).await.unwrap();
        assert!(!mgr.verify("alice", &token).await);
    }

    #[tokio::test]
    async fn destroy_removes_the_token() {
        let mgr = manager();
        let token = mgr.create("alice", "/", false, None).await.unwrap();
        assert!(mgr.destroy(&token).await);
        assert!(!mgr.verify("alice", &token).await);
    }
}
