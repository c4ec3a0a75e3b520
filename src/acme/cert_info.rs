//! "Omni" certificate material and ACME account side-info persistence
//! (spec §3 data model, §6 on-disk layout). Grounded on
//! `acme/cert_info.{hpp,cpp}`'s `extra_account_info::load`/`save`, keyed
//! by `base32(md5(account_id))` under `<root>/acme/<id>/account.info`;
//! the original's `fz::json` blob is replaced with this crate's toml+serde
//! convention (see `auth::store`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::tools::base32_md5;

#[derive(Debug, Error)]
pub enum CertInfoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
    #[error("root path {0:?} is not absolute")]
    RootNotAbsolute(PathBuf),
    #[error("no certificate found in the chain")]
    EmptyChain,
    #[error("could not parse the leaf certificate: {0}")]
    InvalidCertificate(String),
}

/// Extracts the leaf certificate's `(not_before, not_after)` validity
/// window from a PEM chain, the same pair the original reads via
/// `fz::load_certificates(...).get_activation_time()`/
/// `get_expiration_time()` to drive [`super::daemon::next_renewal_at`].
pub fn validity_window(chain_pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), CertInfoError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes()).map_err(|e| CertInfoError::InvalidCertificate(e.to_string()))?;
    let cert = pem.parse_x509().map_err(|e| CertInfoError::InvalidCertificate(e.to_string()))?;
    let validity = cert.validity();

    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0).ok_or(CertInfoError::EmptyChain)?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0).ok_or(CertInfoError::EmptyChain)?;
    Ok((not_before, not_after))
}

/// How a certificate's material came to be (spec §3:
/// `securable_socket::certs_and_key::sources`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CertSource {
    Provided,
    SelfSigned,
    Uploaded,
    Acme { kid: String, autorenew: bool },
}

/// Where the certificate's bytes actually live: inline, on disk, or
/// behind a PKCS#11 URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CertMaterial {
    Inline { chain_pem: String, key_pem: String },
    Path { cert_path: PathBuf, key_path: PathBuf },
    Pkcs11 { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertInfo {
    pub material: CertMaterial,
    pub password: Option<String>,
    pub source: CertSource,
}

impl CertInfo {
    /// The renewal status file key, `base32(md5(cert_url))` (spec §4.3.2,
    /// §6), where `cert_url` is the ACME `kid` this cert was issued under.
    pub fn status_key(&self) -> Option<String> {
        match &self.source {
            CertSource::Acme { kid, .. } => Some(base32_md5(kid)),
            _ => None,
        }
    }

    /// Resolves a `Path` variant's components against `root` when
    /// relative; other variants pass through unchanged.
    pub fn resolved(&self, root: &Path) -> CertMaterial {
        match &self.material {
            CertMaterial::Path { cert_path, key_path } => CertMaterial::Path {
                cert_path: if cert_path.is_absolute() { cert_path.clone() } else { root.join(cert_path) },
                key_path: if key_path.is_absolute() { key_path.clone() } else { root.join(key_path) },
            },
            other => other.clone(),
        }
    }
}

/// ACME account material kept alongside the certificate store (spec §6:
/// `certificates/acme/<base32(md5(account_kid))>/account.info`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraAccountInfo {
    pub directory: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    /// The account's ES256 key pair, stored as `(pkcs8_b64, public_jwk)`.
    #[serde(default)]
    pub jwk_pkcs8_b64: String,
    #[serde(default)]
    pub jwk: serde_json::Value,
}

impl ExtraAccountInfo {
    pub fn is_valid(&self) -> bool {
        !self.directory.is_empty() && self.jwk.is_object() && !self.jwk_pkcs8_b64.is_empty()
    }

    fn account_dir(root: &Path, account_id: &str) -> PathBuf {
        root.join("acme").join(base32_md5(account_id))
    }

    pub async fn load(root: &Path, account_id: &str) -> Result<Self, CertInfoError> {
        if !root.is_absolute() {
            return Err(CertInfoError::RootNotAbsolute(root.to_path_buf()));
        }
        let path = Self::account_dir(root, account_id).join("account.info");
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&contents)?)
    }

    pub async fn save(&self, root: &Path, account_id: &str) -> Result<(), CertInfoError> {
        if !root.is_absolute() {
            return Err(CertInfoError::RootNotAbsolute(root.to_path_buf()));
        }
        let dir = Self::account_dir(root, account_id);
        tokio::fs::create_dir_all(&dir).await?;
        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(dir.join("account.info"), contents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn account_info_round_trips_through_disk() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();

        let info = ExtraAccountInfo {
            directory: "https://acme.example.com/directory".to_string(),
            contacts: vec!["mailto:admin@example.com".to_string()],
            created_at: "2026-01-01T00:00:00Z".to_string(),
            jwk_pkcs8_b64: "deadbeef".to_string(),
            jwk: serde_json::json!({"kty": "EC", "crv": "P-256", "x": "x", "y": "y"}),
        };

        info.save(root, "kid-123").await.unwrap();
        let loaded = ExtraAccountInfo::load(root, "kid-123").await.unwrap();
        assert_eq!(loaded.directory, info.directory);
        assert_eq!(loaded.contacts, info.contacts);
        assert!(loaded.is_valid());
    }

    #[tokio::test]
    async fn load_of_missing_account_fails() {
        let tempdir = tempfile::tempdir().unwrap();
        assert!(ExtraAccountInfo::load(tempdir.path(), "no-such-account").await.is_err());
    }

    #[test]
    fn validity_window_rejects_non_pem_input() {
        assert!(validity_window("not a certificate").is_err());
    }

    #[test]
    fn status_key_is_only_derived_for_acme_sourced_certs() {
        let ci = CertInfo {
            material: CertMaterial::Pkcs11 { url: "pkcs11:token=x".into() },
            password: None,
            source: CertSource::SelfSigned,
        };
        assert!(ci.status_key().is_none());

        let ci = CertInfo {
            material: CertMaterial::Pkcs11 { url: "pkcs11:token=x".into() },
            password: None,
            source: CertSource::Acme { kid: "https://acme.example.com/acct/1".into(), autorenew: true },
        };
        assert!(ci.status_key().is_some());
    }
}
