//! Renewal scheduling for ACME-sourced certificates (spec §4.3.2).
//! Grounded on `acme/daemon.{hpp,cpp}`'s `daemon::worker`: renewal is due
//! at two thirds of the certificate's validity window past activation,
//! pushed back on error with an exponential backoff capped at that same
//! interval, and a server-provided `Retry-After`/`retry_at` overrides and
//! resets the backoff. Status persists under
//! `acme/status/<base32(md5(cert_url))>` as the original's trash-and-commit
//! rename does, so a crash mid-write never corrupts the last-known-good
//! status.
//!
//! The original trashes its status file from a `~worker` destructor; Rust
//! has no async `Drop`, so this crate exposes an explicit `stop()` instead
//! and expects the daemon's caller to await it during shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::util::tools::base32_md5;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewalStatus {
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub renewal_at: Option<DateTime<Utc>>,
}

impl RenewalStatus {
    fn status_dir(root: &Path, cert_url: &str) -> PathBuf {
        root.join("acme").join("status").join(base32_md5(cert_url))
    }

    fn status_file(root: &Path, cert_url: &str) -> PathBuf {
        Self::status_dir(root, cert_url).join("status.toml")
    }

    fn trash_file(root: &Path, cert_url: &str) -> PathBuf {
        Self::status_dir(root, cert_url).join("status.toml.trash")
    }

    pub async fn load(root: &Path, cert_url: &str) -> Self {
        Self::restore_trashed(root, cert_url).await;
        match tokio::fs::read_to_string(Self::status_file(root, cert_url)).await {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, root: &Path, cert_url: &str) -> Result<(), DaemonError> {
        let dir = Self::status_dir(root, cert_url);
        tokio::fs::create_dir_all(&dir).await?;
        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(Self::status_file(root, cert_url), contents).await?;
        Ok(())
    }

    /// Renames the status file aside rather than deleting it, so a crash
    /// between removal and the next successful save can't leave the
    /// worker with no history at all.
    pub async fn trash(root: &Path, cert_url: &str) {
        let _ = tokio::fs::rename(Self::status_file(root, cert_url), Self::trash_file(root, cert_url)).await;
    }

    async fn restore_trashed(root: &Path, cert_url: &str) {
        let trash = Self::trash_file(root, cert_url);
        if tokio::fs::metadata(&trash).await.is_ok() {
            let _ = tokio::fs::rename(&trash, Self::status_file(root, cert_url)).await;
        }
    }

    pub async fn remove(root: &Path, cert_url: &str) {
        let _ = tokio::fs::remove_file(Self::status_file(root, cert_url)).await;
        let _ = tokio::fs::remove_file(Self::trash_file(root, cert_url)).await;
    }
}

/// Caps the exponential-backoff minute count so a long run of failures
/// doesn't overflow before it's clamped against the renewal interval.
fn exp2_saturated_minutes(error_count: u32) -> i64 {
    if error_count == 0 {
        return 0;
    }
    1i64.checked_shl(error_count - 1).unwrap_or(i64::MAX)
}

/// Computes the next renewal instant from a certificate's validity window,
/// the previous schedule, and the accumulated error count, per the
/// original's `schedule_renewal`.
pub fn next_renewal_at(
    activation: DateTime<Utc>,
    expiration: DateTime<Utc>,
    previous_renewal_at: Option<DateTime<Utc>>,
    error_count: u32,
) -> Option<DateTime<Utc>> {
    if activation >= expiration {
        return None;
    }

    let interval = (expiration - activation) * 2 / 3;
    let now = Utc::now();

    let mut renewal_at = if error_count > 0 {
        let backoff_minutes = exp2_saturated_minutes(error_count).min(interval.num_minutes().max(1));
        previous_renewal_at.unwrap_or(now) + chrono::Duration::minutes(backoff_minutes)
    } else {
        previous_renewal_at.unwrap_or(activation + interval)
    };

    if renewal_at < now {
        renewal_at = now;
    }

    Some(renewal_at)
}

/// Tracks one certificate's renewal schedule and status. Driven by
/// [`Self::renewal_loop`], which a caller spawns as a background task;
/// `stop()` replaces the original's destructor-triggered status trashing.
pub struct RenewalWorker {
    root: PathBuf,
    cert_url: String,
    status: RenewalStatus,
    stop_tx: watch::Sender<bool>,
}

impl RenewalWorker {
    pub async fn new(root: PathBuf, cert_url: String) -> Self {
        let status = RenewalStatus::load(&root, &cert_url).await;
        let (stop_tx, _) = watch::channel(false);
        Self { root, cert_url, status, stop_tx }
    }

    pub fn status(&self) -> &RenewalStatus {
        &self.status
    }

    /// Signals the loop in [`Self::renewal_loop`] to exit and trashes the
    /// on-disk status, mirroring `~worker`'s `remove_handler` + `trash_status`.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        RenewalStatus::trash(&self.root, &self.cert_url).await;
    }

    pub fn record_success(&mut self) {
        self.status.error_count = 0;
        self.status.renewal_at = None;
    }

    pub fn record_failure(&mut self, retry_at: Option<DateTime<Utc>>) {
        if let Some(at) = retry_at {
            self.status.renewal_at = Some(at);
            self.status.error_count = 0;
        } else {
            self.status.error_count = self.status.error_count.saturating_add(1);
        }
    }

    pub async fn persist(&self) -> Result<(), DaemonError> {
        self.status.save(&self.root, &self.cert_url).await
    }

    /// Sleeps until the next renewal is due, then invokes `renew`. Loops
    /// until [`Self::stop`] is called. `renew` returns the certificate's
    /// new activation/expiration on success, or an error with an optional
    /// server-suggested retry time.
    pub async fn renewal_loop<F, Fut>(
        &mut self,
        activation: DateTime<Utc>,
        expiration: DateTime<Utc>,
        mut renew: F,
    ) where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(DateTime<Utc>, DateTime<Utc>), (String, Option<DateTime<Utc>>)>>,
    {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut activation = activation;
        let mut expiration = expiration;

        loop {
            let Some(renewal_at) = next_renewal_at(activation, expiration, self.status.renewal_at, self.status.error_count) else {
                return;
            };
            self.status.renewal_at = Some(renewal_at);

            let wait = (renewal_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => return,
            }
            if *stop_rx.borrow() {
                return;
            }

            match renew().await {
                Ok((new_activation, new_expiration)) => {
                    activation = new_activation;
                    expiration = new_expiration;
                    self.record_success();
                }
                Err((_error, retry_at)) => {
                    self.record_failure(retry_at);
                }
            }
            let _ = self.persist().await;
        }
    }
}

/// Shared read-only handle for reporting a worker's current status to
/// the admin UI without taking ownership of the worker.
#[derive(Clone)]
pub struct RenewalStatusHandle(Arc<tokio::sync::Mutex<RenewalStatus>>);

impl RenewalStatusHandle {
    pub fn new(status: RenewalStatus) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(status)))
    }

    pub async fn get(&self) -> RenewalStatus {
        self.0.lock().await.clone()
    }

    pub async fn set(&self, status: RenewalStatus) {
        *self.0.lock().await = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn renewal_is_due_at_two_thirds_of_the_validity_window() {
        let act = Utc::now() - ChronoDuration::days(30);
        let exp = act + ChronoDuration::days(90);
        let at = next_renewal_at(act, exp, None, 0).unwrap();
        let expected = act + ChronoDuration::days(60);
        assert!((at - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn invalid_validity_window_yields_no_schedule() {
        let now = Utc::now();
        assert!(next_renewal_at(now, now, None, 0).is_none());
        assert!(next_renewal_at(now, now - ChronoDuration::days(1), None, 0).is_none());
    }

    #[test]
    fn backoff_grows_but_is_capped_at_the_interval() {
        let act = Utc::now() - ChronoDuration::days(30);
        let exp = act + ChronoDuration::days(90);
        let interval_minutes = (exp - act).num_minutes() * 2 / 3;

        let small = next_renewal_at(act, exp, Some(Utc::now()), 1).unwrap();
        let large = next_renewal_at(act, exp, Some(Utc::now()), 40).unwrap();
        assert!(small <= large);
        assert!((large - Utc::now()).num_minutes() <= interval_minutes + 1);
    }

    #[test]
    fn server_retry_at_resets_error_count() {
        let root = PathBuf::from("/tmp");
        let mut status = RenewalStatus { error_count: 3, renewal_at: None };
        status.error_count = 3;
        let retry_at = Utc::now() + ChronoDuration::hours(6);

        let mut worker = RenewalWorker {
            root,
            cert_url: "https://acme.example.com/acct/1".to_string(),
            status,
            stop_tx: watch::channel(false).0,
        };
        worker.record_failure(Some(retry_at));
        assert_eq!(worker.status.error_count, 0);
        assert_eq!(worker.status.renewal_at, Some(retry_at));
    }

    #[tokio::test]
    async fn status_round_trips_and_trash_restores_on_load() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        let cert_url = "https://acme.example.com/acct/42";

        let status = RenewalStatus { error_count: 2, renewal_at: Some(Utc::now()) };
        status.save(root, cert_url).await.unwrap();

        RenewalStatus::trash(root, cert_url).await;
        let loaded = RenewalStatus::load(root, cert_url).await;
        assert_eq!(loaded.error_count, 2);
    }
}
