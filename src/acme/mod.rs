//! ACME (RFC 8555) client and certificate renewal daemon (spec §4.3).

pub mod cert_info;
pub mod client;
pub mod daemon;
pub mod jws;

pub use cert_info::{validity_window, CertInfo, CertMaterial, CertSource, ExtraAccountInfo};
pub use client::{AccountParams, AccountResult, AcmeClient, AcmeError, CertificateParams, CertificateResult, ChallengeServer};
pub use daemon::{next_renewal_at, RenewalStatus, RenewalStatusHandle, RenewalWorker};
pub use jws::{Identity, JwkKeyPair};
