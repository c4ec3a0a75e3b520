//! Miscellaneous small helpers shared by the ACME and auth subsystems.

use std::net::IpAddr;

use base32::Alphabet;
use md5::{Digest, Md5};

/// `base32(md5(s))`, used to derive filesystem-safe directory names for
/// ACME account/cert/status entries (spec §6).
pub fn base32_md5(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    base32::encode(Alphabet::Rfc4648 { padding: false }, &digest)
}

/// A single CIDR-style IP match rule: either a bare address or an
/// address/prefix-length network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    addr: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn parse(s: &str) -> Option<Self> {
        if let Some((addr, prefix)) = s.split_once('/') {
            let addr: IpAddr = addr.trim().parse().ok()?;
            let prefix: u8 = prefix.trim().parse().ok()?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return None;
            }
            Some(Self { addr, prefix })
        } else {
            let addr: IpAddr = s.trim().parse().ok()?;
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            Some(Self { addr, prefix })
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(candidate)) => {
                let mask = prefix_mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(candidate) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(candidate)) => {
                let mask = prefix_mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(candidate) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

/// `true` if `ip` matches any rule in `ranges`. Invalid rules are skipped
/// rather than rejected wholesale, matching the sanitize-and-continue
/// posture the rest of the config loaders take.
pub fn ip_matches_any(ranges: &[String], ip: IpAddr) -> bool {
    ranges
        .iter()
        .filter_map(|r| IpRange::parse(r))
        .any(|r| r.contains(ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_md5_is_deterministic_and_path_safe() {
        let a = base32_md5("example.com");
        let b = base32_md5("example.com");
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn cidr_matching() {
        assert!(ip_matches_any(
            &["192.0.2.0/24".to_string()],
            "192.0.2.1".parse().unwrap()
        ));
        assert!(!ip_matches_any(
            &["192.0.2.0/24".to_string()],
            "192.0.3.1".parse().unwrap()
        ));
        assert!(ip_matches_any(
            &["192.0.2.7".to_string()],
            "192.0.2.7".parse().unwrap()
        ));
    }
}
