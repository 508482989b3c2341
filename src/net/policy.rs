//! Destination policy for outbound connections.
//!
//! # Responsibilities
//! - Resolve a hostname to socket addresses within a lookup deadline
//! - Refuse loopback and private-network destinations unless allowed
//! - Act as the relay client's DNS resolver, so the address that was
//!   checked is the address that gets dialed
//!
//! # Design Decisions
//! - Checks run on resolved addresses, so a public name pointing at
//!   127.0.0.1 is blocked like the literal
//! - Any blocked address blocks the whole destination

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::lookup_host;

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a destination was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("destination host or port is invalid")]
    InvalidTarget,

    #[error("destination host could not be resolved")]
    Unresolvable,

    #[error("destination lookup timed out")]
    LookupTimeout,

    #[error("destination address {0} is not allowed")]
    Blocked(IpAddr),
}

#[derive(Debug, Clone)]
pub struct DestinationPolicy {
    allow_loopback: bool,
    allow_private: bool,
    lookup_timeout: Duration,
}

impl DestinationPolicy {
    pub fn new(allow_loopback: bool, allow_private: bool) -> Self {
        Self {
            allow_loopback,
            allow_private,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolve `hostname:port` and return the addresses a connection may dial.
    pub async fn resolve(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, PolicyError> {
        if port == 0 {
            return Err(PolicyError::InvalidTarget);
        }
        self.lookup(hostname, port).await
    }

    async fn lookup(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, PolicyError> {
        let host = hostname.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(PolicyError::InvalidTarget);
        }
        let addrs: Vec<SocketAddr> = match tokio::time::timeout(self.lookup_timeout, lookup_host((host, port))).await {
            Err(_) => {
                tracing::debug!(hostname = %hostname, "Destination lookup timed out");
                return Err(PolicyError::LookupTimeout);
            }
            Ok(Err(e)) => {
                tracing::debug!(hostname = %hostname, error = %e, "Destination lookup failed");
                return Err(PolicyError::Unresolvable);
            }
            Ok(Ok(addrs)) => addrs.collect(),
        };
        if addrs.is_empty() {
            return Err(PolicyError::Unresolvable);
        }
        for addr in &addrs {
            if let Err(e) = self.check(addr.ip()) {
                tracing::debug!(hostname = %hostname, address = %addr, "Destination blocked by policy");
                return Err(e);
            }
        }
        Ok(addrs)
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), PolicyError> {
        if self.is_allowed(ip) {
            Ok(())
        } else {
            Err(PolicyError::Blocked(ip))
        }
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        if is_loopback(ip) {
            return self.allow_loopback;
        }
        if is_private(ip) {
            return self.allow_private;
        }
        true
    }
}

impl reqwest::dns::Resolve for DestinationPolicy {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let policy = self.clone();
        Box::pin(async move {
            // The client fills in the port from the URL.
            let addrs = policy.lookup(name.as_str(), 0).await?;
            let addrs: reqwest::dns::Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..128).contains(&b))
        || a == 0
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::dns::Resolve;

    #[test]
    fn loopback_and_private_blocked_by_default() {
        let p = DestinationPolicy::new(false, false);
        assert!(!p.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(!p.is_allowed("::1".parse().unwrap()));
        assert!(!p.is_allowed("0.0.0.0".parse().unwrap()));
        assert!(!p.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(!p.is_allowed("192.168.0.1".parse().unwrap()));
        assert!(!p.is_allowed("100.64.0.1".parse().unwrap()));
        assert!(!p.is_allowed("fd00::1".parse().unwrap()));
        assert!(!p.is_allowed("::ffff:127.0.0.1".parse().unwrap()));
        assert!(p.is_allowed("93.184.216.34".parse().unwrap()));
        assert!(p.is_allowed("2606:4700::1".parse().unwrap()));
    }

    #[test]
    fn allow_flags_are_independent() {
        let p = DestinationPolicy::new(true, false);
        assert!(p.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(!p.is_allowed("10.0.0.1".parse().unwrap()));

        let p = DestinationPolicy::new(false, true);
        assert!(!p.is_allowed("127.0.0.1".parse().unwrap()));
        assert!(p.is_allowed("172.16.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn literal_loopback_resolves_to_blocked() {
        let err = DestinationPolicy::new(false, false)
            .resolve("127.0.0.1", 80)
            .await
            .unwrap_err();
        assert_eq!(err, PolicyError::Blocked("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn zero_port_and_empty_host_are_invalid() {
        let policy = DestinationPolicy::new(true, true);
        assert_eq!(policy.resolve("127.0.0.1", 0).await.unwrap_err(), PolicyError::InvalidTarget);
        assert_eq!(policy.resolve("", 80).await.unwrap_err(), PolicyError::InvalidTarget);
    }

    #[tokio::test]
    async fn zero_lookup_deadline_times_out() {
        let policy = DestinationPolicy::new(true, true).with_lookup_timeout(Duration::ZERO);
        let err = policy.resolve("localhost", 80).await.unwrap_err();
        assert_eq!(err, PolicyError::LookupTimeout);
    }

    #[tokio::test]
    async fn client_resolver_refuses_loopback_names() {
        let policy = DestinationPolicy::new(false, false);
        let name: reqwest::dns::Name = "localhost".parse().unwrap();
        let err = match Resolve::resolve(&policy, name).await {
            Ok(_) => panic!("localhost must not resolve through the policy"),
            Err(e) => e,
        };
        assert!(err.downcast_ref::<PolicyError>().is_some(), "got: {err}");
    }
}
