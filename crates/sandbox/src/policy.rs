//! Network policy engine.
//!
//! Every request a sandboxed page makes is classified by [`decide`], a pure
//! function of the request URL, the job's target origin and the
//! allow-target-origin flag. Rules are evaluated in order and the first match
//! wins; anything that cannot be parsed is blocked.

use phishnet_core::NetworkCounters;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use url::{Host, Url};

/// Distinct blocked hostnames kept per context.
pub const BLOCKED_HOST_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not http/https.
    Scheme,
    /// localhost, loopback literals, `*.local`.
    Loopback,
    /// RFC 1918 and other non-routable literals.
    PrivateRange,
    /// Nothing allowed it.
    DefaultDeny,
    /// The URL could not be parsed or had no host.
    Unparseable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Serialized origin (`scheme://host[:port]`, default ports omitted) of an
/// http/https URL. `None` for anything else.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    parsed.host_str()?;
    Some(parsed.origin().ascii_serialization())
}

/// Classify one outbound request.
pub fn decide(request_url: &str, target_origin: Option<&str>, allow_target_origin: bool) -> Decision {
    let Ok(url) = Url::parse(request_url) else {
        return Decision::Block(BlockReason::Unparseable);
    };

    // 1. scheme
    match url.scheme() {
        "http" | "https" => {}
        _ => return Decision::Block(BlockReason::Scheme),
    }

    let Some(host) = url.host() else {
        return Decision::Block(BlockReason::Unparseable);
    };

    // 2. loopback names, 3. private literals; both before the allow rule
    match host {
        Host::Domain(name) => {
            if is_loopback_name(name) {
                return Decision::Block(BlockReason::Loopback);
            }
        }
        Host::Ipv4(addr) => {
            if addr.is_loopback() {
                return Decision::Block(BlockReason::Loopback);
            }
            if is_private_v4(addr) {
                return Decision::Block(BlockReason::PrivateRange);
            }
        }
        Host::Ipv6(addr) => {
            if addr.is_loopback() {
                return Decision::Block(BlockReason::Loopback);
            }
            if is_private_v6(addr) {
                return Decision::Block(BlockReason::PrivateRange);
            }
        }
    }

    // 4. exact target origin
    if allow_target_origin {
        if let Some(target) = target_origin {
            if url.origin().ascii_serialization() == target {
                return Decision::Allow;
            }
        }
    }

    // 5. default deny
    Decision::Block(BlockReason::DefaultDeny)
}

fn is_loopback_name(name: &str) -> bool {
    let name = name.trim_end_matches('.');
    name == "localhost" || name.ends_with(".localhost") || name.ends_with(".local")
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let [a, b, _, _] = addr.octets();
    a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        // link-local (cloud metadata endpoints) and "this network"
        || (a == 169 && b == 254)
        || a == 0
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    if addr.is_unspecified() {
        return true;
    }
    if let Some(v4) = addr.to_ipv4_mapped() {
        return v4.is_loopback() || is_private_v4(v4);
    }
    let first = addr.segments()[0];
    // fc00::/7 unique-local, fe80::/10 link-local
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Policy inputs plus the running tallies for one browsing context.
///
/// Created per context and handed to it; never shared across contexts or jobs.
#[derive(Debug)]
pub struct PolicyState {
    target_origin: Option<String>,
    allow_target_origin: bool,
    allowed: AtomicU64,
    blocked: AtomicU64,
    blocked_hosts: Mutex<Vec<String>>,
}

impl PolicyState {
    pub fn new(target_url: &str, allow_target_origin: bool) -> Self {
        Self {
            target_origin: origin_of(target_url),
            allow_target_origin,
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            blocked_hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn allow_target_origin(&self) -> bool {
        self.allow_target_origin
    }

    pub fn target_origin(&self) -> Option<&str> {
        self.target_origin.as_deref()
    }

    /// Decide and record one request.
    pub async fn evaluate(&self, request_url: &str) -> Decision {
        let decision = decide(
            request_url,
            self.target_origin.as_deref(),
            self.allow_target_origin,
        );
        match decision {
            Decision::Allow => {
                self.allowed.fetch_add(1, Ordering::SeqCst);
            }
            Decision::Block(_) => {
                self.blocked.fetch_add(1, Ordering::SeqCst);
                if let Some(host) = Url::parse(request_url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.to_string()))
                {
                    let mut hosts = self.blocked_hosts.lock().await;
                    if hosts.len() < BLOCKED_HOST_CAP && !hosts.contains(&host) {
                        hosts.push(host);
                    }
                }
            }
        }
        decision
    }

    pub async fn snapshot(&self) -> NetworkCounters {
        NetworkCounters {
            allowed: self.allowed.load(Ordering::SeqCst),
            blocked: self.blocked.load(Ordering::SeqCst),
            blocked_hosts: self.blocked_hosts.lock().await.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(url: &str, target: &str, allow: bool) -> bool {
        let origin = origin_of(target);
        !decide(url, origin.as_deref(), allow).is_allow()
    }

    #[test]
    fn test_non_http_schemes_always_block() {
        for url in [
            "file:///etc/passwd",
            "data:text/html,<h1>x</h1>",
            "javascript:alert(1)",
            "ftp://example.com/x",
            "ws://example.com/socket",
            "chrome://settings",
        ] {
            for allow in [false, true] {
                assert_eq!(
                    decide(url, Some("https://example.com"), allow),
                    Decision::Block(BlockReason::Scheme),
                    "{url}"
                );
            }
        }
    }

    #[test]
    fn test_loopback_names_block_even_when_target() {
        for target in [
            "http://localhost:8080/",
            "http://127.0.0.1:9999/",
            "https://printer.local/",
            "http://LOCALHOST/",
            "http://app.localhost/",
        ] {
            assert!(blocked(target, target, true), "{target}");
            assert_eq!(
                decide(target, origin_of(target).as_deref(), true),
                Decision::Block(BlockReason::Loopback)
            );
        }
    }

    #[test]
    fn test_private_ranges_take_precedence_over_allow() {
        for target in [
            "http://10.0.0.5/",
            "http://10.255.255.255:8443/x",
            "http://172.16.0.1/",
            "http://172.31.255.254/",
            "https://192.168.1.1/admin",
            "http://169.254.169.254/latest/meta-data/",
        ] {
            assert_eq!(
                decide(target, origin_of(target).as_deref(), true),
                Decision::Block(BlockReason::PrivateRange),
                "{target}"
            );
        }
    }

    #[test]
    fn test_range_edges_not_private() {
        let origin = origin_of("http://172.32.0.1/");
        assert_eq!(decide("http://172.32.0.1/", origin.as_deref(), true), Decision::Allow);
        let origin = origin_of("http://172.15.0.1/");
        assert_eq!(decide("http://172.15.0.1/", origin.as_deref(), true), Decision::Allow);
    }

    #[test]
    fn test_numeric_host_forms_are_normalised() {
        // 2130706433 == 127.0.0.1, 0xA000001 == 10.0.0.1
        assert_eq!(
            decide("http://2130706433/", None, true),
            Decision::Block(BlockReason::Loopback)
        );
        assert_eq!(
            decide("http://0xA000001/", None, true),
            Decision::Block(BlockReason::PrivateRange)
        );
    }

    #[test]
    fn test_ipv6_loopback_and_private() {
        assert_eq!(decide("http://[::1]/", None, true), Decision::Block(BlockReason::Loopback));
        assert_eq!(
            decide("http://[fd00::1]/", origin_of("http://[fd00::1]/").as_deref(), true),
            Decision::Block(BlockReason::PrivateRange)
        );
        assert_eq!(
            decide("http://[::ffff:192.168.0.1]/", None, true),
            Decision::Block(BlockReason::PrivateRange)
        );
    }

    #[test]
    fn test_target_origin_exact_match() {
        let origin = origin_of("https://example.com/login?x=1");
        assert_eq!(origin.as_deref(), Some("https://example.com"));

        assert_eq!(decide("https://example.com/a.js", origin.as_deref(), true), Decision::Allow);
        assert_eq!(decide("https://example.com:443/", origin.as_deref(), true), Decision::Allow);
        // different scheme, port or subdomain
        assert!(blocked("http://example.com/", "https://example.com/", true));
        assert!(blocked("https://example.com:8443/", "https://example.com/", true));
        assert!(blocked("https://www.example.com/", "https://example.com/", true));
        assert!(blocked("https://cdn.other.net/x.js", "https://example.com/", true));
    }

    #[test]
    fn test_default_deny_without_flag() {
        assert_eq!(
            decide("https://example.com/", origin_of("https://example.com/").as_deref(), false),
            Decision::Block(BlockReason::DefaultDeny)
        );
    }

    #[test]
    fn test_unparseable_fails_closed() {
        assert_eq!(decide("not a url", None, true), Decision::Block(BlockReason::Unparseable));
        assert_eq!(decide("", Some("https://example.com"), true), Decision::Block(BlockReason::Unparseable));
        assert_eq!(decide("http://", None, true), Decision::Block(BlockReason::Unparseable));
    }

    #[test]
    fn test_origin_of_rejects_non_http() {
        assert_eq!(origin_of("file:///tmp/x"), None);
        assert_eq!(origin_of("garbage"), None);
        assert_eq!(origin_of("http://Example.COM:80/x").as_deref(), Some("http://example.com"));
    }

    #[tokio::test]
    async fn test_state_counts_and_caps_hosts() {
        let state = PolicyState::new("https://example.com/", true);
        assert_eq!(state.evaluate("https://example.com/").await, Decision::Allow);
        for i in 0..12 {
            state.evaluate(&format!("https://tracker{}.test/p.gif", i)).await;
        }
        // duplicates do not take a slot
        state.evaluate("https://tracker0.test/again").await;
        state.evaluate("garbage").await;

        let counters = state.snapshot().await;
        assert_eq!(counters.allowed, 1);
        assert_eq!(counters.blocked, 14);
        assert_eq!(counters.blocked_hosts.len(), BLOCKED_HOST_CAP);
        assert_eq!(counters.blocked_hosts[0], "tracker0.test");
    }

    #[tokio::test]
    async fn test_states_are_independent() {
        let desktop = PolicyState::new("https://example.com/", false);
        let mobile = PolicyState::new("https://example.com/", false);
        desktop.evaluate("https://example.com/").await;
        assert_eq!(desktop.snapshot().await.blocked, 1);
        assert_eq!(mobile.snapshot().await, NetworkCounters::default());
    }
}
