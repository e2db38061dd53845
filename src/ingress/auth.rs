//! Webhook authentication: bearer token and source-IP allow-listing.
//!
//! Auth is on unless the operator explicitly disables it. A request passes
//! when any configured mechanism accepts it. Proxy headers
//! (`X-Forwarded-For` / `X-Real-IP`) are honored only when the immediate
//! peer sits inside a configured trusted-proxy CIDR; the secure default is
//! that no proxy headers are trusted.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use axum::http::HeaderMap;
use tracing::{debug, warn};

/// Why a request failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredentials,
    BadToken,
    IpNotAllowed,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::MissingCredentials => write!(f, "missing credentials"),
            AuthFailure::BadToken => write!(f, "bad token"),
            AuthFailure::IpNotAllowed => write!(f, "ip not allowed"),
        }
    }
}

// ============================================================================
// CIDR matching
// ============================================================================

/// An IP network in CIDR notation; a bare address is a host route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `a.b.c.d/n`, `x::y/n`, or a bare address.
    pub fn parse(s: &str) -> Option<Cidr> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part.parse().ok()?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(p) => {
                let p: u8 = p.parse().ok()?;
                (p <= max).then_some(p)?
            }
            None => max,
        };
        Some(Cidr { addr, prefix })
    }

    /// Whether `ip` falls inside this network. Mixed families never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                if self.prefix == 0 {
                    return true;
                }
                let mask = u32::MAX << (32 - self.prefix as u32);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                if self.prefix == 0 {
                    return true;
                }
                let mask = u128::MAX << (128 - self.prefix as u32);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

fn in_any(cidrs: &[Cidr], ip: IpAddr) -> bool {
    cidrs.iter().any(|c| c.contains(ip))
}

// ============================================================================
// Auth config
// ============================================================================

/// Webhook authentication configuration, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Explicit operator opt-out (`WEBHOOK_AUTH_DISABLED=true`).
    pub disabled: bool,
    /// Bearer token (`WEBHOOK_AUTH_TOKEN`), compared in constant time.
    pub token: Option<String>,
    /// Source allow-list (`WEBHOOK_ALLOWED_IPS`, comma-separated IPs,
    /// CIDRs, or resolvable hostnames).
    pub allowed: Vec<Cidr>,
    /// Proxies whose forwarding headers are trusted
    /// (`SERVER_TRUSTED_PROXY_CIDRS`).
    pub trusted_proxies: Vec<Cidr>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let disabled = std::env::var("WEBHOOK_AUTH_DISABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let token = std::env::var("WEBHOOK_AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let allowed = std::env::var("WEBHOOK_ALLOWED_IPS")
            .map(|raw| parse_allow_list(&raw))
            .unwrap_or_default();

        let trusted_proxies = std::env::var("SERVER_TRUSTED_PROXY_CIDRS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| {
                        let parsed = Cidr::parse(s);
                        if parsed.is_none() {
                            warn!(entry = %s, "Ignoring unparseable trusted-proxy CIDR");
                        }
                        parsed
                    })
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            disabled,
            token,
            allowed,
            trusted_proxies,
        };

        if config.disabled {
            warn!("Webhook authentication explicitly disabled (WEBHOOK_AUTH_DISABLED=true)");
        } else if config.token.is_none() && config.allowed.is_empty() {
            warn!(
                "No webhook auth mechanism configured; all webhook requests will be \
                 rejected until WEBHOOK_AUTH_TOKEN or WEBHOOK_ALLOWED_IPS is set \
                 (or auth is explicitly disabled)"
            );
        }
        config
    }

    /// Authorize one request given its peer address and headers.
    pub fn authorize(&self, peer: IpAddr, headers: &HeaderMap) -> Result<(), AuthFailure> {
        if self.disabled {
            return Ok(());
        }

        if let Some(ref expected) = self.token {
            if let Some(presented) = bearer_token(headers) {
                if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                    return Ok(());
                }
                // A wrong token does not fall through to the IP check when
                // no allow-list is configured; report it precisely.
                if self.allowed.is_empty() {
                    return Err(AuthFailure::BadToken);
                }
            }
        }

        if !self.allowed.is_empty() {
            let client = self.client_ip(peer, headers);
            if in_any(&self.allowed, client) {
                return Ok(());
            }
            return Err(AuthFailure::IpNotAllowed);
        }

        if self.token.is_some() {
            return Err(AuthFailure::MissingCredentials);
        }
        // Nothing configured and not disabled: secure default is reject.
        Err(AuthFailure::MissingCredentials)
    }

    /// Derive the client IP. Forwarding headers are consulted only when the
    /// immediate peer is a trusted proxy; otherwise the peer is used verbatim.
    pub fn client_ip(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        if !in_any(&self.trusted_proxies, peer) {
            return peer;
        }

        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = xff.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
        if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = real.trim().parse::<IpAddr>() {
                return ip;
            }
        }
        peer
    }
}

/// Parse the allow-list: IPs and CIDRs directly, hostnames via resolution.
fn parse_allow_list(raw: &str) -> Vec<Cidr> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(cidr) = Cidr::parse(entry) {
            out.push(cidr);
            continue;
        }
        // Hostname: resolve once at startup.
        match (entry, 0u16).to_socket_addrs() {
            Ok(addrs) => {
                let before = out.len();
                for addr in addrs {
                    out.push(Cidr {
                        addr: addr.ip(),
                        prefix: match addr {
                            SocketAddr::V4(_) => 32,
                            SocketAddr::V6(_) => 128,
                        },
                    });
                }
                debug!(host = %entry, resolved = out.len() - before, "Resolved allow-list hostname");
            }
            Err(e) => {
                warn!(host = %entry, error = %e, "Ignoring unresolvable allow-list entry");
            }
        }
    }
    out
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Length-leaking-only comparison: time depends on the lengths, never on
/// where the bytes differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
