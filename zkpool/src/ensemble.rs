//! Ensemble member list, candidate selection and reconnect backoff.
//!
//! The connection string is parsed once. Candidates are shuffled once per
//! client to spread sessions across members, then cycled in that order.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::time::Duration;

use zkpool_core::RandomProvider;

use crate::path::Chroot;
use crate::{ZkError, ZkResult};

/// Port used when a connection string entry omits one.
pub const DEFAULT_PORT: u16 = 2181;

/// Last known liveness of a member, as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reachability {
    /// Never attempted.
    #[default]
    Unknown,
    /// The last attempt completed a handshake.
    Reachable,
    /// Consecutive failed attempts since the last success.
    Unreachable {
        /// Number of consecutive failures.
        failures: u32,
    },
}

/// One ensemble member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleMember {
    /// Host name or IP literal (without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Liveness bookkeeping.
    pub reachability: Reachability,
}

impl EnsembleMember {
    /// Create a member with unknown reachability.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            reachability: Reachability::Unknown,
        }
    }

    /// Address suitable for a socket connect.
    pub fn address(&self) -> String {
        self.to_string()
    }

    fn parse(entry: &str) -> ZkResult<Self> {
        let bad = || ZkError::InvalidConfig(format!("invalid ensemble member {entry:?}"));
        let parse_port = |port: &str| port.parse::<u16>().map_err(|_| bad());

        if let Some(rest) = entry.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(bad)?;
            host.parse::<Ipv6Addr>().map_err(|_| bad())?;
            let port = match tail {
                "" => DEFAULT_PORT,
                tail => parse_port(tail.strip_prefix(':').ok_or_else(bad)?)?,
            };
            return Ok(Self::new(host, port));
        }

        let (host, port) = match entry.rsplit_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (entry, DEFAULT_PORT),
        };
        if host.is_empty() || host.contains(':') || host.contains(char::is_whitespace) {
            return Err(bad());
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for EnsembleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parsed connection string: `[zk://]host[:port][,host[:port]...][/chroot]`.
///
/// ```
/// use zkpool::ConnectionString;
///
/// let conn: ConnectionString = "zk://a:2181,[::1]:2182,c/app".parse().expect("valid");
/// assert_eq!(conn.members().len(), 3);
/// assert_eq!(conn.members()[2].port, 2181);
/// assert_eq!(conn.chroot().prefix(), Some("/app"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    members: Vec<EnsembleMember>,
    chroot: Chroot,
}

impl ConnectionString {
    /// Members in the order written.
    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    /// Path prefix for every operation.
    pub fn chroot(&self) -> &Chroot {
        &self.chroot
    }
}

impl FromStr for ConnectionString {
    type Err = ZkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("zk://").unwrap_or(s);
        let (hosts, chroot) = match s.find('/') {
            Some(slash) => (&s[..slash], Chroot::new(&s[slash..])?),
            None => (s, Chroot::default()),
        };
        let members = hosts
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(EnsembleMember::parse)
            .collect::<ZkResult<Vec<_>>>()?;
        if members.is_empty() {
            return Err(ZkError::InvalidConfig("connection string has no hosts".into()));
        }
        Ok(Self { members, chroot })
    }
}

/// Doubling delay between connection attempts, capped and reset on success.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt. Zero right after a success.
    pub(crate) fn delay(&self) -> Duration {
        if self.failures == 0 {
            Duration::ZERO
        } else {
            self.current
        }
    }

    /// Record a failed attempt.
    pub(crate) fn failure(&mut self) {
        if self.failures > 0 {
            self.current = (self.current * 2).min(self.max);
        }
        self.failures += 1;
    }

    /// Record a successful handshake.
    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }
}

/// Chooses which member to try next and tracks member liveness.
#[derive(Debug)]
pub(crate) struct EnsembleSelector {
    members: Vec<EnsembleMember>,
    cursor: usize,
}

impl EnsembleSelector {
    /// Shuffle `members` once with the client's random provider.
    pub(crate) fn new<R: RandomProvider>(mut members: Vec<EnsembleMember>, random: &R) -> Self {
        random.shuffle(&mut members);
        Self { members, cursor: 0 }
    }

    /// Next candidate in the cycle: its index and socket address.
    pub(crate) fn next_candidate(&mut self) -> (usize, String) {
        let index = self.cursor % self.members.len();
        self.cursor = (index + 1) % self.members.len();
        (index, self.members[index].address())
    }

    pub(crate) fn mark_reachable(&mut self, index: usize) {
        if let Some(member) = self.members.get_mut(index) {
            member.reachability = Reachability::Reachable;
        }
    }

    pub(crate) fn mark_unreachable(&mut self, index: usize) {
        if let Some(member) = self.members.get_mut(index) {
            let failures = match member.reachability {
                Reachability::Unreachable { failures } => failures + 1,
                _ => 1,
            };
            member.reachability = Reachability::Unreachable { failures };
        }
    }

    pub(crate) fn members(&self) -> &[EnsembleMember] {
        &self.members
    }
}
