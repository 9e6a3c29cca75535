//! Bidirectional mapping between cluster-private addresses and the local
//! ports that front them.

use std::fmt;
use std::str::FromStr;

use ahash::AHashMap;
use parking_lot::RwLock;

/// A `host:port` pair. Canonical text form is `"host:port"`; equality and
/// hashing are structural, so this is safe to use as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug)]
pub struct AddressParseError(String);

impl std::error::Error for AddressParseError {}

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed host:port address: {}", self.0)
    }
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;

        if host.is_empty() {
            return Err(AddressParseError(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError(s.to_string()))?;

        Ok(HostAddress {
            host: host.to_string(),
            port,
        })
    }
}

#[derive(Default)]
struct Tables {
    local_to_remote: AHashMap<u16, HostAddress>,
    remote_to_local: AHashMap<HostAddress, u16>,
}

/// Two coupled mappings guarded by a single readers-writer lock: exact
/// inverses of one another, populated once during discovery and never
/// mutated or removed afterwards.
#[derive(Default)]
pub struct AddressMap {
    tables: RwLock<Tables>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `remote -> local` and `local -> remote` atomically. A
    /// second call for an already-present `remote` is idempotent: the
    /// first writer wins and the call is a no-op.
    pub fn create(&self, remote: HostAddress, local: u16) {
        let mut tables = self.tables.write();
        if tables.remote_to_local.contains_key(&remote) {
            return;
        }

        tables.local_to_remote.insert(local, remote.clone());
        tables.remote_to_local.insert(remote, local);
    }

    pub fn lookup_local(&self, local: u16) -> Option<HostAddress> {
        self.tables.read().local_to_remote.get(&local).cloned()
    }

    pub fn lookup_remote(&self, remote: &HostAddress) -> Option<u16> {
        self.tables.read().remote_to_local.get(remote).copied()
    }

    /// An independent copy of the whole local-port -> remote-address
    /// mapping, ordered by local port ascending, for `Status` reporting.
    pub fn snapshot_local_to_remote(&self) -> Vec<(u16, HostAddress)> {
        let tables = self.tables.read();
        let mut snapshot: Vec<(u16, HostAddress)> = tables
            .local_to_remote
            .iter()
            .map(|(port, addr)| (*port, addr.clone()))
            .collect();
        snapshot.sort_by_key(|(port, _)| *port);
        snapshot
    }
}
