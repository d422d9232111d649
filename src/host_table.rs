use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// One resolvable name, `<container>.<podLabel>`, and the pod address behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub hostname: String,
    pub address: Ipv4Addr,
}

impl HostRecord {
    pub fn new(hostname: impl Into<String>, address: Ipv4Addr) -> Self {
        Self { hostname: hostname.into(), address }
    }
}

pub type AHostTable = Arc<HostTable>;

/// Node-local hostname table.
///
/// Every refresh swaps in a complete new map; readers hold whichever
/// snapshot was current when they loaded it and never see a partial update.
pub struct HostTable {
    hosts: ArcSwap<HashMap<String, Ipv4Addr>>,
}

impl HostTable {
    pub fn new() -> Self {
        Self { hosts: ArcSwap::from_pointee(HashMap::new()) }
    }

    /// Replaces the whole table. Later duplicates of a hostname win.
    pub fn update<I>(&self, entries: I)
        where I: IntoIterator<Item=HostRecord> {
        let hosts = entries
            .into_iter()
            .map(|it| (it.hostname, it.address))
            .collect::<HashMap<_, _>>();
        self.hosts.store(Arc::new(hosts));
    }

    pub fn lookup(&self, name: &str) -> Option<Ipv4Addr> {
        self.hosts.load().get(name).copied()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, Ipv4Addr>> {
        self.hosts.load_full()
    }

    pub fn len(&self) -> usize {
        self.hosts.load().len()
    }
}

impl Default for HostTable {
    fn default() -> Self {
        Self::new()
    }
}
