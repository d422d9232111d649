use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveError;
use hickory_resolver::TokioAsyncResolver;
use log::{debug, warn};

use crate::error::{AttemptError, UpstreamError};

/// Per-candidate lookup bound.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

pub const DNS_PORT: u16 = 53;

/// Plain A lookup against one specific nameserver.
#[async_trait::async_trait]
pub trait ServerLookup: Send + Sync {
    async fn ipv4_lookup(&self, server: IpAddr, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError>;
}

/// Queries a nameserver over UDP on port 53 with hickory, one attempt, no cache.
pub struct HickoryLookup;

#[async_trait::async_trait]
impl ServerLookup for HickoryLookup {
    async fn ipv4_lookup(&self, server: IpAddr, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        let servers = NameServerConfigGroup::from_ips_clear(&[server], DNS_PORT, true);
        let config = ResolverConfig::from_parts(None, vec![], servers);
        let mut opts = ResolverOpts::default();
        opts.timeout = UPSTREAM_TIMEOUT;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        let resolver = TokioAsyncResolver::tokio(config, opts);
        let addrs = resolver.ipv4_lookup(host).await?;
        Ok(addrs.iter().map(|it| it.0).collect::<Vec<_>>())
    }
}

/// Address returned by an upstream together with the candidates that failed before it.
#[derive(Debug)]
pub struct Resolved {
    pub address: Ipv4Addr,
    pub failures: Vec<AttemptError>,
}

pub type AUpstreamResolver = Arc<UpstreamResolver>;

/// Ordered fallback over the nameservers found next to ours in the resolver file.
pub struct UpstreamResolver {
    listen_ip: Ipv4Addr,
    nameservers: ArcSwap<Vec<IpAddr>>,
    lookup: Box<dyn ServerLookup>,
}

impl UpstreamResolver {
    pub fn new(listen_ip: Ipv4Addr) -> Self {
        Self::with_lookup(listen_ip, Box::new(HickoryLookup))
    }

    pub fn with_lookup(listen_ip: Ipv4Addr, lookup: Box<dyn ServerLookup>) -> Self {
        Self {
            listen_ip,
            nameservers: ArcSwap::from_pointee(Vec::new()),
            lookup,
        }
    }

    /// Replaces the candidate list captured from the resolver file.
    pub fn set_nameservers(&self, nameservers: Vec<IpAddr>) {
        self.nameservers.store(Arc::new(nameservers));
    }

    pub fn nameservers(&self) -> Arc<Vec<IpAddr>> {
        self.nameservers.load_full()
    }

    pub async fn resolve(&self, host: &str) -> Result<Resolved, UpstreamError> {
        let candidates = self.nameservers.load_full();
        let candidates = candidates
            .iter()
            .copied()
            .filter(|it| *it != IpAddr::V4(self.listen_ip))
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(UpstreamError::NoUpstreamConfigured);
        }

        let mut failures = Vec::new();
        for server in candidates {
            debug!("asking upstream {server} for {host}");
            let attempt = tokio::time::timeout(UPSTREAM_TIMEOUT, self.lookup.ipv4_lookup(server, host)).await;
            let err = match attempt {
                Ok(Ok(addrs)) => match addrs.first() {
                    Some(address) => {
                        return Ok(Resolved { address: *address, failures });
                    }
                    None => AttemptError::Empty { server },
                },
                Ok(Err(source)) => AttemptError::Lookup { server, source },
                Err(_) => AttemptError::Timeout { server },
            };
            warn!("upstream lookup of {host} failed: {err}");
            failures.push(err);
        }

        match failures.pop() {
            Some(last) => Err(UpstreamError::Exhausted { last }),
            None => Err(UpstreamError::NoUpstreamConfigured),
        }
    }
}
