use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::feed::HostDirectory;
use crate::host_table::AHostTable;
use crate::resolv_conf::ResolvConf;
use crate::upstream::AUpstreamResolver;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Background owner of the host table and the resolver file.
///
/// It is the only writer of both. Each tick refreshes the directory, swaps
/// the table, re-asserts our nameserver line and captures the upstream list.
/// On shutdown it removes our nameserver line once more and returns.
pub struct RefreshLoop {
    directory: Box<dyn HostDirectory>,
    table: AHostTable,
    upstream: AUpstreamResolver,
    resolv_conf: ResolvConf,
    listen_ip: Ipv4Addr,
    manage_resolv_conf: bool,
    interval: Duration,
}

impl RefreshLoop {
    pub fn new(
        directory: Box<dyn HostDirectory>,
        table: AHostTable,
        upstream: AUpstreamResolver,
        resolv_conf: ResolvConf,
        listen_ip: Ipv4Addr,
    ) -> Self {
        Self {
            directory,
            table,
            upstream,
            resolv_conf,
            listen_ip,
            manage_resolv_conf: true,
            interval: REFRESH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_manage_resolv_conf(mut self, manage: bool) -> Self {
        self.manage_resolv_conf = manage;
        self
    }

    pub async fn refresh_once(&mut self) {
        match self.directory.refresh().await {
            Ok(()) => {
                let entries = self.directory.current_entries();
                info!("{} feed refreshed, {} host(s) resolvable", self.directory.name(), entries.len());
                for it in &entries {
                    debug!("  {} -> {}", it.hostname, it.address);
                }
                self.table.update(entries);
            }
            Err(e) => error!("failed to refresh {} feed, keeping previous hosts: {e}", self.directory.name()),
        }

        if self.manage_resolv_conf {
            if let Err(e) = self.resolv_conf.ensure(self.listen_ip) {
                error!("failed to ensure nameserver {}: {e}", self.listen_ip);
            }
        }

        match self.resolv_conf.other_nameservers(self.listen_ip) {
            Ok(nameservers) => {
                debug!("upstream nameservers: {nameservers:?}");
                self.upstream.set_nameservers(nameservers);
            }
            Err(e) => warn!("failed to read upstream nameservers: {e}"),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.refresh_once().await,
            }
        }

        if self.manage_resolv_conf {
            if let Err(e) = self.resolv_conf.cleanup(self.listen_ip) {
                error!("failed to clean up {}: {e}", self.resolv_conf.path().display());
            }
        }
        info!("refresh loop stopped");
    }
}
