use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hickory_server::ServerFuture;
use log::{error, info};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::conf::Config;
use crate::feed::{CompositeDirectory, HostDirectory, StaticDirectory};
use crate::handler::QueryHandler;
use crate::host_table::{AHostTable, HostTable};
use crate::interface::interface_ipv4;
use crate::k8s_api::KubeApiDirectory;
use crate::refresh::RefreshLoop;
use crate::resolv_conf::ResolvConf;
use crate::upstream::{AUpstreamResolver, UpstreamResolver};

/// Node-level dns resolver: the UDP server plus its refresh loop.
pub struct NodeDns {
    listen_ip: Ipv4Addr,
    listen_port: u16,
    table: AHostTable,
    upstream: AUpstreamResolver,
    refresh: RefreshLoop,
}

fn build_directory(config: &Config) -> anyhow::Result<Box<dyn HostDirectory>> {
    let mut members: Vec<Box<dyn HostDirectory>> = vec![];
    if !config.feed.hosts.is_empty() {
        members.push(Box::new(StaticDirectory::new(&config.feed.hosts)));
    }
    if config.feed.k8s_api.enabled {
        members.push(Box::new(KubeApiDirectory::new(&config.feed.k8s_api)?));
    }
    Ok(match members.len() {
        1 => members.remove(0),
        _ => Box::new(CompositeDirectory::new(members)),
    })
}

impl NodeDns {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let listen_ip = interface_ipv4(&config.listen_interface).map_err(|e| {
            anyhow::anyhow!("get dns listen ip for interface {} err: {e}", config.listen_interface)
        })?;
        Ok(Self::with_directory(config, listen_ip, build_directory(config)?))
    }

    pub fn with_directory(config: &Config, listen_ip: Ipv4Addr, directory: Box<dyn HostDirectory>) -> Self {
        let table = Arc::new(HostTable::new());
        let upstream = Arc::new(UpstreamResolver::new(listen_ip));
        let resolv_conf = ResolvConf::new(&config.resolv_conf)
            .with_remove_search_domains(config.remove_search_domains);
        let refresh = RefreshLoop::new(directory, table.clone(), upstream.clone(), resolv_conf, listen_ip)
            .with_interval(config.refresh_interval)
            .with_manage_resolv_conf(config.manage_resolv_conf);

        Self {
            listen_ip,
            listen_port: config.listen_port,
            table,
            upstream,
            refresh,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((self.listen_ip, self.listen_port))
    }

    /// Serves until `shutdown` fires, then lets the refresh loop clean up
    /// the resolver file and closes the socket.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let bind_addr = self.listen_addr();
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("[node_dns] listening on: {:?}", socket.local_addr()?);

        let refresh = tokio::spawn(self.refresh.run(shutdown.clone()));

        let mut server = ServerFuture::new(QueryHandler::new(self.table, self.upstream));
        server.register_socket(socket);

        let served = tokio::select! {
            res = server.block_until_done() => res.map_err(anyhow::Error::from),
            _ = shutdown.cancelled() => Ok(()),
        };
        if let Err(ref e) = served {
            error!("dns server serve error: {e}");
            shutdown.cancel();
        }

        if let Err(e) = refresh.await {
            error!("refresh loop panicked: {e}");
        }
        info!("dns server stopped");
        served
    }
}
