use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Read or write failure on the resolver configuration file.
#[derive(Debug, Error)]
pub enum ResolvConfError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The host directory could not produce a fresh list of entries.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("pod api request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("pod api answered {status}")]
    Status { status: reqwest::StatusCode },
    #[error("pod list malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A single upstream candidate failed to produce an address.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("nameserver {server} timed out")]
    Timeout { server: IpAddr },
    #[error("nameserver {server} returned no addresses")]
    Empty { server: IpAddr },
    #[error("nameserver {server}: {source}")]
    Lookup {
        server: IpAddr,
        #[source]
        source: hickory_resolver::error::ResolveError,
    },
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no upstream nameserver configured")]
    NoUpstreamConfigured,
    #[error("all upstream nameservers failed, last error: {last}")]
    Exhausted { last: AttemptError },
}

/// The listen interface cannot provide this resolver's IPv4 identity.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("enumerating interfaces: {0}")]
    Io(#[from] std::io::Error),
    #[error("interface {0} not found")]
    UnknownInterface(String),
    #[error("no ip of version 4 found for interface {0}")]
    NoIpv4Address(String),
}
