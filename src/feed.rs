use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::error::DirectoryError;
use crate::host_table::HostRecord;

/// A source of `hostname -> ip` facts that is polled periodically.
#[async_trait::async_trait]
pub trait HostDirectory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetches a fresh entry list. On error the previous list stays current.
    async fn refresh(&mut self) -> Result<(), DirectoryError>;

    fn current_entries(&self) -> Vec<HostRecord>;
}

/// Fixed hosts from the configuration file.
pub struct StaticDirectory {
    entries: Vec<HostRecord>,
}

impl StaticDirectory {
    pub fn new(hosts: &BTreeMap<String, Ipv4Addr>) -> Self {
        let entries = hosts
            .iter()
            .map(|(host, ip)| HostRecord::new(host.clone(), *ip))
            .collect();
        Self { entries }
    }
}

#[async_trait::async_trait]
impl HostDirectory for StaticDirectory {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn refresh(&mut self) -> Result<(), DirectoryError> {
        Ok(())
    }

    fn current_entries(&self) -> Vec<HostRecord> {
        self.entries.clone()
    }
}

/// Several directories queried in order; later members override earlier ones.
pub struct CompositeDirectory {
    members: Vec<Box<dyn HostDirectory>>,
}

impl CompositeDirectory {
    pub fn new(members: Vec<Box<dyn HostDirectory>>) -> Self {
        Self { members }
    }
}

#[async_trait::async_trait]
impl HostDirectory for CompositeDirectory {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn refresh(&mut self) -> Result<(), DirectoryError> {
        for member in self.members.iter_mut() {
            member.refresh().await?;
        }
        Ok(())
    }

    fn current_entries(&self) -> Vec<HostRecord> {
        self.members.iter().flat_map(|it| it.current_entries()).collect()
    }
}
