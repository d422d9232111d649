use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use log::info;
use serde::{Deserialize, Serialize};

use crate::resolv_conf::DEFAULT_RESOLV_CONF;

#[derive(Parser, Debug)]
#[clap(author, version, about = "node-dns is a simple dns server for a k8s node.", long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// TOML config file; built-in defaults are used without it
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Writes the default configuration as TOML
    InitialConfig {
        #[clap(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Interface whose IPv4 address the server binds and advertises
    pub listen_interface: String,
    pub listen_port: u16,
    pub resolv_conf: PathBuf,
    pub manage_resolv_conf: bool,
    pub remove_search_domains: bool,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    pub feed: FeedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_interface: "docker0".to_string(),
            listen_port: 53,
            resolv_conf: PathBuf::from(DEFAULT_RESOLV_CONF),
            manage_resolv_conf: true,
            remove_search_domains: false,
            refresh_interval: Duration::from_secs(30),
            feed: FeedConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FeedConfig {
    pub k8s_api: K8sApiConfig,
    /// Fixed `hostname -> ip` entries served next to the API ones
    pub hosts: BTreeMap<String, Ipv4Addr>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct K8sApiConfig {
    pub enabled: bool,
    /// `host:port`, optionally prefixed with `http://` or `https://`
    pub uri: String,
    /// Skip verification of self-signed api server certificates
    pub insecure_tls: bool,
    pub token: String,
    /// Only list pods scheduled on this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

impl Default for K8sApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri: "http://127.0.0.1:10550".to_string(),
            insecure_tls: true,
            token: String::new(),
            node_name: None,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Config> {
        match &cli.config {
            Some(config_path) => {
                let config_str = std::fs::read_to_string(config_path)?;
                let config: Config = toml::from_str(&config_str)?;
                config.validate()?;
                Ok(config)
            }
            None => {
                info!("no config file given, using defaults");
                Ok(Config::default())
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be greater than zero")
        }
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
