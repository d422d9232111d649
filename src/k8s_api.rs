use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::{debug, info};
use serde::Deserialize;

use crate::conf::K8sApiConfig;
use crate::error::DirectoryError;
use crate::feed::HostDirectory;
use crate::host_table::HostRecord;

pub const PODS_API: &str = "/api/v1/pods";

/// Pods carrying this annotation are published as `<container>.<value>`.
pub const HOST_ANNOTATION: &str = "node-dns.host";

#[derive(Deserialize, Debug, Default)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Deserialize, Debug, Default)]
struct Pod {
    #[serde(default)]
    metadata: PodMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Debug, Default)]
struct PodMeta {
    #[serde(default)]
    name: String,
    annotations: Option<HashMap<String, String>>,
}

#[derive(Deserialize, Debug, Default)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize, Debug)]
struct Container {
    name: String,
}

#[derive(Deserialize, Debug, Default)]
struct PodStatus {
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

fn records_from_pods(pods: PodList) -> Vec<HostRecord> {
    let mut records = Vec::new();
    for pod in pods.items {
        let Some(label) = pod.metadata.annotations.as_ref().and_then(|it| it.get(HOST_ANNOTATION)) else {
            continue;
        };
        let ip = match pod.status.pod_ip.as_deref().map(str::parse::<Ipv4Addr>) {
            Some(Ok(ip)) => ip,
            _ => {
                debug!("pod {} has no ipv4 pod ip yet, skipping", pod.metadata.name);
                continue;
            }
        };
        for container in &pod.spec.containers {
            records.push(HostRecord::new(format!("{}.{}", container.name, label), ip));
        }
    }
    records
}

/// Lists pods from the kubernetes API and derives hostnames from their annotation.
pub struct KubeApiDirectory {
    client: reqwest::Client,
    url: String,
    token: String,
    node_name: Option<String>,
    entries: Vec<HostRecord>,
}

impl KubeApiDirectory {
    pub fn new(config: &K8sApiConfig) -> Result<Self, DirectoryError> {
        info!("Starting k8s api feed at {}", config.uri);
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;
        let base = if config.uri.contains("://") {
            config.uri.clone()
        } else {
            format!("http://{}", config.uri)
        };
        Ok(Self {
            client,
            url: format!("{}{}", base.trim_end_matches('/'), PODS_API),
            token: config.token.clone(),
            node_name: config.node_name.clone(),
            entries: Vec::new(),
        })
    }

    async fn get_pods(&self) -> Result<PodList, DirectoryError> {
        let mut req = self.client.get(&self.url);
        if let Some(node) = &self.node_name {
            req = req.query(&[("fieldSelector", format!("spec.nodeName={node}"))]);
        }
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DirectoryError::Status { status });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait::async_trait]
impl HostDirectory for KubeApiDirectory {
    fn name(&self) -> &'static str {
        "k8s_api"
    }

    async fn refresh(&mut self) -> Result<(), DirectoryError> {
        let pods = self.get_pods().await?;
        self.entries = records_from_pods(pods);
        Ok(())
    }

    fn current_entries(&self) -> Vec<HostRecord> {
        self.entries.clone()
    }
}
