//! Proxmox VE implementation of the hypervisor client.
//!
//! Talks to the cluster JSON API (`/api2/json`) with API-token
//! authentication. Only the endpoints the autoscaler needs are covered:
//! node enumeration, template cloning, power control, deletion, and the
//! cluster-wide resource listing used for name lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use strato_core::NodePattern;

use crate::error::{HypervisorError, HypervisorResult};
use crate::types::{CloudInit, HostInfo, HostStatus, VmRef, VmStatus};
use crate::HypervisorClient;

/// Proxmox connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxmoxConfig {
    /// Base URL of the cluster API (e.g. `https://pve.example:8006`).
    #[serde(default = "default_url")]
    pub url: String,

    /// API token id, `user@realm!tokenname`.
    #[serde(default)]
    pub token_id: String,

    /// API token secret.
    #[serde(default)]
    pub secret: String,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "https://localhost:8006".to_owned()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token_id: String::new(),
            secret: String::new(),
            insecure: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Proxmox VE API client.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    client: Client,
    base_url: String,
}

/// Envelope every Proxmox API response is wrapped in.
#[derive(Deserialize)]
struct ApiResponse<T> {
    data: T,
}

/// A node as returned by `GET /nodes`.
#[derive(Deserialize)]
struct NodeItem {
    node: String,
    status: String,
    #[serde(default)]
    cpu: Option<f64>,
    #[serde(default)]
    maxcpu: Option<f64>,
    #[serde(default)]
    mem: Option<u64>,
    #[serde(default)]
    maxmem: Option<u64>,
}

/// A VM as returned by `GET /cluster/resources?type=vm`.
#[derive(Deserialize)]
struct VmResource {
    vmid: u32,
    node: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    template: Option<u8>,
}

/// Current status as returned by `GET .../status/current`.
#[derive(Deserialize)]
struct VmCurrentStatus {
    status: String,
}

impl ProxmoxClient {
    /// Create a client from configuration.
    pub fn new(config: &ProxmoxConfig) -> HypervisorResult<Self> {
        if config.token_id.is_empty() || config.secret.is_empty() {
            return Err(HypervisorError::Config(
                "Proxmox token_id and secret must be set".to_owned(),
            ));
        }

        let token = format!("PVEAPIToken={}={}", config.token_id, config.secret);
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&token)
                .map_err(|e| HypervisorError::Config(format!("invalid API token: {e}")))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure)
            .default_headers(headers)
            .build()
            .map_err(HypervisorError::Http)?;

        Ok(Self {
            client,
            base_url: format!("{}/api2/json", config.url.trim_end_matches('/')),
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> HypervisorResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HypervisorError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body: ApiResponse<T> = response.json().await.map_err(HypervisorError::Http)?;
        Ok(body.data)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> HypervisorResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(HypervisorError::Http)?;
        Self::parse(response).await
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> HypervisorResult<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(HypervisorError::Http)?;
        // Task endpoints answer with a UPID string we do not track.
        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    async fn put(&self, path: &str, form: &[(&str, String)]) -> HypervisorResult<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .put(&url)
            .form(form)
            .send()
            .await
            .map_err(HypervisorError::Http)?;
        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> HypervisorResult<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(HypervisorError::Http)?;
        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    async fn list_vm_resources(&self) -> HypervisorResult<Vec<VmResource>> {
        self.get("/cluster/resources?type=vm").await
    }

    /// Find the template VM by name.
    async fn find_template(&self, template: &str) -> HypervisorResult<VmRef> {
        let vms = self.list_vm_resources().await?;
        vms.into_iter()
            .find(|vm| vm.template == Some(1) && vm.name.as_deref() == Some(template))
            .map(|vm| VmRef {
                vmid: vm.vmid,
                host: vm.node,
                name: template.to_owned(),
            })
            .ok_or_else(|| HypervisorError::TemplateNotFound(template.to_owned()))
    }

    /// Reserve the next free VM id on the cluster.
    async fn next_vmid(&self) -> HypervisorResult<u32> {
        let raw: String = self.get("/cluster/nextid").await?;
        raw.parse().map_err(|_| HypervisorError::Api {
            status: 200,
            message: format!("unparseable vmid: {raw}"),
        })
    }
}

#[async_trait]
impl HypervisorClient for ProxmoxClient {
    async fn list_hosts(&self) -> HypervisorResult<Vec<HostInfo>> {
        let nodes: Vec<NodeItem> = self.get("/nodes").await?;

        let hosts = nodes
            .into_iter()
            .map(|n| {
                let status = match n.status.as_str() {
                    "online" => HostStatus::Online,
                    "offline" => HostStatus::Offline,
                    _ => HostStatus::Unknown,
                };
                let maxcpu = n.maxcpu.unwrap_or_default();
                let usage = n.cpu.unwrap_or_default().clamp(0.0, 1.0);
                HostInfo {
                    id: n.node,
                    cpu_free: maxcpu * (1.0 - usage),
                    mem_free: n.maxmem.unwrap_or_default().saturating_sub(n.mem.unwrap_or_default()),
                    status,
                }
            })
            .collect();

        Ok(hosts)
    }

    async fn clone_template(
        &self,
        template: &str,
        name: &str,
        target_host: &str,
        cloud_init: &CloudInit,
    ) -> HypervisorResult<VmRef> {
        if self.get_vm_by_name(name).await?.is_some() {
            return Err(HypervisorError::NameCollision(name.to_owned()));
        }

        let tpl = self.find_template(template).await?;
        let vmid = self.next_vmid().await?;

        debug!(template = %template, vmid, target = %target_host, "cloning template");
        self.post(
            &format!("/nodes/{}/qemu/{}/clone", tpl.host, tpl.vmid),
            &[
                ("newid", vmid.to_string()),
                ("name", name.to_owned()),
                ("target", target_host.to_owned()),
                ("full", "0".to_owned()),
            ],
        )
        .await?;

        let vm = VmRef {
            vmid,
            host: target_host.to_owned(),
            name: name.to_owned(),
        };

        self.put(
            &format!("/nodes/{}/qemu/{}/config", vm.host, vm.vmid),
            &[
                ("ciuser", cloud_init.user.clone()),
                ("sshkeys", percent_encode(&cloud_init.ssh_keys)),
            ],
        )
        .await?;

        info!(vm = %vm.name, vmid = vm.vmid, host = %vm.host, "template cloned");
        Ok(vm)
    }

    async fn start(&self, vm: &VmRef) -> HypervisorResult<()> {
        self.post(&format!("/nodes/{}/qemu/{}/status/start", vm.host, vm.vmid), &[])
            .await
    }

    async fn stop(&self, vm: &VmRef) -> HypervisorResult<()> {
        self.post(&format!("/nodes/{}/qemu/{}/status/stop", vm.host, vm.vmid), &[])
            .await
    }

    async fn destroy(&self, vm: &VmRef) -> HypervisorResult<()> {
        self.delete(&format!(
            "/nodes/{}/qemu/{}?purge=1&destroy-unreferenced-disks=1",
            vm.host, vm.vmid
        ))
        .await
    }

    async fn vm_status(&self, vm: &VmRef) -> HypervisorResult<VmStatus> {
        let current: VmCurrentStatus = self
            .get(&format!("/nodes/{}/qemu/{}/status/current", vm.host, vm.vmid))
            .await?;
        Ok(VmStatus::parse(&current.status))
    }

    async fn get_vm_by_name(&self, name: &str) -> HypervisorResult<Option<VmRef>> {
        let vms = self.list_vm_resources().await?;
        Ok(vms
            .into_iter()
            .find(|vm| vm.template != Some(1) && vm.name.as_deref() == Some(name))
            .map(|vm| VmRef {
                vmid: vm.vmid,
                host: vm.node,
                name: name.to_owned(),
            }))
    }

    async fn list_owned_vms(&self, pattern: &NodePattern) -> HypervisorResult<Vec<VmRef>> {
        let vms = self.list_vm_resources().await?;
        Ok(vms
            .into_iter()
            .filter(|vm| vm.template != Some(1))
            .filter_map(|vm| {
                let name = vm.name?;
                pattern.matches(&name).then_some(VmRef {
                    vmid: vm.vmid,
                    host: vm.node,
                    name,
                })
            })
            .collect())
    }
}

/// Percent-encode a cloud-init value. The Proxmox config endpoint expects
/// `sshkeys` URL-encoded inside the form body.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
