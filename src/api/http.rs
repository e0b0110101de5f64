//! reqwest-backed `ComputeApi` implementation.
//!
//! Thin JSON-over-HTTP plumbing: one method per endpoint, bearer-token
//! auth, and response-status mapping into the `ApiError` taxonomy. No
//! retry happens here — bounded retry is an orchestrator decision.

use serde::Deserialize;
use serde_json::json;

use crate::config::VmConfig;
use crate::devices::DeviceRow;
use crate::settings::Settings;

use super::{AgentInterface, ApiError, ComputeApi, PoolInfo, PowerState, VmRef, VmStatus};

pub struct HttpApi {
    base_url: String,
    team_id: String,
    token: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            team_id: settings.team_id.clone(),
            token: settings.api_token.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header("X-Team-Id", &self.team_id)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = req
            .send()
            .await
            .map_err(|source| ApiError::Transport { source })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                what: if message.is_empty() {
                    "resource".to_string()
                } else {
                    message
                },
            });
        }
        // The backend reports a stopped agent as a 500 with a recognizable
        // message; the discovery poller treats it as "keep waiting".
        if message.contains("guest agent is not running") {
            return Err(ApiError::AgentNotRunning);
        }
        if matches!(status.as_u16(), 429 | 502 | 503 | 504) {
            return Err(ApiError::Transient {
                message: format!("{status}: {message}"),
            });
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(self.request(reqwest::Method::GET, path)).await?;
        resp.json()
            .await
            .map_err(|source| ApiError::Transport { source })
    }

    fn vm_path(&self, vm: &VmRef, tail: &str) -> String {
        format!("/nodes/{}/qemu/{}{tail}", vm.node, vm.vmid)
    }
}

#[derive(Debug, Deserialize)]
struct VmListEntry {
    vmid: u32,
    node: String,
    #[allow(dead_code)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct StatusDto {
    status: String,
    #[serde(default)]
    agent: bool,
}

#[derive(Debug, Deserialize)]
struct NextIdDto {
    vmid: u32,
}

#[derive(Debug, Deserialize)]
struct PoolListEntry {
    poolid: String,
}

#[derive(Debug, Deserialize)]
struct PoolDetailDto {
    members: Vec<PoolMemberDto>,
}

#[derive(Debug, Deserialize)]
struct PoolMemberDto {
    #[serde(rename = "type")]
    kind: String,
    vmid: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AgentInterfacesDto {
    result: Vec<AgentInterfaceDto>,
}

#[derive(Debug, Deserialize)]
struct AgentInterfaceDto {
    name: String,
    #[serde(rename = "hardware-address")]
    hardware_address: String,
    #[serde(rename = "ip-addresses", default)]
    ip_addresses: Vec<AgentAddressDto>,
}

#[derive(Debug, Deserialize)]
struct AgentAddressDto {
    #[serde(rename = "ip-address")]
    ip_address: String,
}

impl ComputeApi for HttpApi {
    async fn vm_by_name(&self, name: &str) -> Result<Option<VmRef>, ApiError> {
        Ok(self.vms_by_name(name).await?.into_iter().next())
    }

    async fn vms_by_name(&self, name: &str) -> Result<Vec<VmRef>, ApiError> {
        let entries: Vec<VmListEntry> = self
            .get_json(&format!("/virtualservers?name={name}"))
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| VmRef::new(e.node, e.vmid))
            .collect())
    }

    async fn next_free_id(&self) -> Result<u32, ApiError> {
        let dto: NextIdDto = self.get_json("/cluster/nextid").await?;
        Ok(dto.vmid)
    }

    async fn create_vm(&self, vm: &VmRef, config: &VmConfig) -> Result<(), ApiError> {
        let path = format!("/nodes/{}/qemu", vm.node);
        let req = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "vmid": vm.vmid, "pool": vm.pool, "config": config }));
        self.send(req).await.map(|_| ())
    }

    async fn clone_vm(&self, source: &VmRef, target: &VmRef, full: bool) -> Result<(), ApiError> {
        let req = self
            .request(reqwest::Method::POST, &self.vm_path(source, "/clone"))
            .json(&json!({
                "newid": target.vmid,
                "target": target.node,
                "pool": target.pool,
                "full": full,
            }));
        self.send(req).await.map(|_| ())
    }

    async fn update_config(&self, vm: &VmRef, config: &VmConfig) -> Result<(), ApiError> {
        let req = self
            .request(reqwest::Method::PUT, &self.vm_path(vm, "/config"))
            .json(config);
        self.send(req).await.map(|_| ())
    }

    async fn vm_config(&self, vm: &VmRef) -> Result<VmConfig, ApiError> {
        self.get_json(&self.vm_path(vm, "/config")).await
    }

    async fn set_params(&self, vm: &VmRef, params: &DeviceRow) -> Result<(), ApiError> {
        let req = self
            .request(reqwest::Method::PUT, &self.vm_path(vm, "/config"))
            .json(params);
        self.send(req).await.map(|_| ())
    }

    async fn resize_disk(&self, vm: &VmRef, disk: &str, size: &str) -> Result<(), ApiError> {
        let req = self
            .request(reqwest::Method::PUT, &self.vm_path(vm, "/resize"))
            .json(&json!({ "disk": disk, "size": size }));
        self.send(req).await.map(|_| ())
    }

    async fn vm_status(&self, vm: &VmRef) -> Result<VmStatus, ApiError> {
        let dto: StatusDto = self.get_json(&self.vm_path(vm, "/status")).await?;
        let power = match dto.status.as_str() {
            "running" => PowerState::Running,
            _ => PowerState::Stopped,
        };
        Ok(VmStatus {
            power,
            agent: dto.agent,
        })
    }

    async fn start_vm(&self, vm: &VmRef) -> Result<(), ApiError> {
        let req = self.request(reqwest::Method::POST, &self.vm_path(vm, "/status/start"));
        self.send(req).await.map(|_| ())
    }

    async fn stop_vm(&self, vm: &VmRef) -> Result<(), ApiError> {
        let req = self.request(reqwest::Method::POST, &self.vm_path(vm, "/status/stop"));
        self.send(req).await.map(|_| ())
    }

    async fn shutdown_vm(&self, vm: &VmRef) -> Result<(), ApiError> {
        let req = self.request(
            reqwest::Method::POST,
            &self.vm_path(vm, "/status/shutdown"),
        );
        self.send(req).await.map(|_| ())
    }

    async fn delete_vm(&self, vm: &VmRef) -> Result<(), ApiError> {
        let path = format!("/nodes/{}/qemu/{}", vm.node, vm.vmid);
        let req = self.request(reqwest::Method::DELETE, &path);
        self.send(req).await.map(|_| ())
    }

    async fn migrate_vm(&self, vm: &VmRef, target_node: &str) -> Result<(), ApiError> {
        let req = self
            .request(reqwest::Method::POST, &self.vm_path(vm, "/migrate"))
            .json(&json!({ "target": target_node, "online": true }));
        self.send(req).await.map(|_| ())
    }

    async fn update_pool(&self, vm: &VmRef, pool: &str) -> Result<(), ApiError> {
        let req = self
            .request(reqwest::Method::PUT, &format!("/pools/{pool}"))
            .json(&json!({ "vms": [vm.vmid] }));
        self.send(req).await.map(|_| ())
    }

    async fn pool_list(&self) -> Result<Vec<PoolInfo>, ApiError> {
        let entries: Vec<PoolListEntry> = self.get_json("/pools").await?;
        let mut pools = Vec::with_capacity(entries.len());
        for entry in entries {
            let detail: PoolDetailDto =
                self.get_json(&format!("/pools/{}", entry.poolid)).await?;
            let members = detail
                .members
                .into_iter()
                .filter(|m| m.kind != "storage")
                .filter_map(|m| m.vmid)
                .collect();
            pools.push(PoolInfo {
                id: entry.poolid,
                members,
            });
        }
        Ok(pools)
    }

    async fn agent_interfaces(&self, vm: &VmRef) -> Result<Vec<AgentInterface>, ApiError> {
        let dto: AgentInterfacesDto = self
            .get_json(&self.vm_path(vm, "/agent/network-get-interfaces"))
            .await?;
        Ok(dto
            .result
            .into_iter()
            .map(|iface| AgentInterface {
                name: iface.name,
                mac: iface.hardware_address,
                addresses: iface
                    .ip_addresses
                    .into_iter()
                    .map(|a| a.ip_address)
                    .collect(),
            })
            .collect())
    }
}
