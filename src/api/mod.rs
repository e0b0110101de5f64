//! Abstract boundary to the remote compute API.
//!
//! The orchestrator only ever talks to `ComputeApi`; the shipped
//! implementation lives in [`http`]. Errors carry the transient-vs-fatal
//! distinction the retry logic depends on.

pub mod http;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::VmConfig;
use crate::devices::DeviceRow;

/// Addresses one VM on the cluster. Mutated only to attach a pool or to
/// follow the VM to a new node during migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRef {
    pub node: String,
    pub vmid: u32,
    pub pool: Option<String>,
}

impl VmRef {
    pub fn new(node: impl Into<String>, vmid: u32) -> Self {
        Self {
            node: node.into(),
            vmid,
            pool: None,
        }
    }

    pub fn set_node(&mut self, node: impl Into<String>) {
        self.node = node.into();
    }

    pub fn set_pool(&mut self, pool: impl Into<String>) {
        self.pool = Some(pool.into());
    }
}

/// Observed power state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
}

/// State snapshot reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStatus {
    pub power: PowerState,
    /// Whether the backend reports the guest agent as enabled.
    pub agent: bool,
}

/// One guest network interface as reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInterface {
    pub name: String,
    pub mac: String,
    /// Bare address strings, IPv4 and IPv6 mixed.
    pub addresses: Vec<String>,
}

/// Pool listing entry; `members` holds VM ids only, storage members are
/// filtered out by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInfo {
    pub id: String,
    pub members: Vec<u32>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The guest agent is enabled but not (yet) answering. Expected while
    /// a guest boots; the discovery poller keeps waiting on it.
    #[error("guest agent is not running")]
    AgentNotRunning,

    #[error("{what} not found")]
    NotFound { what: String },

    /// Worth retrying where a bounded retry is allowed (disk resize only).
    #[error("transient backend error: {message}")]
    Transient { message: String },

    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_agent_not_running(&self) -> bool {
        matches!(self, ApiError::AgentNotRunning)
    }
}

/// Operations the orchestrator consumes from the remote compute API.
/// Every call is synchronous from the orchestrator's point of view and
/// must be issued while holding an acquired gate ticket.
#[allow(async_fn_in_trait)] // trait is consumed generically, never as dyn
pub trait ComputeApi {
    /// First VM carrying `name`, if any.
    async fn vm_by_name(&self, name: &str) -> Result<Option<VmRef>, ApiError>;
    /// Every VM carrying `name`, in listing order.
    async fn vms_by_name(&self, name: &str) -> Result<Vec<VmRef>, ApiError>;
    async fn next_free_id(&self) -> Result<u32, ApiError>;

    async fn create_vm(&self, vm: &VmRef, config: &VmConfig) -> Result<(), ApiError>;
    async fn clone_vm(&self, source: &VmRef, target: &VmRef, full: bool) -> Result<(), ApiError>;
    async fn update_config(&self, vm: &VmRef, config: &VmConfig) -> Result<(), ApiError>;
    async fn vm_config(&self, vm: &VmRef) -> Result<VmConfig, ApiError>;
    /// Raw parameter push for one-off attributes (cloud-init CD-ROM).
    async fn set_params(&self, vm: &VmRef, params: &DeviceRow) -> Result<(), ApiError>;
    async fn resize_disk(&self, vm: &VmRef, disk: &str, size: &str) -> Result<(), ApiError>;

    async fn vm_status(&self, vm: &VmRef) -> Result<VmStatus, ApiError>;
    async fn start_vm(&self, vm: &VmRef) -> Result<(), ApiError>;
    async fn stop_vm(&self, vm: &VmRef) -> Result<(), ApiError>;
    /// Graceful (ACPI) shutdown; callers fall back to `stop_vm`.
    async fn shutdown_vm(&self, vm: &VmRef) -> Result<(), ApiError>;
    async fn delete_vm(&self, vm: &VmRef) -> Result<(), ApiError>;

    async fn migrate_vm(&self, vm: &VmRef, target_node: &str) -> Result<(), ApiError>;
    async fn update_pool(&self, vm: &VmRef, pool: &str) -> Result<(), ApiError>;
    async fn pool_list(&self) -> Result<Vec<PoolInfo>, ApiError>;

    async fn agent_interfaces(&self, vm: &VmRef) -> Result<Vec<AgentInterface>, ApiError>;
}
