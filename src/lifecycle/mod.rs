//! Lifecycle orchestration.
//!
//! Each operation (create, read, update, delete) is a separate module
//! driving the VM through `Absent → Provisioning → Running ⇄ Stopped →
//! Deleted`. Every operation admits itself through the session gate
//! first; discovery polling runs after release so a slow boot does not
//! hold a slot.

pub mod create;
pub mod delete;
pub mod read;
pub mod update;

use std::fmt;
use std::sync::Arc;

use crate::api::{ComputeApi, PowerState, VmRef};
use crate::config::{VmConfig, VmSpec};
use crate::devices::DeviceMap;
use crate::discover::ConnectInfo;
use crate::error::RudderError;
use crate::ident::ResourceId;
use crate::session::ProviderSession;
use crate::settings::Settings;
use crate::util::{disk_size_bytes, format_gib};

/// Resource kind segment used in durable ids for VMs.
pub const VM_KIND: &str = "qemu";

const RESIZE_ATTEMPTS: u32 = 5;

/// The caller's durable handle for one VM resource.
///
/// Operations mutate the record in place. `id` is assigned as soon as a
/// VM exists remotely — even when a later step fails — so a partially
/// created VM is never orphaned from the handle. `read` clears `id` when
/// the remote VM is gone; absence is a state, not an error.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub id: Option<ResourceId>,
    pub spec: VmSpec,

    // Outputs of the last read.
    pub observed: Option<VmConfig>,
    pub power: Option<PowerState>,
    pub connection: Option<ConnectInfo>,
    /// Non-fatal findings attached to an otherwise successful operation.
    /// Reset at the start of every operation, so they always describe the
    /// most recent one.
    pub advisories: Vec<Advisory>,
}

impl VmRecord {
    pub fn new(spec: VmSpec) -> Self {
        Self {
            id: None,
            spec,
            observed: None,
            power: None,
            connection: None,
            advisories: Vec::new(),
        }
    }
}

/// Warning attached to a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// Changed attributes only take effect after a shutdown and start,
    /// and automatic reboot is disabled.
    RebootRequired,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::RebootRequired => write!(
                f,
                "VM needs a reboot for changed attributes to take effect, \
                 and automatic reboot is disabled"
            ),
        }
    }
}

/// Drives lifecycle operations against one provider session.
pub struct Orchestrator<C: ComputeApi> {
    session: Arc<ProviderSession<C>>,
}

impl<C: ComputeApi> Orchestrator<C> {
    pub fn new(session: Arc<ProviderSession<C>>) -> Self {
        Self { session }
    }

    pub async fn create(&self, record: &mut VmRecord) -> Result<(), RudderError> {
        create::run(&self.session, record).await
    }

    pub async fn read(&self, record: &mut VmRecord) -> Result<(), RudderError> {
        read::run(&self.session, record).await
    }

    /// `prior` is the configuration the caller last knew to be applied;
    /// the diff between it and `record.spec.config` drives the
    /// reboot-impact decision.
    pub async fn update(&self, record: &mut VmRecord, prior: &VmConfig) -> Result<(), RudderError> {
        update::run(&self.session, record, prior).await
    }

    pub async fn delete(&self, record: &mut VmRecord) -> Result<(), RudderError> {
        delete::run(&self.session, record).await
    }
}

/// Reconcile disk sizes upward.
///
/// Growth only: an equal or zero requested size is a no-op, a strictly
/// smaller one is a hard error — the backend cannot shrink a disk in
/// place. Each resize is attempted up to five times, sleeping a fixed
/// interval between attempts, to ride out transient backend errors; any
/// other failure surfaces immediately.
pub(crate) async fn grow_disks<C: ComputeApi>(
    client: &C,
    vm: &VmRef,
    desired: &DeviceMap,
    settings: &Settings,
) -> Result<(), RudderError> {
    let current = client.vm_config(vm).await?;

    for (slot, row) in desired {
        let Some(row) = row else { continue };
        if row.get("media").and_then(|v| v.as_str()) == Some("cdrom") {
            continue;
        }
        let Some(kind) = row.get("type").and_then(|v| v.as_str()) else {
            continue;
        };
        let disk = format!("{kind}{slot}");

        let Some(Some(current_row)) = current.disks.get(slot) else {
            continue;
        };
        let want = disk_size_bytes(row);
        let have = disk_size_bytes(current_row);

        if want == have || want == 0 {
            tracing::debug!(disk, "disk already at requested size, skipping resize");
            continue;
        }
        if want < have {
            return Err(RudderError::UnsupportedShrink {
                disk,
                current: format_gib(have),
                requested: format_gib(want),
            });
        }

        let size = format_gib(want);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match client.resize_disk(vm, &disk, &size).await {
                Ok(()) => {
                    tracing::info!(disk, %size, "disk resized");
                    break;
                }
                Err(e) if e.is_transient() && attempts < RESIZE_ATTEMPTS => {
                    tracing::debug!(disk, attempts, error = %e, "transient resize failure, retrying");
                    tokio::time::sleep(settings.poll_interval()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Fold server-reported post-clone disk placement into the desired
/// config. The backend picks `file` and `volume` during a clone; pushing
/// a config without them would detach the cloned disks. Caller-specified
/// values always win.
pub(crate) fn merge_post_clone_disks(desired: &mut DeviceMap, reported: &DeviceMap) {
    for (slot, reported_row) in reported {
        let Some(reported_row) = reported_row else { continue };
        let Some(Some(row)) = desired.get_mut(slot) else {
            continue;
        };
        for key in ["file", "volume"] {
            let unset = match row.get(key) {
                None => true,
                Some(v) => v.as_str().is_some_and(str::is_empty),
            };
            if unset && let Some(value) = reported_row.get(key) {
                row.insert(key.to_string(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceRow, Scalar, expand_device_list};

    fn disk(pairs: &[(&str, &str)]) -> DeviceRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Scalar::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn post_clone_merge_fills_only_unset_placement() {
        let mut desired = expand_device_list(&[
            Some(disk(&[("size", "10G"), ("file", "")])),
            Some(disk(&[("size", "20G"), ("file", "local:keep-me.qcow2")])),
        ]);
        let reported = expand_device_list(&[
            Some(disk(&[("file", "local:vm-100-disk-0.qcow2"), ("volume", "local")])),
            Some(disk(&[("file", "local:vm-100-disk-1.qcow2"), ("volume", "local")])),
        ]);

        merge_post_clone_disks(&mut desired, &reported);

        let first = desired[&0].as_ref().unwrap();
        assert_eq!(
            first["file"],
            Scalar::Str("local:vm-100-disk-0.qcow2".into())
        );
        assert_eq!(first["volume"], Scalar::Str("local".into()));

        // Caller-specified file survives.
        let second = desired[&1].as_ref().unwrap();
        assert_eq!(second["file"], Scalar::Str("local:keep-me.qcow2".into()));
    }

    #[test]
    fn post_clone_merge_ignores_slots_the_caller_never_declared() {
        let mut desired = expand_device_list(&[Some(disk(&[("size", "10G")]))]);
        let reported = expand_device_list(&[
            Some(disk(&[("file", "a")])),
            Some(disk(&[("file", "b")])),
        ]);
        merge_post_clone_disks(&mut desired, &reported);
        assert_eq!(desired.len(), 1);
    }
}
