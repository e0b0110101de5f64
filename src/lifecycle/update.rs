//! Update operation.
//!
//! Ordering matters: relocation first (every later call must address the
//! VM on its new node), then config and disks, then pool membership,
//! then the power reconciliation driven by the reboot-impact analysis.

use crate::api::{ComputeApi, PowerState, VmRef};
use crate::config::{DesiredPower, VmConfig};
use crate::devices::strip_disk_update_quirks;
use crate::discover::discover;
use crate::error::RudderError;
use crate::ident::ResourceId;
use crate::impact;
use crate::lifecycle::{Advisory, VM_KIND, VmRecord, grow_disks, read};
use crate::session::ProviderSession;

pub(super) async fn run<C: ComputeApi>(
    session: &ProviderSession<C>,
    rec: &mut VmRecord,
    prior: &VmConfig,
) -> Result<(), RudderError> {
    let mut ticket = session.begin().await;
    let client = &session.client;
    rec.advisories.clear();

    let id = rec.id.clone().ok_or_else(|| RudderError::Validation {
        message: "update requires a stored resource id".into(),
    })?;
    let mut vm = VmRef::new(id.node.clone(), id.vmid);

    // Existence check up front; NotFound surfaces as-is.
    client.vm_status(&vm).await?;

    if rec.spec.target_node != vm.node {
        tracing::info!(
            vmid = vm.vmid,
            from = %vm.node,
            to = %rec.spec.target_node,
            "migrating VM"
        );
        client.migrate_vm(&vm, &rec.spec.target_node).await?;
        vm.set_node(rec.spec.target_node.clone());
    }

    let mut config = rec.spec.config.clone();
    // Placement attributes are create-time only; pushing them on update
    // would recreate the disk.
    strip_disk_update_quirks(&mut config.disks);

    client.update_config(&vm, &config).await?;
    grow_disks(client, &vm, &config.disks, &session.settings).await?;

    if prior.pool != config.pool {
        let mut pooled = vm.clone();
        if !prior.pool.is_empty() {
            pooled.set_pool(prior.pool.clone());
        }
        tracing::info!(vmid = vm.vmid, pool = %config.pool, "reassigning pool");
        client.update_pool(&pooled, &config.pool).await?;
    }

    let reboot = impact::reboot_required(prior, &config);
    let status = client.vm_status(&vm).await?;

    if status.power != PowerState::Stopped && rec.spec.power == DesiredPower::Stopped {
        tracing::info!(vmid = vm.vmid, "stopping VM to match desired power state");
        stop_gracefully(client, &vm).await?;
    } else if status.power != PowerState::Stopped && reboot {
        if rec.spec.automatic_reboot {
            tracing::info!(vmid = vm.vmid, "changes require a reboot, shutting down");
            stop_gracefully(client, &vm).await?;
        } else {
            tracing::warn!(
                vmid = vm.vmid,
                "changes require a reboot but automatic reboot is disabled"
            );
            rec.advisories.push(Advisory::RebootRequired);
        }
    }

    let status = client.vm_status(&vm).await?;
    if status.power == PowerState::Stopped && rec.spec.power == DesiredPower::Running {
        tracing::info!(vmid = vm.vmid, "starting VM");
        client.start_vm(&vm).await?;
    }

    rec.id = Some(ResourceId::new(vm.node.clone(), VM_KIND, vm.vmid));
    ticket.release();

    if rec.spec.power == DesiredPower::Running {
        rec.connection = discover(client, &vm, &rec.spec, &session.settings).await?;
    }

    read::run(session, rec).await
}

/// ACPI shutdown with a hard-stop fallback for guests that ignore it.
async fn stop_gracefully<C: ComputeApi>(client: &C, vm: &VmRef) -> Result<(), RudderError> {
    match client.shutdown_vm(vm).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(vmid = vm.vmid, error = %e, "graceful shutdown failed, forcing stop");
            client.stop_vm(vm).await.map_err(Into::into)
        }
    }
}
