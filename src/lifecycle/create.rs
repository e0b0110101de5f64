//! Create operation.
//!
//! Picks one of four mutually exclusive paths: recycle an existing VM
//! with the same name, clone from a template, install from an ISO, or
//! boot from the network. The durable id is assigned the moment a VM
//! exists remotely so that a failure in a follow-up step never orphans
//! the resource.

use crate::api::{ApiError, ComputeApi, VmRef};
use crate::config::{DesiredPower, VmConfig};
use crate::devices::{DeviceRow, Scalar};
use crate::discover::discover;
use crate::error::RudderError;
use crate::ident::ResourceId;
use crate::lifecycle::{VM_KIND, VmRecord, grow_disks, merge_post_clone_disks, read};
use crate::session::ProviderSession;

pub(super) async fn run<C: ComputeApi>(
    session: &ProviderSession<C>,
    rec: &mut VmRecord,
) -> Result<(), RudderError> {
    let mut ticket = session.begin().await;
    let client = &session.client;
    rec.advisories.clear();
    let spec = rec.spec.clone();
    let mut config = spec.config.clone();

    let existing = client.vm_by_name(&config.name).await?;
    let recycle = match existing {
        Some(found) if spec.force_create => {
            return Err(RudderError::DuplicateResource {
                name: config.name.clone(),
                vmid: found.vmid,
                detail: "force_create is set, refusing to adopt it".into(),
            });
        }
        Some(found) if found.node != spec.target_node => {
            return Err(RudderError::DuplicateResource {
                name: config.name.clone(),
                vmid: found.vmid,
                detail: format!("it already exists on node '{}'", found.node),
            });
        }
        Some(found) => Some(found),
        None => None,
    };

    let mut vm = if let Some(found) = &recycle {
        let mut vm = VmRef::new(found.node.clone(), found.vmid);
        if !config.pool.is_empty() {
            vm.set_pool(config.pool.clone());
        }
        vm
    } else {
        let vmid = if spec.vmid != 0 {
            spec.vmid
        } else {
            client.next_free_id().await?
        };
        let mut vm = VmRef::new(spec.target_node.clone(), vmid);
        if !config.pool.is_empty() {
            vm.set_pool(config.pool.clone());
        }
        vm
    };

    if let Some(found) = recycle {
        // Same name on the target node and force_create is off: take the
        // VM over instead of creating a second one.
        tracing::info!(vmid = found.vmid, name = %config.name, "recycling existing VM");
        rec.id = Some(ResourceId::new(vm.node.clone(), VM_KIND, vm.vmid));
        let _ = client.stop_vm(&vm).await;
        client.update_config(&vm, &config).await?;
        grow_disks(client, &vm, &config.disks, &session.settings).await?;
    } else if let Some(source_name) = &spec.clone_from {
        clone_from_template(session, rec, &mut vm, &mut config, source_name, spec.full_clone)
            .await?;
    } else if config.iso.is_some() {
        tracing::info!(vmid = vm.vmid, iso = config.iso.as_deref(), "creating VM from ISO");
        client.create_vm(&vm, &config).await?;
        rec.id = Some(ResourceId::new(vm.node.clone(), VM_KIND, vm.vmid));
    } else if spec.pxe {
        validate_network_boot(&config.boot)?;
        tracing::info!(vmid = vm.vmid, boot = %config.boot, "creating network-boot VM");
        client.create_vm(&vm, &config).await?;
        rec.id = Some(ResourceId::new(vm.node.clone(), VM_KIND, vm.vmid));
    } else {
        return Err(RudderError::AmbiguousCreateStrategy);
    };

    if let Some(storage) = &spec.cloudinit_cdrom_storage {
        let mut params = DeviceRow::new();
        params.insert("cdrom".into(), Scalar::Str(format!("{storage}:cloudinit")));
        client.set_params(&vm, &params).await?;
    }

    if spec.power == DesiredPower::Running {
        tracing::info!(vmid = vm.vmid, "starting VM");
        client.start_vm(&vm).await?;
        ticket.release();
        rec.connection = discover(client, &vm, &rec.spec, &session.settings).await?;
    } else {
        ticket.release();
    }

    read::run(session, rec).await
}

/// Clone path: resolve the template by name, clone, then push the full
/// desired config on top of what the clone produced.
async fn clone_from_template<C: ComputeApi>(
    session: &ProviderSession<C>,
    rec: &mut VmRecord,
    vm: &mut VmRef,
    config: &mut VmConfig,
    source_name: &str,
    full: bool,
) -> Result<(), RudderError> {
    let client = &session.client;
    let sources = client.vms_by_name(source_name).await?;
    // A template may exist on several nodes; a co-located source makes
    // the clone a local operation.
    let source = sources
        .iter()
        .find(|s| s.node == vm.node)
        .or_else(|| sources.first())
        .ok_or_else(|| ApiError::NotFound {
            what: format!("clone source '{source_name}'"),
        })?;

    tracing::info!(
        vmid = vm.vmid,
        source = source.vmid,
        source_node = %source.node,
        full,
        "cloning VM"
    );
    client.clone_vm(source, vm, full).await?;
    rec.id = Some(ResourceId::new(vm.node.clone(), VM_KIND, vm.vmid));
    tokio::time::sleep(session.settings.clone_wait()).await;

    // The backend decided where the cloned disks live; fold that into
    // the desired config before pushing it, or the push would detach
    // them.
    let reported = client.vm_config(vm).await?;
    merge_post_clone_disks(&mut config.disks, &reported.disks);

    client.update_config(vm, config).await?;
    grow_disks(client, vm, &config.disks, &session.settings).await?;
    Ok(())
}

/// A network-boot VM is only viable when the boot order actually puts a
/// NIC in the chain.
fn validate_network_boot(boot: &str) -> Result<(), RudderError> {
    let valid = boot
        .strip_prefix("order=")
        .is_some_and(|order| order.contains("net"));
    if valid {
        Ok(())
    } else {
        Err(RudderError::InvalidBootOrder {
            boot: boot.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_boot_requires_a_nic_in_the_boot_order() {
        assert!(validate_network_boot("order=net0;scsi0").is_ok());
        assert!(validate_network_boot("order=scsi0;net0").is_ok());
        assert!(validate_network_boot("order=scsi0").is_err());
        assert!(validate_network_boot("net0").is_err());
        assert!(validate_network_boot("").is_err());
    }
}
