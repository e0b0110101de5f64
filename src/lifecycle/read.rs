//! Read operation: refresh the record from remote state.
//!
//! A missing remote VM clears the durable id and returns success; any
//! other backend failure propagates so stale state is never mistaken
//! for truth.

use crate::api::{ComputeApi, PowerState, VmRef};
use crate::devices::{DeviceMap, Scalar};
use crate::discover::discover;
use crate::error::RudderError;
use crate::ident::ResourceId;
use crate::lifecycle::{VM_KIND, VmRecord};
use crate::session::ProviderSession;

pub(super) async fn run<C: ComputeApi>(
    session: &ProviderSession<C>,
    rec: &mut VmRecord,
) -> Result<(), RudderError> {
    let mut ticket = session.begin().await;
    let client = &session.client;

    let Some(id) = rec.id.clone() else {
        return Ok(());
    };
    let mut vm = VmRef::new(id.node.clone(), id.vmid);

    let status = match client.vm_status(&vm).await {
        Ok(status) => status,
        Err(e) if e.is_not_found() => {
            tracing::info!(vmid = vm.vmid, "remote VM is gone, clearing durable id");
            rec.id = None;
            rec.observed = None;
            rec.power = None;
            rec.connection = None;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut observed = client.vm_config(&vm).await?;
    normalize_observed_disks(&mut observed.disks);

    // Pool membership only shows up in the pool listing. A listing
    // failure is not worth failing the whole read over.
    if let Ok(pools) = client.pool_list().await {
        for pool in pools {
            if pool.members.contains(&vm.vmid) {
                observed.pool = pool.id.clone();
                vm.set_pool(pool.id);
            }
        }
    }

    rec.power = Some(status.power);
    if status.power == PowerState::Running {
        ticket.release();
        rec.connection = discover(client, &vm, &rec.spec, &session.settings).await?;
    }

    // The node may have changed underneath us (migration).
    rec.id = Some(ResourceId::new(vm.node.clone(), VM_KIND, vm.vmid));
    rec.observed = Some(observed);
    Ok(())
}

/// Bring reported disks into the shape callers declare them in: the
/// cloud-init CD-ROM is backend-managed and reported as an empty slot,
/// and the backend omits `cache`/`backup` when they hold their defaults.
fn normalize_observed_disks(disks: &mut DeviceMap) {
    for slot in disks.values_mut() {
        let Some(row) = slot else { continue };
        if row
            .get("file")
            .and_then(|v| v.as_str())
            .is_some_and(|f| f.contains("cloudinit"))
        {
            *slot = None;
            continue;
        }
        let cache_unset = match row.get("cache") {
            None => true,
            Some(v) => v.as_str().is_some_and(str::is_empty),
        };
        if cache_unset {
            row.insert("cache".into(), Scalar::Str("none".into()));
        }
        if !row.contains_key("backup") {
            row.insert("backup".into(), Scalar::Bool(true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceRow, expand_device_list};

    fn disk(pairs: &[(&str, &str)]) -> DeviceRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Scalar::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn cloudinit_cdrom_slot_is_blanked() {
        let mut disks = expand_device_list(&[
            Some(disk(&[("file", "local:vm-100-disk-0.qcow2")])),
            Some(disk(&[("file", "local:vm-100-cloudinit.qcow2")])),
        ]);
        normalize_observed_disks(&mut disks);
        assert!(disks[&0].is_some());
        assert!(disks[&1].is_none());
    }

    #[test]
    fn omitted_cache_and_backup_get_their_defaults() {
        let mut disks = expand_device_list(&[Some(disk(&[("file", "a"), ("cache", "")]))]);
        normalize_observed_disks(&mut disks);
        let row = disks[&0].as_ref().unwrap();
        assert_eq!(row["cache"], Scalar::Str("none".into()));
        assert_eq!(row["backup"], Scalar::Bool(true));
    }

    #[test]
    fn explicit_cache_survives() {
        let mut disks =
            expand_device_list(&[Some(disk(&[("file", "a"), ("cache", "writeback")]))]);
        normalize_observed_disks(&mut disks);
        assert_eq!(
            disks[&0].as_ref().unwrap()["cache"],
            Scalar::Str("writeback".into())
        );
    }
}
