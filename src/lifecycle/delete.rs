//! Delete operation: stop the VM if needed, wait for it to actually be
//! down, then remove it. Deleting a running VM is refused by the
//! backend, so the stop-wait is part of the operation.

use std::time::Duration;

use crate::api::{ComputeApi, PowerState, VmRef};
use crate::error::RudderError;
use crate::lifecycle::VmRecord;
use crate::session::ProviderSession;

const STOP_POLL_SECS: u64 = 5;

pub(super) async fn run<C: ComputeApi>(
    session: &ProviderSession<C>,
    rec: &mut VmRecord,
) -> Result<(), RudderError> {
    let _ticket = session.begin().await;
    let client = &session.client;
    rec.advisories.clear();

    let id = rec.id.clone().ok_or_else(|| RudderError::Validation {
        message: "delete requires a stored resource id".into(),
    })?;
    let vm = VmRef::new(id.node.clone(), id.vmid);

    let status = client.vm_status(&vm).await?;
    if status.power != PowerState::Stopped {
        tracing::info!(vmid = vm.vmid, "stopping VM before delete");
        client.stop_vm(&vm).await?;

        let mut waited = 0u64;
        loop {
            let status = client.vm_status(&vm).await?;
            if status.power == PowerState::Stopped {
                break;
            }
            if waited >= session.settings.stop_timeout_secs {
                return Err(RudderError::StopTimeout {
                    vmid: vm.vmid,
                    waited_secs: waited,
                });
            }
            tokio::time::sleep(Duration::from_secs(STOP_POLL_SECS)).await;
            waited += STOP_POLL_SECS;
        }
    }

    tracing::info!(vmid = vm.vmid, "deleting VM");
    client.delete_vm(&vm).await?;
    rec.id = None;
    rec.observed = None;
    rec.power = None;
    rec.connection = None;
    Ok(())
}
