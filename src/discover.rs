//! Connection discovery: wait for the guest agent after boot, then
//! resolve an address downstream provisioning can reach.
//!
//! Runs as a best-effort side task after the VM starts; callers may
//! release the admission gate first so one slow boot does not serialize
//! the fleet. Every loop here carries a deadline — unlike the gate, a
//! guest that never comes up degrades to a typed failure.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::api::{AgentInterface, ComputeApi, VmRef};
use crate::config::VmSpec;
use crate::error::RudderError;
use crate::settings::Settings;

const DEFAULT_SSH_PORT: u16 = 22;

/// Resolved reachability information for a running VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub host: String,
    pub port: u16,
}

/// Discover a reachable address for `vm`.
///
/// Returns `Ok(None)` when the caller opted out of connection info or the
/// guest agent is not enabled — both are a clean skip, not a failure.
/// Fails with `GuestAgentUnavailable` when the agent never answers within
/// the create timeout, and `NoAddressFound` when no path yields an
/// address; downstream provisioning depends on the result, so the miss is
/// reported rather than swallowed.
pub async fn discover<C: ComputeApi>(
    client: &C,
    vm: &VmRef,
    spec: &VmSpec,
    settings: &Settings,
) -> Result<Option<ConnectInfo>, RudderError> {
    if !spec.define_connection_info {
        tracing::info!(vmid = vm.vmid, "connection info disabled by caller, skipping discovery");
        return Ok(None);
    }
    if !spec.config.agent {
        tracing::info!(
            vmid = vm.vmid,
            "guest agent not enabled on VM, cannot discover an address"
        );
        return Ok(None);
    }

    let interval = settings.poll_interval();
    let deadline = tokio::time::Instant::now() + settings.create_timeout();
    tracing::debug!(
        vmid = vm.vmid,
        timeout_secs = settings.create_timeout_secs,
        "waiting for guest agent"
    );

    wait_for_agent(client, vm, deadline, interval).await?;

    // The primary NIC's MAC identifies which guest interface to trust.
    let remote_config = client.vm_config(vm).await?;
    let mut host = match remote_config.primary_mac() {
        Some(mac) => resolve_address(client, vm, mac, deadline, interval).await,
        None => {
            tracing::debug!(vmid = vm.vmid, "no primary NIC MAC known, skipping agent match");
            String::new()
        }
    };

    // Cloud-init declared addresses take precedence over discovery, except
    // for literal dhcp with a live agent.
    if spec.config.has_cloudinit()
        && let Some(raw) = spec.config.ipconfig.get(&0)
    {
        let status = client.vm_status(vm).await?;
        if raw != "ip=dhcp" || !status.agent {
            if let Some(declared) = declared_address(raw) {
                if host.is_empty() {
                    host = declared.clone();
                } else {
                    // Only trust the discovered address over the declared
                    // one when the declared host is absent from what the
                    // agent reports.
                    let interfaces = client.agent_interfaces(vm).await?;
                    let declared_host = declared.split(':').next().unwrap_or(&declared);
                    let declared_seen = interfaces
                        .iter()
                        .any(|iface| iface.addresses.iter().any(|a| a == declared_host));
                    if declared_seen {
                        host = declared.clone();
                    }
                }
            }
        }
    }

    if host.is_empty() {
        tracing::warn!(vmid = vm.vmid, "no address found by any discovery path");
        return Err(RudderError::NoAddressFound { vmid: vm.vmid });
    }

    // A declared address may embed a port.
    let (host, port) = match host.split_once(':') {
        Some((h, p)) => {
            let port = p.parse().unwrap_or(DEFAULT_SSH_PORT);
            (h.to_string(), port)
        }
        None => (host, DEFAULT_SSH_PORT),
    };

    tracing::info!(vmid = vm.vmid, host, port, "resolved connection info");
    Ok(Some(ConnectInfo { host, port }))
}

/// Poll the agent's interface list until it answers or the deadline
/// passes. An "agent not running" error means the guest is still booting;
/// any other error class is fatal.
async fn wait_for_agent<C: ComputeApi>(
    client: &C,
    vm: &VmRef,
    deadline: tokio::time::Instant,
    interval: Duration,
) -> Result<(), RudderError> {
    loop {
        match client.agent_interfaces(vm).await {
            Ok(_) => {
                tracing::info!(vmid = vm.vmid, "guest agent is answering");
                return Ok(());
            }
            Err(e) if e.is_agent_not_running() => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(RudderError::GuestAgentUnavailable {
                        vmid: vm.vmid,
                        message: "agent enabled in configuration but never came up".into(),
                    });
                }
                tracing::debug!(vmid = vm.vmid, "guest agent not running yet");
                tokio::time::sleep(interval).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Poll interfaces until the one matching `mac` reports a global-unicast
/// IPv4 address, or the deadline passes. Returns an empty string on
/// timeout — the caller decides whether that is fatal.
async fn resolve_address<C: ComputeApi>(
    client: &C,
    vm: &VmRef,
    mac: &str,
    deadline: tokio::time::Instant,
    interval: Duration,
) -> String {
    while tokio::time::Instant::now() < deadline {
        match client.agent_interfaces(vm).await {
            Ok(interfaces) => {
                if let Some(addr) = first_global_ipv4(&interfaces, mac) {
                    tracing::debug!(vmid = vm.vmid, addr, "found address on primary NIC");
                    return addr;
                }
            }
            Err(e) => {
                tracing::debug!(vmid = vm.vmid, error = %e, "interface query failed, retrying");
            }
        }
        tokio::time::sleep(interval).await;
    }
    String::new()
}

/// First global-unicast IPv4 address on the interface whose hardware
/// address matches `mac` (case-insensitive). Strings with more than one
/// ':' are IPv6 and skipped.
fn first_global_ipv4(interfaces: &[AgentInterface], mac: &str) -> Option<String> {
    interfaces
        .iter()
        .filter(|iface| iface.mac.eq_ignore_ascii_case(mac))
        .flat_map(|iface| &iface.addresses)
        .find(|addr| addr.matches(':').count() < 2 && is_global_unicast_v4(addr))
        .cloned()
}

fn is_global_unicast_v4(addr: &str) -> bool {
    let Ok(ip) = addr.parse::<Ipv4Addr>() else {
        return false;
    };
    !ip.is_unspecified()
        && !ip.is_loopback()
        && !ip.is_multicast()
        && !ip.is_link_local()
        && !ip.is_broadcast()
}

/// Address portion of an `ipconfig` string: `"ip=10.0.0.5/24,gw=..."` →
/// `"10.0.0.5"`. Literal dhcp yields nothing to declare.
fn declared_address(raw: &str) -> Option<String> {
    let value = raw
        .split(',')
        .find_map(|part| part.trim().strip_prefix("ip="))?;
    if value == "dhcp" {
        return None;
    }
    let host = value.split('/').next().unwrap_or(value);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(mac: &str, addresses: &[&str]) -> AgentInterface {
        AgentInterface {
            name: "eth0".into(),
            mac: mac.into(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn picks_first_global_ipv4_on_matching_mac() {
        let interfaces = vec![
            iface("DE:AD:BE:EF:00:01", &["10.0.0.7"]),
            iface(
                "AA:BB:CC:DD:EE:FF",
                &["127.0.0.1", "fe80::1", "192.168.1.20", "192.168.1.21"],
            ),
        ];
        assert_eq!(
            first_global_ipv4(&interfaces, "aa:bb:cc:dd:ee:ff"),
            Some("192.168.1.20".to_string())
        );
    }

    #[test]
    fn skips_ipv6_loopback_and_link_local() {
        let interfaces = vec![iface(
            "AA:BB:CC:DD:EE:FF",
            &["::1", "fe80::ff:fe00:1", "169.254.10.1", "127.0.0.1"],
        )];
        assert_eq!(first_global_ipv4(&interfaces, "AA:BB:CC:DD:EE:FF"), None);
    }

    #[test]
    fn no_matching_mac_yields_nothing() {
        let interfaces = vec![iface("DE:AD:BE:EF:00:01", &["10.0.0.7"])];
        assert_eq!(first_global_ipv4(&interfaces, "AA:BB:CC:DD:EE:FF"), None);
    }

    #[test]
    fn declared_address_strips_prefix_and_mask() {
        assert_eq!(
            declared_address("ip=10.0.0.5/24,gw=10.0.0.1"),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(declared_address("gw=10.0.0.1,ip=10.0.0.5"), Some("10.0.0.5".to_string()));
        assert_eq!(declared_address("ip=dhcp"), None);
        assert_eq!(declared_address("gw=10.0.0.1"), None);
    }
}
