//! Change-impact analysis: does applying `new` over `old` require a
//! reboot?
//!
//! Device lists are compared positionally (index-aligned), never by
//! identity. Reordering a list without changing any value at a given
//! position is indistinguishable from changing every position — a known
//! imprecision carried over deliberately; an identity-aware diff would
//! silently change observable reboot behavior.

use crate::config::VmConfig;
use crate::devices::{DeviceRow, flatten_device_map};

/// Whether the transition from `old` to `new` requires a reboot.
///
/// Hot-plug capability tags come from the new configuration; a feature
/// present in the set suppresses the reboot its change would otherwise
/// force.
pub fn reboot_required(old: &VmConfig, new: &VmConfig) -> bool {
    if critical_scalar_changed(old, new) {
        return true;
    }

    if old.memory_mb != new.memory_mb && !new.hotplug_enabled("memory") {
        return true;
    }

    if (old.sockets, old.cores, old.vcpus) != (new.sockets, new.cores, new.vcpus)
        && !new.hotplug_enabled("cpu")
    {
        return true;
    }

    if !new.hotplug_enabled("network") && network_change(old, new) {
        return true;
    }

    disk_change(old, new, new.hotplug_enabled("disk"))
}

/// Attributes whose change always forces a reboot, hot-plug or not.
fn critical_scalar_changed(old: &VmConfig, new: &VmConfig) -> bool {
    old.bios != new.bios
        || old.boot != new.boot
        || old.bootdisk != new.bootdisk
        || old.agent != new.agent
        || old.qemu_os != new.qemu_os
        || old.balloon != new.balloon
        || old.cpu != new.cpu
        || old.numa != new.numa
        || old.machine != new.machine
        || old.hotplug != new.hotplug
        || old.scsihw != new.scsihw
        || old.os_type != new.os_type
        || old.ciuser != new.ciuser
        || old.cipassword != new.cipassword
        || old.cicustom != new.cicustom
        || old.searchdomain != new.searchdomain
        || old.nameserver != new.nameserver
        || old.sshkeys != new.sshkeys
        || old.ipconfig != new.ipconfig
        || old.kvm != new.kvm
        || old.vga != new.vga
        || old.serials != new.serials
        || old.usbs != new.usbs
        || old.pcis != new.pcis
}

/// Network reboot rule: a length change always counts; for equal-length
/// lists only model, MAC and queue count matter per position.
fn network_change(old: &VmConfig, new: &VmConfig) -> bool {
    let old_rows = flatten_device_map(&old.networks);
    let new_rows = flatten_device_map(&new.networks);
    if old_rows.len() != new_rows.len() {
        return true;
    }
    old_rows.iter().zip(&new_rows).any(|(o, n)| {
        attr_changed(o, n, "model") || attr_changed(o, n, "macaddr") || attr_changed(o, n, "queues")
    })
}

/// Disk reboot rule: ssd/iothread/discard/cache/size changes force a
/// reboot even with disk hot-plug; type changes and list-length changes
/// only when disk hot-plug is off. Positions past the shorter list are
/// not inspected.
fn disk_change(old: &VmConfig, new: &VmConfig, disk_hotplug: bool) -> bool {
    let old_rows = flatten_device_map(&old.disks);
    let new_rows = flatten_device_map(&new.disks);

    if old_rows.len() != new_rows.len() && !disk_hotplug {
        return true;
    }

    old_rows.iter().zip(&new_rows).any(|(o, n)| {
        attr_changed(o, n, "ssd")
            || attr_changed(o, n, "iothread")
            || attr_changed(o, n, "discard")
            || attr_changed(o, n, "cache")
            || attr_changed(o, n, "size")
            || (!disk_hotplug && attr_changed(o, n, "type"))
    })
}

fn attr_changed(old: &DeviceRow, new: &DeviceRow, key: &str) -> bool {
    old.get(key) != new.get(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceRow, Scalar, expand_device_list};

    fn row(pairs: &[(&str, &str)]) -> DeviceRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Scalar::Str(v.to_string())))
            .collect()
    }

    fn with_networks(rows: &[DeviceRow], hotplug: &str) -> VmConfig {
        VmConfig {
            networks: expand_device_list(
                &rows.iter().cloned().map(Some).collect::<Vec<_>>(),
            ),
            hotplug: hotplug.into(),
            ..Default::default()
        }
    }

    fn with_disks(rows: &[DeviceRow], hotplug: &str) -> VmConfig {
        VmConfig {
            disks: expand_device_list(
                &rows.iter().cloned().map(Some).collect::<Vec<_>>(),
            ),
            hotplug: hotplug.into(),
            ..Default::default()
        }
    }

    #[test]
    fn memory_change_requires_reboot_without_hotplug() {
        let old = VmConfig {
            memory_mb: 2048,
            ..Default::default()
        };
        let new = VmConfig {
            memory_mb: 4096,
            ..Default::default()
        };
        assert!(reboot_required(&old, &new));
    }

    #[test]
    fn memory_hotplug_suppresses_reboot() {
        let old = VmConfig {
            memory_mb: 2048,
            hotplug: "memory".into(),
            ..Default::default()
        };
        let new = VmConfig {
            memory_mb: 4096,
            hotplug: "memory".into(),
            ..Default::default()
        };
        assert!(!reboot_required(&old, &new));
    }

    #[test]
    fn cpu_topology_change_respects_cpu_hotplug() {
        let old = VmConfig {
            cores: 2,
            ..Default::default()
        };
        let mut new = VmConfig {
            cores: 4,
            ..Default::default()
        };
        assert!(reboot_required(&old, &new));

        let old_hp = VmConfig {
            cores: 2,
            hotplug: "cpu".into(),
            ..Default::default()
        };
        new.hotplug = "cpu".into();
        assert!(!reboot_required(&old_hp, &new));
    }

    #[test]
    fn critical_scalar_forces_reboot_despite_hotplug() {
        let old = VmConfig {
            bios: "seabios".into(),
            hotplug: "memory,cpu,network,disk".into(),
            ..Default::default()
        };
        let new = VmConfig {
            bios: "ovmf".into(),
            hotplug: "memory,cpu,network,disk".into(),
            ..Default::default()
        };
        assert!(reboot_required(&old, &new));
    }

    #[test]
    fn mac_change_on_same_position_requires_reboot() {
        let old = with_networks(&[row(&[("model", "virtio"), ("macaddr", "AA")])], "");
        let new = with_networks(&[row(&[("model", "virtio"), ("macaddr", "BB")])], "");
        assert!(reboot_required(&old, &new));
    }

    #[test]
    fn non_critical_network_attr_change_does_not() {
        let old = with_networks(
            &[row(&[("model", "virtio"), ("macaddr", "AA"), ("bridge", "vmbr0")])],
            "",
        );
        let new = with_networks(
            &[row(&[("model", "virtio"), ("macaddr", "AA"), ("bridge", "vmbr1")])],
            "",
        );
        assert!(!reboot_required(&old, &new));
    }

    #[test]
    fn network_length_change_suppressed_by_hotplug() {
        let old = with_networks(
            &[row(&[("model", "virtio")]), row(&[("model", "e1000")])],
            "network",
        );
        let new = with_networks(&[row(&[("model", "virtio")])], "network");
        assert!(!reboot_required(&old, &new));
    }

    #[test]
    fn disk_length_change_suppressed_by_disk_hotplug() {
        let old = with_disks(
            &[row(&[("size", "10G")]), row(&[("size", "20G")])],
            "disk",
        );
        let new = with_disks(&[row(&[("size", "10G")])], "disk");
        assert!(!reboot_required(&old, &new));
    }

    #[test]
    fn disk_cache_change_forces_reboot_even_with_hotplug() {
        let old = with_disks(&[row(&[("cache", "none")])], "disk");
        let new = with_disks(&[row(&[("cache", "writeback")])], "disk");
        assert!(reboot_required(&old, &new));
    }

    #[test]
    fn disk_type_change_only_counts_without_hotplug() {
        let old = with_disks(&[row(&[("type", "scsi")])], "disk");
        let new = with_disks(&[row(&[("type", "virtio")])], "disk");
        assert!(!reboot_required(&old, &new));

        let old = with_disks(&[row(&[("type", "scsi")])], "");
        let new = with_disks(&[row(&[("type", "virtio")])], "");
        assert!(reboot_required(&old, &new));
    }

    #[test]
    fn identical_configs_need_no_reboot() {
        let config = VmConfig {
            memory_mb: 2048,
            cores: 2,
            boot: "order=scsi0".into(),
            ..Default::default()
        };
        assert!(!reboot_required(&config, &config.clone()));
    }
}
