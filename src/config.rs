//! Desired and observed VM configuration.
//!
//! `VmConfig` is the attribute set pushed to and read back from the remote
//! API. `VmSpec` wraps it with the knobs that only matter to the
//! orchestrator (creation strategy, power policy, placement) and never
//! travel over the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::devices::{DeviceMap, DeviceRow};

/// VM configuration as declared by the caller and as reported back by the
/// remote API. Device collections are slot-indexed; slot order is
/// positional identity and must be preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub name: String,
    pub description: String,
    pub pool: String,
    pub bios: String,
    pub onboot: bool,
    pub startup: String,
    pub tablet: bool,
    pub boot: String,
    pub bootdisk: String,
    /// Guest agent enablement flag; the poller refuses to run without it.
    pub agent: bool,
    pub memory_mb: u64,
    pub balloon: u64,
    pub machine: String,
    pub cores: u32,
    pub sockets: u32,
    pub vcpus: u32,
    pub cpu: String,
    pub numa: bool,
    pub kvm: bool,
    /// Comma-separated hot-plug capability tags: `memory`, `cpu`,
    /// `network`, `disk`, ...
    pub hotplug: String,
    pub scsihw: String,
    pub qemu_os: String,
    pub os_type: String,
    pub tags: String,
    pub args: String,
    /// Installation medium for the media-boot creation strategy.
    pub iso: Option<String>,
    pub vga: Option<DeviceRow>,

    // Cloud-init.
    pub ciuser: String,
    pub cipassword: String,
    pub cicustom: String,
    pub searchdomain: String,
    pub nameserver: String,
    pub sshkeys: String,
    /// Per-interface static IP configuration, `ipconfig0` upward.
    pub ipconfig: BTreeMap<u32, String>,

    pub disks: DeviceMap,
    pub networks: DeviceMap,
    pub serials: DeviceMap,
    pub pcis: DeviceMap,
    pub usbs: DeviceMap,
}

impl VmConfig {
    /// Whether a hot-plug capability tag is present.
    pub fn hotplug_enabled(&self, feature: &str) -> bool {
        self.hotplug.split(',').any(|tag| tag.trim() == feature)
    }

    /// A VM counts as cloud-init managed when any cloud-init attribute is
    /// populated.
    pub fn has_cloudinit(&self) -> bool {
        !self.ciuser.is_empty()
            || !self.cipassword.is_empty()
            || !self.cicustom.is_empty()
            || !self.searchdomain.is_empty()
            || !self.nameserver.is_empty()
            || !self.sshkeys.is_empty()
            || !self.ipconfig.is_empty()
    }

    /// MAC address of the primary (slot 0) network interface.
    pub fn primary_mac(&self) -> Option<&str> {
        self.networks
            .get(&0)?
            .as_ref()?
            .get("macaddr")?
            .as_str()
    }
}

/// Desired power state of the VM after the operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredPower {
    Running,
    Stopped,
}

/// Full desired state for one VM: wire configuration plus orchestration
/// policy.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub config: VmConfig,

    /// Node the VM should live on.
    pub target_node: String,
    /// Explicit vmid; 0 means "allocate via next-free-id".
    pub vmid: u32,

    // Creation strategy - exactly one of clone/iso/pxe must be set
    // (iso rides on `config.iso` since it is also a wire attribute).
    /// Name of the source VM to clone.
    pub clone_from: Option<String>,
    pub full_clone: bool,
    /// Boot via network; requires a net entry in `config.boot`.
    pub pxe: bool,

    /// Refuse to adopt a pre-existing VM with the same name.
    pub force_create: bool,
    /// Storage to attach a cloud-init CD-ROM from, post-create.
    pub cloudinit_cdrom_storage: Option<String>,

    pub power: DesiredPower,
    /// When a change requires a reboot: reboot automatically, or surface
    /// an advisory instead.
    pub automatic_reboot: bool,
    /// Opt-out for connection discovery.
    pub define_connection_info: bool,
}

impl Default for VmSpec {
    fn default() -> Self {
        Self {
            config: VmConfig::default(),
            target_node: String::new(),
            vmid: 0,
            clone_from: None,
            full_clone: true,
            pxe: false,
            force_create: false,
            cloudinit_cdrom_storage: None,
            power: DesiredPower::Running,
            automatic_reboot: true,
            define_connection_info: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Scalar, expand_device_list};

    #[test]
    fn hotplug_tags_are_set_membership() {
        let mut config = VmConfig {
            hotplug: "network,disk,usb".into(),
            ..Default::default()
        };
        assert!(config.hotplug_enabled("disk"));
        assert!(config.hotplug_enabled("network"));
        assert!(!config.hotplug_enabled("memory"));

        config.hotplug = "".into();
        assert!(!config.hotplug_enabled("disk"));
    }

    #[test]
    fn cloudinit_detected_from_any_field() {
        let mut config = VmConfig::default();
        assert!(!config.has_cloudinit());
        config.ipconfig.insert(0, "ip=dhcp".into());
        assert!(config.has_cloudinit());
    }

    #[test]
    fn primary_mac_reads_slot_zero() {
        let mut row = DeviceRow::new();
        row.insert("model".into(), Scalar::Str("virtio".into()));
        row.insert("macaddr".into(), Scalar::Str("AA:BB:CC:DD:EE:FF".into()));
        let config = VmConfig {
            networks: expand_device_list(&[Some(row)]),
            ..Default::default()
        };
        assert_eq!(config.primary_mac(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(VmConfig::default().primary_mac(), None);
    }
}
