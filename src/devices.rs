//! Device collection transforms.
//!
//! Callers declare sub-resources (disks, NICs, PCI devices, serial ports)
//! as a positionally-ordered list; the remote API addresses them as a
//! slot-indexed map. `expand_device_list` and `flatten_device_map` convert
//! between the two. The slot index doubles as positional identity, so
//! ordering must survive every round-trip.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One scalar attribute value in a device row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Int(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Attribute mapping for one device.
pub type DeviceRow = BTreeMap<String, Scalar>;

/// Slot-indexed device collection as the remote API understands it.
/// `None` marks a slot that is known but not in use.
pub type DeviceMap = BTreeMap<u32, Option<DeviceRow>>;

/// Convert a positionally-ordered device list into a slot-indexed map.
///
/// Slot keys are the 0-based list positions. A `None` entry produces no
/// slot at all. Empty input yields an empty map, never an error.
pub fn expand_device_list(rows: &[Option<DeviceRow>]) -> DeviceMap {
    let mut map = DeviceMap::new();
    for (index, row) in rows.iter().enumerate() {
        if let Some(row) = row {
            map.insert(index as u32, Some(row.clone()));
        }
    }
    map
}

/// Inverse of `expand_device_list`: visit slots in ascending order and
/// collect the rows back into a list.
///
/// A `None` slot is "no device" and is silently skipped — it does not
/// produce a placeholder. This makes flatten a lossy inverse of expand
/// whenever empty slots exist; callers that round-trip must account for
/// the dropped positions.
pub fn flatten_device_map(map: &DeviceMap) -> Vec<DeviceRow> {
    map.values().flatten().cloned().collect()
}

/// Remove the named attribute keys from every row, in place.
///
/// Used to strip synthetic keys (typically `id`) that the backend reports
/// but that the list representation encodes as position instead.
pub fn drop_keys(keys: &[&str], rows: &mut [DeviceRow]) {
    for row in rows.iter_mut() {
        for key in keys {
            row.remove(*key);
        }
    }
}

/// Strip attribute keys the backend mishandles on config updates.
///
/// Sending `file` makes the backend detach the existing disk; sending
/// `media` duplicates the key and the request is rejected. This is a
/// backend quirk, applied only on the update path — never on create.
pub fn strip_disk_update_quirks(disks: &mut DeviceMap) {
    for row in disks.values_mut().flatten() {
        row.remove("file");
        row.remove("media");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Scalar)]) -> DeviceRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn expand_keys_by_position() {
        let disks = vec![
            Some(row(&[("size", "10G".into())])),
            Some(row(&[("size", "20G".into())])),
        ];
        let map = expand_device_list(&disks);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map[&1].as_ref().unwrap()["size"],
            Scalar::Str("20G".into())
        );
    }

    #[test]
    fn expand_empty_input_is_empty_map() {
        assert!(expand_device_list(&[]).is_empty());
    }

    #[test]
    fn flatten_reproduces_list_without_empty_slots() {
        let disks = vec![
            Some(row(&[("size", "10G".into())])),
            Some(row(&[("size", "20G".into())])),
        ];
        let map = expand_device_list(&disks);
        let back = flatten_device_map(&map);
        assert_eq!(back.len(), 2);
        assert_eq!(back[0]["size"], Scalar::Str("10G".into()));
        assert_eq!(back[1]["size"], Scalar::Str("20G".into()));
    }

    #[test]
    fn flatten_drops_exactly_the_empty_slots() {
        // Accepted asymmetry: an empty slot vanishes on flatten, shifting
        // the positions of everything after it.
        let mut map = DeviceMap::new();
        map.insert(0, Some(row(&[("size", "10G".into())])));
        map.insert(1, None);
        map.insert(2, Some(row(&[("size", "30G".into())])));
        let back = flatten_device_map(&map);
        assert_eq!(back.len(), 2);
        assert_eq!(back[1]["size"], Scalar::Str("30G".into()));
    }

    #[test]
    fn flatten_visits_slots_in_ascending_order() {
        let mut map = DeviceMap::new();
        map.insert(3, Some(row(&[("n", Scalar::Int(3))])));
        map.insert(0, Some(row(&[("n", Scalar::Int(0))])));
        let back = flatten_device_map(&map);
        assert_eq!(back[0]["n"], Scalar::Int(0));
        assert_eq!(back[1]["n"], Scalar::Int(3));
    }

    #[test]
    fn drop_keys_removes_from_every_row() {
        let mut rows = vec![
            row(&[("id", Scalar::Int(0)), ("size", "10G".into())]),
            row(&[("id", Scalar::Int(1)), ("size", "20G".into())]),
        ];
        drop_keys(&["id"], &mut rows);
        assert!(rows.iter().all(|r| !r.contains_key("id")));
        assert!(rows.iter().all(|r| r.contains_key("size")));
    }

    #[test]
    fn update_quirk_strip_removes_file_and_media_only() {
        let mut disks = expand_device_list(&[Some(row(&[
            ("file", "local:100/vm-100-disk-0.qcow2".into()),
            ("media", "disk".into()),
            ("size", "10G".into()),
        ]))]);
        strip_disk_update_quirks(&mut disks);
        let disk = disks[&0].as_ref().unwrap();
        assert!(!disk.contains_key("file"));
        assert!(!disk.contains_key("media"));
        assert!(disk.contains_key("size"));
    }
}
