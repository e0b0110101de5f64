//! Durable resource identity.
//!
//! The resource id string is the only artifact the caller persists across
//! operations, so encode/decode must round-trip exactly. Node-scoped
//! resources (VMs) use `<node>/<kind>/<vmid>`; cluster-scoped resources
//! (pools) use `<kind>/<id>`.

use std::fmt;
use std::str::FromStr;

use crate::error::RudderError;

/// Identity of a node-scoped resource: `<node>/<kind>/<vmid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub node: String,
    pub kind: String,
    pub vmid: u32,
}

impl ResourceId {
    pub fn new(node: impl Into<String>, kind: impl Into<String>, vmid: u32) -> Self {
        Self {
            node: node.into(),
            kind: kind.into(),
            vmid,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node, self.kind, self.vmid)
    }
}

impl FromStr for ResourceId {
    type Err = RudderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RudderError::MalformedId {
            id: s.to_string(),
            expected: "<node>/<kind>/<vmid>",
        };

        let mut parts = s.split('/');
        let node = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let kind = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let vmid = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        let vmid: u32 = vmid.parse().map_err(|_| malformed())?;
        Ok(ResourceId::new(node, kind, vmid))
    }
}

/// Identity of a cluster-scoped resource: `<kind>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterId {
    pub kind: String,
    pub id: String,
}

impl ClusterId {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl FromStr for ClusterId {
    type Err = RudderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RudderError::MalformedId {
            id: s.to_string(),
            expected: "<kind>/<id>",
        };

        let mut parts = s.split('/');
        let kind = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let id = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(ClusterId::new(kind, id))
    }
}
