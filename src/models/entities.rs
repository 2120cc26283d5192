use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

// ========== Decomposed records (no ids yet) ==========

/// Interface extracted from a switch/router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub interface: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub vrf: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "type")]
    pub iface_type: Option<String>,
    pub access_vlan: Option<String>,
    pub combo_type: Option<String>,
    pub ip_address: Option<String>,
    pub subnet_mask: Option<String>,
}

impl InterfaceRecord {
    /// Address in CIDR form, e.g. `10.0.0.1/24`, when ip and mask are both valid
    pub fn if_address(&self) -> Option<String> {
        let ip = self.ip_address.as_deref()?;
        let mask = self.subnet_mask.as_deref()?;
        cidr_address(ip, mask)
    }
}

/// LTM virtual server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualServerRecord {
    pub name: String,
    pub vs_address: Option<String>,
    pub vs_port: Option<String>,
    pub mask: Option<String>,
    pub protocol: Option<String>,
    pub source: Option<String>,
    pub pool: Option<String>,
    pub snat_type: Option<String>,
    pub snat_pool: Option<String>,
    pub persist: Vec<String>,
    pub profiles: Vec<String>,
    pub rules: Vec<String>,
}

/// LTM pool member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMemberRecord {
    pub name: String,
    pub address: Option<String>,
}

/// LTM pool with its members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub name: String,
    pub mode: String,
    pub monitors: Vec<String>,
    pub members: Vec<PoolMemberRecord>,
}

/// LTM node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub address: Option<String>,
}

/// Typed object keeping its full parsed form (profiles, persistence profiles)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedObjectRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub raw: serde_json::Value,
}

/// iRule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub name: String,
    pub raw: serde_json::Value,
}

/// SNAT pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnatPoolRecord {
    pub name: String,
    pub members: Vec<String>,
}

// ========== Stored rows ==========

/// Ownership columns shared by every stored sub-entity row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowOwner {
    pub id: i64,
    pub config_id: i64,
    pub device_id: i64,
    pub device_name: String,
}

/// A stored sub-entity row: ownership columns plus the record fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow<T> {
    #[serde(flatten)]
    pub owner: RowOwner,
    #[serde(flatten)]
    pub record: T,
}

/// Interface row with its derived CIDR address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceRow {
    #[serde(flatten)]
    pub owner: RowOwner,
    #[serde(flatten)]
    pub record: InterfaceRecord,
    pub if_address: Option<String>,
}

/// Query parameters shared by the sub-entity listings
#[derive(Debug, Default, Deserialize)]
pub struct EntityQuery {
    /// Snapshot id filter
    #[serde(default)]
    pub config: Option<i64>,
    /// Device id filter
    #[serde(default)]
    pub device: Option<i64>,
    /// Restrict to the latest snapshot of each device
    #[serde(default)]
    pub latest: bool,
    #[serde(default)]
    pub limit: Option<i32>,
    #[serde(default)]
    pub offset: Option<i32>,
}

impl EntityQuery {
    /// Clamp limit to [1, 1000] and offset to >= 0
    pub fn page(&self) -> (i32, i32) {
        let limit = self.limit.unwrap_or(100).clamp(1, 1000);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// Format `ip` with `mask` (dotted netmask or prefix length) as `ip/prefix`.
/// Returns None for invalid addresses or non-contiguous masks.
pub fn cidr_address(ip: &str, mask: &str) -> Option<String> {
    let ip: Ipv4Addr = ip.trim().parse().ok()?;
    let mask = mask.trim();
    let prefix = if let Ok(len) = mask.parse::<u32>() {
        if len > 32 {
            return None;
        }
        len
    } else {
        let bits = u32::from(mask.parse::<Ipv4Addr>().ok()?);
        let len = bits.leading_ones();
        if bits.checked_shl(len).unwrap_or(0) != 0 {
            return None;
        }
        len
    };
    Some(format!("{}/{}", ip, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_address() {
        assert_eq!(cidr_address("192.168.1.1", "255.255.255.0").as_deref(), Some("192.168.1.1/24"));
        assert_eq!(cidr_address("10.0.0.1", "255.255.255.255").as_deref(), Some("10.0.0.1/32"));
        assert_eq!(cidr_address("10.0.0.1", "0.0.0.0").as_deref(), Some("10.0.0.1/0"));
        assert_eq!(cidr_address("10.0.0.1", "16").as_deref(), Some("10.0.0.1/16"));
        assert_eq!(cidr_address("10.0.0.1", "255.0.255.0"), None);
        assert_eq!(cidr_address("10.0.0.1", "33"), None);
        assert_eq!(cidr_address("not-an-ip", "255.255.255.0"), None);
    }

    #[test]
    fn test_interface_if_address_requires_both_parts() {
        let mut iface = InterfaceRecord {
            interface: "Vlan-interface10".to_string(),
            ip_address: Some("10.1.1.1".to_string()),
            ..Default::default()
        };
        assert_eq!(iface.if_address(), None);
        iface.subnet_mask = Some("255.255.255.252".to_string());
        assert_eq!(iface.if_address().as_deref(), Some("10.1.1.1/30"));
    }
}
