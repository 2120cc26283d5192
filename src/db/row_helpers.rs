use sqlx::{sqlite::SqliteRow, Row};

use crate::models::*;

/// Filter empty strings to None (the DB may store '' instead of NULL)
pub fn none_if_empty(opt: Option<String>) -> Option<String> {
    opt.filter(|s| !s.is_empty())
}

/// Decode a JSON array column, tolerating bad data as empty
fn string_list(row: &SqliteRow, column: &str) -> Vec<String> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).unwrap_or_default()
}

fn json_value(row: &SqliteRow, column: &str) -> serde_json::Value {
    let raw: Option<String> = row.get(column);
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null)
}

/// Map a SQLite row to a Device struct
pub fn map_device_row(row: &SqliteRow) -> Device {
    Device {
        id: row.get("id"),
        hostname: row.get("hostname"),
        address: row.get("address"),
        username: row.get("username"),
        password: row.get("password"),
        device_type: row.get("device_type"),
        connect_failed_at: row.get("connect_failed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to a ConfigSnapshot struct
pub fn map_snapshot_row(row: &SqliteRow) -> ConfigSnapshot {
    let config_json: Option<String> = row.get("config_json");
    ConfigSnapshot {
        id: row.get("id"),
        device_id: row.get("device_id"),
        device: row.get("device"),
        config_text: row.get("config_text"),
        config_json: config_json.and_then(|s| serde_json::from_str(&s).ok()),
        parse_error: row.get("parse_error"),
        is_latest: row.get("is_latest"),
        time: row.get("created_at"),
    }
}

/// Ownership columns aliased by the entity listing queries
fn map_owner(row: &SqliteRow) -> RowOwner {
    RowOwner {
        id: row.get("id"),
        config_id: row.get("snapshot_id"),
        device_id: row.get("device_id"),
        device_name: row.get("device_name"),
    }
}

pub fn map_interface_row(row: &SqliteRow) -> InterfaceRow {
    let record = InterfaceRecord {
        interface: row.get("name"),
        description: none_if_empty(row.get("description")),
        enabled: row.get("enabled"),
        vrf: none_if_empty(row.get("vrf")),
        mode: none_if_empty(row.get("mode")),
        iface_type: none_if_empty(row.get("type")),
        access_vlan: none_if_empty(row.get("access_vlan")),
        combo_type: none_if_empty(row.get("combo_type")),
        ip_address: none_if_empty(row.get("ip_address")),
        subnet_mask: none_if_empty(row.get("subnet_mask")),
    };
    InterfaceRow {
        owner: map_owner(row),
        if_address: record.if_address(),
        record,
    }
}

pub fn map_virtual_row(row: &SqliteRow) -> EntityRow<VirtualServerRecord> {
    EntityRow {
        owner: map_owner(row),
        record: VirtualServerRecord {
            name: row.get("name"),
            vs_address: row.get("vs_address"),
            vs_port: row.get("vs_port"),
            mask: row.get("mask"),
            protocol: row.get("protocol"),
            source: row.get("source"),
            pool: row.get("pool"),
            snat_type: row.get("snat_type"),
            snat_pool: row.get("snat_pool"),
            persist: string_list(row, "persist"),
            profiles: string_list(row, "profiles"),
            rules: string_list(row, "rules"),
        },
    }
}

/// Members are attached separately
pub fn map_pool_row(row: &SqliteRow) -> EntityRow<PoolRecord> {
    EntityRow {
        owner: map_owner(row),
        record: PoolRecord {
            name: row.get("name"),
            mode: row.get("mode"),
            monitors: string_list(row, "monitors"),
            members: Vec::new(),
        },
    }
}

pub fn map_node_row(row: &SqliteRow) -> EntityRow<NodeRecord> {
    EntityRow {
        owner: map_owner(row),
        record: NodeRecord {
            name: row.get("name"),
            address: row.get("address"),
        },
    }
}

/// Profiles and persistence profiles share a layout
pub fn map_typed_object_row(row: &SqliteRow) -> EntityRow<TypedObjectRecord> {
    EntityRow {
        owner: map_owner(row),
        record: TypedObjectRecord {
            name: row.get("name"),
            kind: row.get("type"),
            raw: json_value(row, "raw"),
        },
    }
}

pub fn map_rule_row(row: &SqliteRow) -> EntityRow<RuleRecord> {
    EntityRow {
        owner: map_owner(row),
        record: RuleRecord {
            name: row.get("name"),
            raw: json_value(row, "raw"),
        },
    }
}

pub fn map_snat_pool_row(row: &SqliteRow) -> EntityRow<SnatPoolRecord> {
    EntityRow {
        owner: map_owner(row),
        record: SnatPoolRecord {
            name: row.get("name"),
            members: string_list(row, "members"),
        },
    }
}
