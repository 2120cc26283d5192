//! Config extraction: vendor text -> structured record -> typed sub-entities.
//!
//! [`Extractor::extract`] runs the template parser for a vendor tag and
//! [`decompose`] flattens the result into rows. Neither touches storage;
//! persisting is done by `Store::record_snapshot`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::models::*;
use crate::parser::{ParserError, TemplateMap, TemplateParser};

/// Failures turning raw text into a structured record
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no template registered for vendor {0:?}")]
    UnsupportedVendor(String),
    #[error("template {template} for vendor {vendor:?} not found")]
    TemplateMissing { vendor: String, template: String },
    #[error("template {template} is invalid: {reason}")]
    TemplateInvalid { template: String, reason: String },
    #[error("template {template} produced no data")]
    ParseEmpty { template: String },
}

/// Two sub-entities of the same type share a name within one record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("duplicate {entity} {name:?} in one configuration")]
pub struct DecomposeConflict {
    pub entity: &'static str,
    pub name: String,
}

/// Maps vendor tags to templates and runs the parser
#[derive(Clone)]
pub struct Extractor {
    templates: TemplateMap,
    parser: Arc<dyn TemplateParser>,
}

impl Extractor {
    pub fn new(templates: TemplateMap, parser: Arc<dyn TemplateParser>) -> Self {
        Self { templates, parser }
    }

    pub fn extract(&self, raw_text: &str, vendor_tag: &str) -> Result<Value, ExtractError> {
        let template = self
            .templates
            .get(vendor_tag)
            .ok_or_else(|| ExtractError::UnsupportedVendor(vendor_tag.to_string()))?;

        let parsed = self.parser.parse(raw_text, template).map_err(|e| match e {
            ParserError::Missing(_) => ExtractError::TemplateMissing {
                vendor: vendor_tag.to_string(),
                template: template.to_string(),
            },
            ParserError::Invalid { reason, .. } => ExtractError::TemplateInvalid {
                template: template.to_string(),
                reason,
            },
        })?;

        match parsed {
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Null) => None,
            other => other,
        }
        .ok_or_else(|| ExtractError::ParseEmpty {
            template: template.to_string(),
        })
    }
}

/// A parser field that may be missing, one item, or a list of items
#[derive(Debug, Clone, Copy)]
pub enum RefField<'a> {
    Absent,
    Single(&'a Value),
    Many(&'a [Value]),
}

impl<'a> RefField<'a> {
    pub fn of(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::Object(map)) if map.is_empty() => Self::Absent,
            Some(Value::Array(items)) => Self::Many(items),
            Some(item) => Self::Single(item),
        }
    }

    pub fn items(&self) -> Vec<&'a Value> {
        match *self {
            Self::Absent => Vec::new(),
            Self::Single(item) => vec![item],
            Self::Many(items) => items.iter().collect(),
        }
    }

    /// Names in order. Items without a name are dropped.
    pub fn names(&self) -> Vec<String> {
        self.items().into_iter().filter_map(item_name).collect()
    }
}

/// `{"name": "x"}` and a bare `"x"` both name `x`
fn item_name(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => non_empty(s),
        Value::Object(map) => map.get("name").and_then(scalar),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(scalar)
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

/// Monitors come as "a and b" or as a list
fn monitors(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s.split(" and ").filter_map(non_empty).collect(),
        other => RefField::of(other).names(),
    }
}

/// Sub-entity rows of one structured record, not yet tied to a snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decomposition {
    pub interfaces: Vec<InterfaceRecord>,
    pub virtuals: Vec<VirtualServerRecord>,
    pub pools: Vec<PoolRecord>,
    pub nodes: Vec<NodeRecord>,
    pub profiles: Vec<TypedObjectRecord>,
    pub rules: Vec<RuleRecord>,
    pub persistence: Vec<TypedObjectRecord>,
    pub snat_pools: Vec<SnatPoolRecord>,
}

impl Decomposition {
    pub fn row_count(&self) -> usize {
        self.interfaces.len()
            + self.virtuals.len()
            + self.pools.len()
            + self.pools.iter().map(|p| p.members.len()).sum::<usize>()
            + self.nodes.len()
            + self.profiles.len()
            + self.rules.len()
            + self.persistence.len()
            + self.snat_pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Objects of a top-level collection that carry a name under `name_key`
fn named_objects<'a>(
    record: &'a Value,
    key: &str,
    name_key: &str,
) -> Vec<(String, &'a Map<String, Value>)> {
    RefField::of(record.get(key))
        .items()
        .into_iter()
        .filter_map(|item| {
            let map = item.as_object()?;
            match text(map, name_key) {
                Some(name) => Some((name, map)),
                None => {
                    tracing::warn!("Skipping {} entry without {}", key, name_key);
                    None
                }
            }
        })
        .collect()
}

fn ensure_unique<'a>(
    entity: &'static str,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<(), DecomposeConflict> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(DecomposeConflict {
                entity,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

/// Flatten a structured record into sub-entity rows.
///
/// Unknown and missing top-level keys are ignored. Duplicate names within one
/// entity type fail the whole record before anything is written.
pub fn decompose(record: &Value) -> Result<Decomposition, DecomposeConflict> {
    let mut out = Decomposition::default();

    for (name, map) in named_objects(record, "interfaces", "interface") {
        out.interfaces.push(InterfaceRecord {
            interface: name,
            description: text(map, "description"),
            enabled: flag(map, "enabled"),
            vrf: text(map, "vrf"),
            mode: text(map, "mode"),
            iface_type: text(map, "type"),
            access_vlan: text(map, "access_vlan"),
            combo_type: text(map, "combo_type"),
            ip_address: text(map, "ip_address"),
            subnet_mask: text(map, "subnet_mask"),
        });
    }
    ensure_unique("interface", out.interfaces.iter().map(|i| &i.interface))?;

    for (name, map) in named_objects(record, "virtuals", "name") {
        out.virtuals.push(VirtualServerRecord {
            name,
            vs_address: text(map, "vs_address"),
            vs_port: text(map, "vs_port"),
            mask: text(map, "mask"),
            protocol: text(map, "protocol"),
            source: text(map, "source"),
            pool: text(map, "pool"),
            snat_type: text(map, "snat_type"),
            snat_pool: text(map, "snat_pool"),
            persist: RefField::of(map.get("persist")).names(),
            profiles: RefField::of(map.get("profiles")).names(),
            rules: RefField::of(map.get("rules")).names(),
        });
    }
    ensure_unique("virtual server", out.virtuals.iter().map(|v| &v.name))?;

    for (name, map) in named_objects(record, "pools", "name") {
        let members = RefField::of(map.get("members"))
            .items()
            .into_iter()
            .filter_map(|m| {
                Some(PoolMemberRecord {
                    name: item_name(m)?,
                    address: m.as_object().and_then(|o| text(o, "address")),
                })
            })
            .collect();
        out.pools.push(PoolRecord {
            name,
            mode: text(map, "mode").unwrap_or_else(|| "round-robin".to_string()),
            monitors: monitors(map.get("monitors")),
            members,
        });
    }
    ensure_unique("pool", out.pools.iter().map(|p| &p.name))?;

    for (name, map) in named_objects(record, "nodes", "name") {
        out.nodes.push(NodeRecord {
            name,
            address: text(map, "address"),
        });
    }
    ensure_unique("node", out.nodes.iter().map(|n| &n.name))?;

    for (name, map) in named_objects(record, "profiles", "name") {
        out.profiles.push(TypedObjectRecord {
            name,
            kind: text(map, "type"),
            raw: Value::Object(map.clone()),
        });
    }
    ensure_unique("profile", out.profiles.iter().map(|p| &p.name))?;

    for (name, map) in named_objects(record, "rules", "name") {
        out.rules.push(RuleRecord {
            name,
            raw: Value::Object(map.clone()),
        });
    }
    ensure_unique("rule", out.rules.iter().map(|r| &r.name))?;

    for (name, map) in named_objects(record, "persistence", "name") {
        out.persistence.push(TypedObjectRecord {
            name,
            kind: text(map, "type"),
            raw: Value::Object(map.clone()),
        });
    }
    ensure_unique("persistence profile", out.persistence.iter().map(|p| &p.name))?;

    for (name, map) in named_objects(record, "snatpools", "name") {
        out.snat_pools.push(SnatPoolRecord {
            name,
            members: RefField::of(map.get("members")).names(),
        });
    }
    ensure_unique("snat pool", out.snat_pools.iter().map(|s| &s.name))?;

    Ok(out)
}
