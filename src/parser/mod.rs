//! Vendor config parsing.
//!
//! A template is a JSON file describing line-oriented blocks to pull out of
//! CLI output; see [`engine::TemplateSpec`]. Parsers are addressed by template
//! id (the file name inside the templates directory).

pub mod engine;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::models::device_type;
use engine::{CompiledTemplate, TemplateSpec};

/// Errors raised while locating or loading a template
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("template file not found: {0}")]
    Missing(PathBuf),
    #[error("invalid template {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// Converts raw CLI text into structured data using a named template.
/// `Ok(None)` means the template matched nothing.
pub trait TemplateParser: Send + Sync {
    fn parse(&self, text: &str, template_id: &str) -> Result<Option<Value>, ParserError>;
}

/// Parser reading JSON templates from a directory on each call
#[derive(Debug, Clone)]
pub struct FileTemplateParser {
    dir: PathBuf,
}

impl FileTemplateParser {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load(&self, template_id: &str) -> Result<CompiledTemplate, ParserError> {
        let path = self.dir.join(template_id);
        if !path.is_file() {
            return Err(ParserError::Missing(path));
        }
        let invalid = |reason: String| ParserError::Invalid {
            id: template_id.to_string(),
            reason,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| invalid(e.to_string()))?;
        let spec: TemplateSpec = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        CompiledTemplate::compile(&spec).map_err(invalid)
    }
}

impl TemplateParser for FileTemplateParser {
    fn parse(&self, text: &str, template_id: &str) -> Result<Option<Value>, ParserError> {
        let template = self.load(template_id)?;
        tracing::debug!("Parsing {} bytes with template {} ({})", text.len(), template_id, template.name);
        Ok(template.parse(text))
    }
}

/// Vendor tag -> template id mapping, injected into the extractor
#[derive(Debug, Clone)]
pub struct TemplateMap {
    entries: HashMap<String, String>,
}

impl Default for TemplateMap {
    fn default() -> Self {
        let entries = [
            (device_type::HP_COMWARE, "h3c.json"),
            (device_type::F5, "f5.json"),
            (device_type::F5_BIGIP, "f5.json"),
        ]
        .into_iter()
        .map(|(tag, file)| (tag.to_string(), file.to_string()))
        .collect();
        Self { entries }
    }
}

impl TemplateMap {
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Defaults overlaid with `tag=file` pairs separated by commas.
    /// Malformed pairs are ignored with a warning.
    pub fn with_overrides(spec: &str) -> Self {
        let mut map = Self::default();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((tag, file)) if !tag.trim().is_empty() && !file.trim().is_empty() => {
                    map.insert(tag.trim(), file.trim());
                }
                _ => tracing::warn!("Ignoring malformed TEMPLATE_MAP entry: {}", pair),
            }
        }
        map
    }

    pub fn insert(&mut self, vendor_tag: &str, template_id: &str) {
        self.entries.insert(vendor_tag.to_string(), template_id.to_string());
    }

    pub fn get(&self, vendor_tag: &str) -> Option<&str> {
        self.entries.get(vendor_tag).map(String::as_str)
    }
}

/// Templates shipped with the crate
#[cfg(test)]
pub fn bundled_templates_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_map_defaults_and_overrides() {
        let map = TemplateMap::with_overrides("cisco_ios=ios.json, bogus, f5=f5_v2.json");
        assert_eq!(map.get("hp_comware"), Some("h3c.json"));
        assert_eq!(map.get("f5_bigip"), Some("f5.json"));
        assert_eq!(map.get("f5"), Some("f5_v2.json"));
        assert_eq!(map.get("cisco_ios"), Some("ios.json"));
        assert_eq!(map.get("bogus"), None);
    }

    #[test]
    fn test_missing_template_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parser = FileTemplateParser::new(dir.path());
        let err = parser.parse("text", "nope.json").unwrap_err();
        assert!(matches!(err, ParserError::Missing(_)));
    }

    #[test]
    fn test_invalid_template_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("broken.json"), "{not json").expect("write");
        let parser = FileTemplateParser::new(dir.path());
        let err = parser.parse("text", "broken.json").unwrap_err();
        assert!(matches!(err, ParserError::Invalid { .. }));
    }

    #[test]
    fn test_h3c_template() {
        let parser = FileTemplateParser::new(bundled_templates_dir());
        let text = "\
#
 sysname core-sw-01
#
interface GigabitEthernet1/0/1
 port link-mode bridge
 description to-access-01
 port link-type access
 port access vlan 10
 combo enable fiber
#
interface GigabitEthernet1/0/2
 port link-mode bridge
 shutdown
#
interface Vlan-interface10
 ip binding vpn-instance mgmt
 ip address 10.10.0.1 255.255.255.0
#
return";
        let parsed = parser.parse(text, "h3c.json").expect("parse").expect("data");
        assert_eq!(parsed["system"], json!({"hostname": "core-sw-01"}));
        let interfaces = parsed["interfaces"].as_array().expect("list");
        assert_eq!(interfaces.len(), 3);
        assert_eq!(
            interfaces[0],
            json!({
                "interface": "GigabitEthernet1/0/1",
                "type": "bridge",
                "description": "to-access-01",
                "mode": "access",
                "access_vlan": "10",
                "combo_type": "fiber",
                "enabled": true
            })
        );
        assert_eq!(interfaces[1]["enabled"], json!(false));
        assert_eq!(interfaces[2]["vrf"], json!("mgmt"));
        assert_eq!(interfaces[2]["ip_address"], json!("10.10.0.1"));
        assert_eq!(interfaces[2]["subnet_mask"], json!("255.255.255.0"));
    }

    #[test]
    fn test_f5_template_virtual_shapes() {
        let parser = FileTemplateParser::new(bundled_templates_dir());
        let text = "\
ltm virtual /Common/vs_web {
    destination /Common/192.0.2.100:443
    ip-protocol tcp
    mask 255.255.255.255
    persist {
        /Common/cookie_persist {
            default yes
        }
    }
    pool /Common/web_pool
    profiles {
        /Common/http_xff { }
        /Common/tcp { }
    }
    rules {
        /Common/redirect_https
    }
    source 0.0.0.0/0
    source-address-translation {
        pool /Common/snat_pool1
        type snat
    }
}";
        let parsed = parser.parse(text, "f5.json").expect("parse").expect("data");
        let vs = &parsed["virtuals"];
        assert_eq!(vs["name"], json!("/Common/vs_web"));
        assert_eq!(vs["vs_address"], json!("192.0.2.100"));
        assert_eq!(vs["vs_port"], json!("443"));
        assert_eq!(vs["protocol"], json!("tcp"));
        assert_eq!(vs["pool"], json!("/Common/web_pool"));
        assert_eq!(vs["snat_pool"], json!("/Common/snat_pool1"));
        assert_eq!(vs["snat_type"], json!("snat"));
        assert_eq!(vs["source"], json!("0.0.0.0/0"));
        assert_eq!(vs["persist"], json!({"name": "/Common/cookie_persist"}));
        assert_eq!(vs["rules"], json!({"name": "/Common/redirect_https"}));
        assert_eq!(
            vs["profiles"],
            json!([{"name": "/Common/http_xff"}, {"name": "/Common/tcp"}])
        );
    }
}
