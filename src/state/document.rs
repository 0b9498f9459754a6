use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use super::address::{self, IndexKey, ResourceAddress, ResourceMode};
use crate::traits::FileSystem;

/// A Terraform state document (format version 4)
///
/// Fields this tool does not interpret are kept in `extra` so that a pushed
/// document carries everything that was pulled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default = "default_serial")]
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u64 {
    4
}

fn default_serial() -> u64 {
    1
}

/// One `resource` or `data` block as recorded in state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub mode: ResourceMode,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_key: Option<IndexKey>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateDocument {
    /// The document a backend with no state yet would return
    pub fn empty() -> Self {
        Self {
            version: default_version(),
            terraform_version: Some("1.5.0".to_string()),
            serial: default_serial(),
            lineage: String::new(),
            outputs: Map::new(),
            resources: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Parse state JSON, treating blank or malformed input as an empty document
    pub fn parse_or_empty(text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::empty();
        }

        serde_json::from_str(text).unwrap_or_else(|_| Self::empty())
    }

    /// Load a state file; a missing or unreadable file is an empty document
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Self {
        if !fs.exists(path) {
            return Self::empty();
        }

        match fs.read_to_string(path) {
            Ok(text) => Self::parse_or_empty(&text),
            Err(_) => Self::empty(),
        }
    }

    /// Write the whole document in one write
    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        fs.write(path, &json)
            .with_context(|| format!("Failed to write state file: {}", path.display()))
    }

    /// Canonical addresses of every instance, in document order
    pub fn addresses(&self) -> Vec<ResourceAddress> {
        address::decode(self)
    }

    pub fn bump_serial(&mut self) {
        self.serial += 1;
    }

    /// Find the instance recorded at an address
    pub fn find_instance(&self, target: &ResourceAddress) -> Option<&Instance> {
        self.resources
            .iter()
            .filter(|record| record.is_at(target))
            .flat_map(|record| record.instances.iter())
            .find(|instance| instance.index_key == target.key)
    }

    /// Remove the instances at the given addresses
    ///
    /// Records emptied by the removal are dropped as well; records that had no
    /// instances to begin with are left alone. Returns how many instances
    /// were removed.
    pub fn remove_instances(&mut self, targets: &[ResourceAddress]) -> usize {
        let mut removed = 0;

        self.resources.retain_mut(|record| {
            let before = record.instances.len();
            if before == 0 {
                return true;
            }

            let base = record.address();
            record.instances.retain(|instance| {
                !targets
                    .iter()
                    .any(|t| record_matches(&base, t) && instance.index_key == t.key)
            });

            removed += before - record.instances.len();
            !record.instances.is_empty()
        });

        removed
    }
}

impl ResourceRecord {
    /// Base address of this record (no instance key)
    pub fn address(&self) -> ResourceAddress {
        address::record_address(self)
    }

    /// Whether this record holds the resource named by `target`, ignoring the key
    pub fn is_at(&self, target: &ResourceAddress) -> bool {
        record_matches(&self.address(), target)
    }

    /// Address of one of this record's instances
    pub fn instance_address(&self, instance: &Instance) -> ResourceAddress {
        self.address().with_key(instance.index_key.clone())
    }
}

impl Instance {
    /// Look up a dotted attribute path such as `vpc_config.0.cluster_security_group_id`
    ///
    /// Numeric segments index into lists. A JSON `null` is reported as absent.
    pub fn attribute(&self, path: &str) -> Option<&Value> {
        attribute_at(&self.attributes, path)
    }

    /// Whether the attribute is missing or null
    pub fn is_attribute_null(&self, path: &str) -> bool {
        self.attribute(path).is_none()
    }
}

/// Walk a dotted path through nested objects and lists
pub fn attribute_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    if current.is_null() { None } else { Some(current) }
}

fn record_matches(base: &ResourceAddress, target: &ResourceAddress) -> bool {
    base.module == target.module
        && base.mode == target.mode
        && base.resource_type == target.resource_type
        && base.name == target.name
}
