//! Resource addresses in Terraform's indexing syntax
//!
//! Addresses look like `module.eks.module.eks.aws_eks_cluster.this["primary"]`.
//! String keys are quoted with JSON string escaping, which is exactly what
//! Terraform prints for `for_each` keys, so decoding and re-encoding an
//! address is lossless.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::document::{ResourceRecord, StateDocument};

/// Instance discriminator for `count` (integer) and `for_each` (string) resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexKey {
    Int(i64),
    Str(String),
}

impl IndexKey {
    /// Bracketed address suffix, e.g. `[2]` or `["foo"]`
    pub fn to_suffix(&self) -> String {
        match self {
            IndexKey::Int(index) => format!("[{}]", index),
            IndexKey::Str(key) => format!("[{}]", quote(key)),
        }
    }

    /// Parse the text between the brackets of an address suffix
    pub fn parse(inner: &str) -> Option<Self> {
        if inner.starts_with('"') {
            return serde_json::from_str::<String>(inner).ok().map(IndexKey::Str);
        }

        inner.parse::<i64>().ok().map(IndexKey::Int)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Int(index) => write!(f, "{}", index),
            IndexKey::Str(key) => write!(f, "{}", key),
        }
    }
}

fn quote(key: &str) -> String {
    serde_json::to_string(key).unwrap_or_else(|_| format!("\"{}\"", key))
}

/// Whether a record describes a managed resource or a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    #[default]
    Managed,
    Data,
}

/// One `module.<name>[key]` step of a module path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleSegment {
    pub name: String,
    pub key: Option<IndexKey>,
}

impl fmt::Display for ModuleSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module.{}", self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{}", key.to_suffix())?;
        }
        Ok(())
    }
}

/// Canonical address of one resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceAddress {
    pub module: Vec<ModuleSegment>,
    pub mode: ResourceMode,
    pub resource_type: String,
    pub name: String,
    pub key: Option<IndexKey>,
}

impl ResourceAddress {
    /// Address without the instance key
    pub fn base_path(&self) -> String {
        let mut parts: Vec<String> = self.module.iter().map(|m| m.to_string()).collect();

        if self.mode == ResourceMode::Data {
            parts.push("data".to_string());
        }

        parts.push(self.resource_type.clone());
        parts.push(self.name.clone());
        parts.join(".")
    }

    /// Rendered module path (`module.a.module.b`), empty for the root module
    #[cfg(test)]
    pub fn module_path(&self) -> String {
        self.module
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Same resource, different instance key
    pub fn with_key(&self, key: Option<IndexKey>) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }

    /// Parse a canonical address string
    ///
    /// Returns `None` for anything that is not a complete resource address.
    pub fn parse(address: &str) -> Option<Self> {
        let segments = split_segments(address)?;
        let mut index = 0;

        let mut module = Vec::new();
        while index < segments.len() && segments[index] == ("module", None) {
            let (name, key) = segments.get(index + 1)?;
            module.push(ModuleSegment {
                name: name.to_string(),
                key: key.clone(),
            });
            index += 2;
        }

        let mut mode = ResourceMode::Managed;
        if segments.len() - index == 3 && segments[index] == ("data", None) {
            mode = ResourceMode::Data;
            index += 1;
        }

        if segments.len() - index != 2 {
            return None;
        }

        let (resource_type, type_key) = &segments[index];
        if type_key.is_some() {
            return None;
        }
        let (name, key) = &segments[index + 1];

        Some(Self {
            module,
            mode,
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            key: key.clone(),
        })
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encode_key(&self.base_path(), self.key.as_ref()))
    }
}

/// Append an instance key to a base path using Terraform's index syntax
pub fn encode_key(path: &str, key: Option<&IndexKey>) -> String {
    match key {
        Some(key) => format!("{}{}", path, key.to_suffix()),
        None => path.to_string(),
    }
}

/// Parse the `module` field of a state record into segments
///
/// A module string that does not parse is kept as a single opaque segment so
/// that it still renders back to the text stored in the document.
pub fn parse_module_path(module: &str) -> Vec<ModuleSegment> {
    if module.is_empty() {
        return Vec::new();
    }

    parse_segments_as_modules(module).unwrap_or_else(|| {
        vec![ModuleSegment {
            name: module.strip_prefix("module.").unwrap_or(module).to_string(),
            key: None,
        }]
    })
}

fn parse_segments_as_modules(module: &str) -> Option<Vec<ModuleSegment>> {
    let segments = split_segments(module)?;
    if segments.len() % 2 != 0 {
        return None;
    }

    segments
        .chunks(2)
        .map(|pair| match pair {
            [("module", None), (name, key)] => Some(ModuleSegment {
                name: name.to_string(),
                key: key.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Split an address on dots that sit outside brackets
fn split_segments(address: &str) -> Option<Vec<(&str, Option<IndexKey>)>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_brackets = false;
    let mut in_quotes = false;
    let mut escaped = false;

    for (pos, ch) in address.char_indices() {
        if in_quotes {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if in_brackets => in_quotes = true,
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets => in_brackets = false,
            '.' if !in_brackets => {
                segments.push(split_key(&address[start..pos])?);
                start = pos + 1;
            }
            _ => {}
        }
    }

    if in_brackets || in_quotes {
        return None;
    }

    segments.push(split_key(&address[start..])?);
    Some(segments)
}

fn split_key(segment: &str) -> Option<(&str, Option<IndexKey>)> {
    match segment.find('[') {
        Some(open) => {
            let inner = segment[open + 1..].strip_suffix(']')?;
            let name = &segment[..open];
            if name.is_empty() {
                return None;
            }
            Some((name, Some(IndexKey::parse(inner)?)))
        }
        None if segment.is_empty() => None,
        None => Some((segment, None)),
    }
}

/// Decode every instance address recorded in a document, in document order
///
/// Records without instances contribute their base address.
pub fn decode(document: &StateDocument) -> Vec<ResourceAddress> {
    let mut addresses = Vec::new();

    for record in &document.resources {
        let base = record_address(record);

        if record.instances.is_empty() {
            addresses.push(base);
            continue;
        }

        for instance in &record.instances {
            addresses.push(base.with_key(instance.index_key.clone()));
        }
    }

    addresses
}

/// Base address (no instance key) of a record
pub fn record_address(record: &ResourceRecord) -> ResourceAddress {
    ResourceAddress {
        module: record
            .module
            .as_deref()
            .map(parse_module_path)
            .unwrap_or_default(),
        mode: record.mode,
        resource_type: record.resource_type.clone(),
        name: record.name.clone(),
        key: None,
    }
}
