//! Post-move key normalization
//!
//! Two `for_each` collections can describe the same set of things with
//! different keys: one keyed by an internal name, the other by a label that
//! is visible on the first one's attributes. This pass rewrites the second
//! collection's keys to the internal names.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::state::{IndexKey, ResourceRecord, StateDocument};
use crate::traits::Output;

/// Which collections to reconcile and where the label lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNormalization {
    /// Module holding both collections, `None` for the root module
    #[serde(default)]
    pub module: Option<String>,
    pub reference_type: String,
    pub reference_name: String,
    /// Dotted attribute path to the label on reference instances
    pub label_path: String,
    pub dependent_type: String,
    pub dependent_name: String,
}

impl Default for KeyNormalization {
    fn default() -> Self {
        Self {
            module: None,
            reference_type: "kubernetes_manifest".to_string(),
            reference_name: "materialize_instances".to_string(),
            label_path: "manifest.metadata.namespace".to_string(),
            dependent_type: "kubernetes_namespace".to_string(),
            dependent_name: "instance_namespaces".to_string(),
        }
    }
}

impl KeyNormalization {
    fn selects(&self, record: &ResourceRecord, resource_type: &str, name: &str) -> bool {
        record.module.as_deref() == self.module.as_deref()
            && record.resource_type == resource_type
            && record.name == name
    }

    /// Read the label, also looking behind a `value` wrapper on the first attribute
    fn label(&self, attributes: &serde_json::Value) -> Option<String> {
        let direct = crate::state::document::attribute_at(attributes, &self.label_path);
        let wrapped = || {
            let (head, tail) = self.label_path.split_once('.')?;
            crate::state::document::attribute_at(attributes, &format!("{}.value.{}", head, tail))
        };

        direct
            .or_else(wrapped)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// What a normalization pass changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub mappings: usize,
    pub renamed: usize,
    pub dropped: usize,
}

#[cfg(test)]
impl NormalizeOutcome {
    pub fn changed(&self) -> bool {
        self.renamed > 0 || self.dropped > 0
    }
}

/// Rewrite dependent keys from labels to internal names
///
/// An instance whose target key is already taken is dropped instead of
/// overwriting the existing one. The caller owns the serial bump and the
/// single write of the document.
pub fn normalize(
    document: &mut StateDocument,
    descriptor: &KeyNormalization,
    output: &dyn Output,
) -> NormalizeOutcome {
    let mut label_to_key: HashMap<String, IndexKey> = HashMap::new();

    for record in document
        .resources
        .iter()
        .filter(|r| descriptor.selects(r, &descriptor.reference_type, &descriptor.reference_name))
    {
        for instance in &record.instances {
            let label = descriptor.label(&instance.attributes);
            let (Some(key), Some(label)) = (&instance.index_key, label) else {
                continue;
            };

            output.dimmed(&format!("Detected mapping: '{}' -> '{}'", label, key));
            label_to_key.insert(label, key.clone());
        }
    }

    let mut outcome = NormalizeOutcome {
        mappings: label_to_key.len(),
        ..Default::default()
    };

    if label_to_key.is_empty() {
        output.dimmed("No key mappings found (already normalized or not applicable)");
        return outcome;
    }

    for record in document
        .resources
        .iter_mut()
        .filter(|r| descriptor.selects(r, &descriptor.dependent_type, &descriptor.dependent_name))
    {
        let targets: Vec<Option<IndexKey>> = record
            .instances
            .iter()
            .map(|instance| match &instance.index_key {
                Some(IndexKey::Str(current)) => label_to_key
                    .get(current)
                    .filter(|target| **target != IndexKey::Str(current.clone()))
                    .cloned(),
                _ => None,
            })
            .collect();

        // Keys held by instances that stay put; renames claim theirs in order
        let mut taken: HashSet<IndexKey> = record
            .instances
            .iter()
            .zip(&targets)
            .filter(|(_, target)| target.is_none())
            .filter_map(|(instance, _)| instance.index_key.clone())
            .collect();
        let base = record.address();
        let instances = std::mem::take(&mut record.instances);
        let mut kept = Vec::with_capacity(instances.len());

        for (mut instance, target) in instances.into_iter().zip(targets) {
            if let Some(target) = target {
                let from = base.with_key(instance.index_key.clone());
                let to = base.with_key(Some(target.clone()));

                if !taken.insert(target.clone()) {
                    output.warning(&format!(
                        "Dropping {} (target key already exists at {})",
                        from, to
                    ));
                    outcome.dropped += 1;
                    continue;
                }

                output.info(&format!("→ {}", from));
                output.dimmed(&format!("  ↳ {}", to));
                instance.index_key = Some(target);
                outcome.renamed += 1;
            }

            kept.push(instance);
        }

        record.instances = kept;
    }

    outcome
}
