//! Import directives for resources that exist live but not in state
//!
//! Recipes are plain data. Identifiers are synthesized from attributes of
//! resources that were already relocated, so `prepare` only reads the
//! document and must run before commit; `run` issues the imports and must
//! run after it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::backend::{ImportStatus, StateBackend};
use crate::state::{ResourceAddress, StateDocument};
use crate::traits::Output;

/// A dotted attribute on one instance of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub address: String,
    pub attribute: String,
}

impl AttributeRef {
    pub fn new(address: &str, attribute: &str) -> Self {
        Self {
            address: address.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Current string value of the attribute, if the instance and value exist
    pub fn resolve(&self, document: &StateDocument) -> Option<String> {
        let address = ResourceAddress::parse(&self.address)?;
        document
            .find_instance(&address)?
            .attribute(&self.attribute)?
            .as_str()
            .map(str::to_string)
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.attribute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

/// Where a security group rule lets traffic come from (or go to)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Cidr(String),
    Group(AttributeRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportRecipe {
    /// Import a rule that is missing from state
    SecurityGroupRule {
        target: String,
        group: AttributeRef,
        direction: Direction,
        protocol: String,
        from_port: i64,
        to_port: i64,
        source: RuleSource,
        #[serde(default)]
        description: Option<String>,
    },
    /// Detect a relocated rule whose source group no longer matches
    StaleSecurityGroupRule {
        target: String,
        source: AttributeRef,
        direction: Direction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    pub address: String,
    pub id: String,
    pub description: String,
}

/// A local rule instance pointing at an outdated source group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleRule {
    pub address: ResourceAddress,
    pub group_id: String,
    pub rule_id: String,
    pub direction: Direction,
}

/// Stale rules found in a document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaleScan {
    pub rules: Vec<StaleRule>,
    /// Outdated rules that cannot be revoked (bad target or no rule id)
    pub unrevocable: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StaleOutcome {
    pub revoked: usize,
    pub failed: usize,
}

/// Directives ready to run, plus recipes that could not be resolved
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportPlan {
    pub directives: Vec<ImportDirective>,
    pub unresolved: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: usize,
    pub already_managed: usize,
    pub failed: usize,
    /// Recipes dropped before running because a reference was missing
    pub unresolved: usize,
}

impl ImportOutcome {
    pub fn succeeded(&self) -> usize {
        self.imported + self.already_managed
    }
}

pub struct ImportResolver<'a> {
    recipes: &'a [ImportRecipe],
}

impl<'a> ImportResolver<'a> {
    pub fn new(recipes: &'a [ImportRecipe]) -> Self {
        Self { recipes }
    }

    /// Find relocated rules whose source group id is out of date
    pub fn find_stale(&self, document: &StateDocument, output: &dyn Output) -> StaleScan {
        let mut scan = StaleScan::default();

        for recipe in self.recipes {
            let ImportRecipe::StaleSecurityGroupRule {
                target,
                source,
                direction,
            } = recipe
            else {
                continue;
            };

            let Some(address) = ResourceAddress::parse(target) else {
                output.warning(&format!("Invalid import target address: {}", target));
                scan.unrevocable += 1;
                continue;
            };
            let Some(instance) = document.find_instance(&address) else {
                continue;
            };
            let Some(current) = source.resolve(document) else {
                output.dimmed(&format!("  Cannot resolve {}, skipping stale check", source));
                continue;
            };

            let recorded = instance
                .attribute("source_security_group_id")
                .and_then(|v| v.as_str());
            if recorded.is_none_or(|recorded| recorded == current) {
                continue;
            }

            let group_id = instance.attribute("security_group_id").and_then(|v| v.as_str());
            let rule_id = instance
                .attribute("security_group_rule_id")
                .and_then(|v| v.as_str());

            match (group_id, rule_id) {
                (Some(group_id), Some(rule_id)) => scan.rules.push(StaleRule {
                    address,
                    group_id: group_id.to_string(),
                    rule_id: rule_id.to_string(),
                    direction: *direction,
                }),
                _ => {
                    output.warning(&format!(
                        "{} references an outdated source group but has no rule id to revoke",
                        address
                    ));
                    scan.unrevocable += 1;
                }
            }
        }

        scan
    }

    /// Build import directives for rules absent from the document
    pub fn prepare(&self, document: &StateDocument, output: &dyn Output) -> ImportPlan {
        let present: Vec<String> = document
            .addresses()
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut plan = ImportPlan::default();

        for recipe in self.recipes {
            let ImportRecipe::SecurityGroupRule {
                target,
                group,
                direction,
                protocol,
                from_port,
                to_port,
                source,
                description,
            } = recipe
            else {
                continue;
            };

            if present.contains(target) {
                output.dimmed(&format!("  Already in state: {}", target));
                continue;
            }

            let Some(group_id) = group.resolve(document) else {
                output.warning(&format!("Cannot import {}: {} not found", target, group));
                plan.unresolved += 1;
                continue;
            };

            let source_value = match source {
                RuleSource::Cidr(cidr) => cidr.clone(),
                RuleSource::Group(reference) => match reference.resolve(document) {
                    Some(id) => id,
                    None => {
                        output.warning(&format!(
                            "Cannot import {}: {} not found",
                            target, reference
                        ));
                        plan.unresolved += 1;
                        continue;
                    }
                },
            };

            let id = format!(
                "{}_{}_{}_{}_{}_{}",
                group_id, direction, protocol, from_port, to_port, source_value
            );
            output.info(&format!("Queued import: {}", target));
            output.dimmed(&format!("  ↳ {}", id));

            plan.directives.push(ImportDirective {
                address: target.clone(),
                id,
                description: description
                    .clone()
                    .unwrap_or_else(|| format!("{} security group rule", direction)),
            });
        }

        plan
    }

    /// Issue imports; each failure is counted and logged, never fatal
    pub fn run(
        directives: &[ImportDirective],
        backend: &dyn StateBackend,
        dir: &Path,
        output: &dyn Output,
    ) -> ImportOutcome {
        let mut outcome = ImportOutcome::default();

        for directive in directives {
            let result: Result<ImportStatus> =
                backend.import(dir, &directive.address, &directive.id);

            match result {
                Ok(ImportStatus::Imported) => {
                    output.success(&format!("Imported {}", directive.address));
                    outcome.imported += 1;
                }
                Ok(ImportStatus::AlreadyManaged) => {
                    output.success(&format!("Already managed: {}", directive.address));
                    outcome.already_managed += 1;
                }
                Err(e) => {
                    output.error(&format!("Failed to import {}: {}", directive.address, e));
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

const DATABASE_GROUP: &str = "module.database.aws_security_group.database";
const CLUSTER: &str = "module.eks.module.eks.aws_eks_cluster.this[0]";
const CLUSTER_GROUP_ATTRIBUTE: &str = "vpc_config.0.cluster_security_group_id";
const NODE_GROUP: &str = "module.eks.module.eks.aws_security_group.node[0]";

/// Database security group rules that live outside the old state
pub fn default_recipes() -> Vec<ImportRecipe> {
    let postgres_from = |name: &str, source: AttributeRef, description: &str| {
        ImportRecipe::SecurityGroupRule {
            target: format!("module.database.aws_security_group_rule.{}", name),
            group: AttributeRef::new(DATABASE_GROUP, "id"),
            direction: Direction::Ingress,
            protocol: "tcp".to_string(),
            from_port: 5432,
            to_port: 5432,
            source: RuleSource::Group(source),
            description: Some(description.to_string()),
        }
    };

    vec![
        ImportRecipe::StaleSecurityGroupRule {
            target: "module.database.aws_security_group_rule.eks_cluster_postgres_ingress"
                .to_string(),
            source: AttributeRef::new(CLUSTER, CLUSTER_GROUP_ATTRIBUTE),
            direction: Direction::Ingress,
        },
        ImportRecipe::StaleSecurityGroupRule {
            target: "module.database.aws_security_group_rule.eks_nodes_postgres_ingress"
                .to_string(),
            source: AttributeRef::new(NODE_GROUP, "id"),
            direction: Direction::Ingress,
        },
        ImportRecipe::SecurityGroupRule {
            target: "module.database.aws_security_group_rule.allow_all_egress".to_string(),
            group: AttributeRef::new(DATABASE_GROUP, "id"),
            direction: Direction::Egress,
            protocol: "all".to_string(),
            from_port: 0,
            to_port: 65536,
            source: RuleSource::Cidr("0.0.0.0/0".to_string()),
            description: Some("Database egress to anywhere".to_string()),
        },
        postgres_from(
            "eks_cluster_postgres_ingress",
            AttributeRef::new(CLUSTER, CLUSTER_GROUP_ATTRIBUTE),
            "Postgres from the EKS cluster security group",
        ),
        postgres_from(
            "eks_nodes_postgres_ingress",
            AttributeRef::new(NODE_GROUP, "id"),
            "Postgres from the EKS node security group",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TerraformCli;
    use crate::traits::{MockCommandExecutor, MockCommandResult, MockOutput};
    use serde_json::json;
    use std::sync::Arc;

    fn document(with_rules: bool) -> StateDocument {
        let mut resources = vec![
            json!({
                "module": "module.database",
                "mode": "managed",
                "type": "aws_security_group",
                "name": "database",
                "instances": [ { "attributes": { "id": "sg-db" } } ]
            }),
            json!({
                "module": "module.eks.module.eks",
                "mode": "managed",
                "type": "aws_eks_cluster",
                "name": "this",
                "instances": [ {
                    "index_key": 0,
                    "attributes": { "vpc_config": [ { "cluster_security_group_id": "sg-cluster" } ] }
                } ]
            }),
            json!({
                "module": "module.eks.module.eks",
                "mode": "managed",
                "type": "aws_security_group",
                "name": "node",
                "instances": [ { "index_key": 0, "attributes": { "id": "sg-node" } } ]
            }),
        ];

        if with_rules {
            resources.push(json!({
                "module": "module.database",
                "mode": "managed",
                "type": "aws_security_group_rule",
                "name": "eks_nodes_postgres_ingress",
                "instances": [ { "attributes": {
                    "security_group_id": "sg-db",
                    "security_group_rule_id": "sgr-123",
                    "source_security_group_id": "sg-old-node"
                } } ]
            }));
            resources.push(json!({
                "module": "module.database",
                "mode": "managed",
                "type": "aws_security_group_rule",
                "name": "eks_cluster_postgres_ingress",
                "instances": [ { "attributes": {
                    "security_group_id": "sg-db",
                    "security_group_rule_id": "sgr-456",
                    "source_security_group_id": "sg-cluster"
                } } ]
            }));
        }

        StateDocument::parse_or_empty(
            &json!({ "version": 4, "serial": 1, "lineage": "l", "resources": resources })
                .to_string(),
        )
    }

    #[test]
    fn test_attribute_ref_walks_nested_lists() {
        let doc = document(false);
        let reference = AttributeRef::new(CLUSTER, CLUSTER_GROUP_ATTRIBUTE);
        assert_eq!(reference.resolve(&doc), Some("sg-cluster".to_string()));
        assert_eq!(AttributeRef::new("aws_vpc.missing", "id").resolve(&doc), None);
    }

    #[test]
    fn test_prepare_builds_aws_rule_identifiers() {
        let doc = document(false);
        let recipes = default_recipes();
        let output = MockOutput::new();

        let plan = ImportResolver::new(&recipes).prepare(&doc, &output);
        let directives = plan.directives;

        let ids: Vec<&str> = directives.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "sg-db_egress_all_0_65536_0.0.0.0/0",
                "sg-db_ingress_tcp_5432_5432_sg-cluster",
                "sg-db_ingress_tcp_5432_5432_sg-node",
            ]
        );
        assert_eq!(
            directives[0].address,
            "module.database.aws_security_group_rule.allow_all_egress"
        );
    }

    #[test]
    fn test_prepare_skips_targets_already_in_state() {
        let doc = document(true);
        let recipes = default_recipes();
        let output = MockOutput::new();

        let plan = ImportResolver::new(&recipes).prepare(&doc, &output);

        assert_eq!(plan.directives.len(), 1);
        assert!(plan.directives[0].address.ends_with("allow_all_egress"));
        assert_eq!(plan.unresolved, 0);
    }

    #[test]
    fn test_prepare_unresolvable_group_logs_and_continues() {
        let doc = StateDocument::empty();
        let recipes = default_recipes();
        let output = MockOutput::new();

        let plan = ImportResolver::new(&recipes).prepare(&doc, &output);

        assert!(plan.directives.is_empty());
        assert_eq!(plan.unresolved, 3);
        assert_eq!(output.get_warnings().len(), 3);
    }

    #[test]
    fn test_find_stale_reports_outdated_source_only() {
        let doc = document(true);
        let recipes = default_recipes();
        let output = MockOutput::new();

        let scan = ImportResolver::new(&recipes).find_stale(&doc, &output);
        let stale = &scan.rules;

        assert_eq!(scan.unrevocable, 0);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].group_id, "sg-db");
        assert_eq!(stale[0].rule_id, "sgr-123");
        assert_eq!(stale[0].direction, Direction::Ingress);
        assert_eq!(
            stale[0].address.to_string(),
            "module.database.aws_security_group_rule.eks_nodes_postgres_ingress"
        );
    }

    #[test]
    fn test_find_stale_counts_rules_without_rule_id() {
        let mut doc = document(false);
        doc.resources.extend(
            document(true)
                .resources
                .into_iter()
                .filter(|r| r.name == "eks_nodes_postgres_ingress"),
        );
        doc.resources[3].instances[0]
            .attributes
            .as_object_mut()
            .unwrap()
            .remove("security_group_rule_id");
        let recipes = default_recipes();
        let output = MockOutput::new();

        let scan = ImportResolver::new(&recipes).find_stale(&doc, &output);

        assert!(scan.rules.is_empty());
        assert_eq!(scan.unrevocable, 1);
        assert_eq!(output.get_warnings().len(), 1);
    }

    #[test]
    fn test_run_counts_each_result_independently() {
        let command = Arc::new(MockCommandExecutor::with_outputs(vec![
            MockCommandResult::failed(
                "terraform import a.one",
                1,
                "Error: Resource already managed by Terraform",
            ),
            MockCommandResult::failed("terraform import a.two", 1, "Error: not found"),
        ]));
        let backend = TerraformCli::new("terraform", command.clone());
        let output = MockOutput::new();
        let directives = ["a.one", "a.two", "a.three"]
            .iter()
            .map(|address| ImportDirective {
                address: address.to_string(),
                id: "sg-1".to_string(),
                description: String::new(),
            })
            .collect::<Vec<_>>();

        let outcome = ImportResolver::run(&directives, &backend, Path::new("/new"), &output);

        assert_eq!(
            outcome,
            ImportOutcome {
                imported: 1,
                already_managed: 1,
                failed: 1,
                unresolved: 0
            }
        );
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(command.calls().len(), 3);
    }

    #[test]
    fn test_recipe_from_yaml() {
        let yaml = r#"
kind: security_group_rule
target: module.db.aws_security_group_rule.https
group: { address: module.db.aws_security_group.this, attribute: id }
direction: ingress
protocol: tcp
from_port: 443
to_port: 443
source: { cidr: 10.0.0.0/16 }
"#;
        let recipe: ImportRecipe = serde_yaml::from_str(yaml).unwrap();
        let ImportRecipe::SecurityGroupRule { source, description, .. } = recipe else {
            panic!("unexpected recipe kind");
        };
        assert_eq!(source, RuleSource::Cidr("10.0.0.0/16".to_string()));
        assert_eq!(description, None);
    }
}
