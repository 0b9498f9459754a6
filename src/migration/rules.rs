//! Ordered path-rewrite rules
//!
//! A rule pairs a regular expression over the canonical address with a
//! [`Transform`] drawn from a small closed set. Rules are evaluated in
//! declaration order and the first matching rule decides the outcome.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::MigrationError;

/// How a matched address is rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Keep the address unchanged
    Passthrough,
    /// Replace the leading path `from` with `to`, keeping instance keys and the rest
    RenameSegment { from: String, to: String },
    /// Drop the instance key of `module` (`module.operator[0].x` -> `module.operator.x`)
    StripIndex { module: String },
    /// Move everything below `from` (and its instance key) under `to`.
    /// An empty `from` or `to` stands for the root module.
    Relocate { from: String, to: String },
    /// Leave the resource behind on purpose
    Skip,
}

enum Applied {
    Target(String),
    Skip,
}

impl Transform {
    /// Rewrite an address, or `None` if the address does not have the shape
    /// this transform expects
    fn apply(&self, address: &str) -> Option<Applied> {
        match self {
            Transform::Passthrough => Some(Applied::Target(address.to_string())),
            Transform::Skip => Some(Applied::Skip),
            Transform::RenameSegment { from, to } => {
                let rest = strip_path_prefix(address, from)?;
                Some(Applied::Target(format!("{}{}", to, rest)))
            }
            Transform::StripIndex { module } => {
                let rest = strip_path_prefix(address, module)?;
                let rest = skip_index(rest)?;
                rest.starts_with('.')
                    .then(|| Applied::Target(format!("{}{}", module, rest)))
            }
            Transform::Relocate { from, to } => {
                let rest = if from.is_empty() {
                    address
                } else {
                    let rest = strip_path_prefix(address, from)?;
                    let rest = if rest.starts_with('[') { skip_index(rest)? } else { rest };
                    rest.strip_prefix('.')?
                };

                if rest.is_empty() {
                    return None;
                }

                if to.is_empty() {
                    Some(Applied::Target(rest.to_string()))
                } else {
                    Some(Applied::Target(format!("{}.{}", to, rest)))
                }
            }
        }
    }
}

/// Remove `prefix` when it is followed by a segment boundary (`.` or `[`)
fn strip_path_prefix<'a>(address: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = address.strip_prefix(prefix)?;
    (rest.starts_with('.') || rest.starts_with('[')).then_some(rest)
}

/// Skip a leading `[...]` instance key, honoring quoted keys
fn skip_index(text: &str) -> Option<&str> {
    if !text.starts_with('[') {
        return None;
    }

    let mut in_quotes = false;
    let mut escaped = false;

    for (pos, ch) in text.char_indices().skip(1) {
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
            '"' => in_quotes = true,
            ']' => return Some(&text[pos + 1..]),
            _ => {}
        }
    }

    None
}

/// A single pattern/transform rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRule {
    /// Regular expression matched against the prefix-stripped address
    pub pattern: String,
    pub transform: Transform,
    pub description: String,
}

impl MigrationRule {
    pub fn new(pattern: &str, transform: Transform, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            transform,
            description: description.to_string(),
        }
    }
}

/// Outcome of evaluating an address against a rule set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A rule produced a new address
    Target { address: String, description: String },
    /// A rule matched and deliberately skips the resource
    Skipped { description: String },
    /// A rule matched but its transform does not fit the address
    Inapplicable { description: String },
    /// No rule matched
    Unmatched,
}

#[cfg(test)]
impl Resolution {
    pub fn target(&self) -> Option<&str> {
        match self {
            Resolution::Target { address, .. } => Some(address.as_str()),
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Resolution::Target { description, .. } | Resolution::Skipped { description } => {
                Some(description.as_str())
            }
            Resolution::Inapplicable { .. } | Resolution::Unmatched => None,
        }
    }
}

struct CompiledRule {
    regex: Regex,
    rule: MigrationRule,
}

/// Compiled, ordered rule list
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile rules, failing on the first invalid pattern
    pub fn new(rules: Vec<MigrationRule>) -> Result<Self, MigrationError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| MigrationError::InvalidRule {
                    pattern: rule.pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledRule { regex, rule })
            })
            .collect::<Result<Vec<_>, MigrationError>>()?;

        Ok(Self { rules })
    }

    /// Resolve an (already prefix-stripped) address
    ///
    /// Evaluation stops at the first rule whose pattern matches, even when
    /// its transform cannot rewrite the address.
    pub fn resolve(&self, address: &str) -> Resolution {
        let Some(compiled) = self.rules.iter().find(|c| c.regex.is_match(address)) else {
            return Resolution::Unmatched;
        };

        let description = compiled.rule.description.clone();
        match compiled.rule.transform.apply(address) {
            Some(Applied::Target(target)) => Resolution::Target {
                address: target,
                description,
            },
            Some(Applied::Skip) => Resolution::Skipped { description },
            None => Resolution::Inapplicable { description },
        }
    }
}

/// Rules for moving a Materialize deployment from the legacy AWS layout to
/// the modular one
pub fn default_rules() -> Vec<MigrationRule> {
    let mut rules = vec![
        MigrationRule::new(
            r"^module\.operator\[0\]\.",
            Transform::StripIndex {
                module: "module.operator".to_string(),
            },
            "Remove [0] index from operator module",
        ),
        MigrationRule::new(
            r"^module\.aws_lbc\[0\]\.",
            Transform::StripIndex {
                module: "module.aws_lbc".to_string(),
            },
            "Remove [0] index from aws_lbc module",
        ),
        // kubernetes_manifest became kubectl_manifest; the next apply adopts them
        MigrationRule::new(
            r"^module\.(certificates|cert_manager)\.kubernetes_manifest\.(self_signed_cluster_issuer|self_signed_root_ca_certificate|root_ca_cluster_issuer)\[0\]$",
            Transform::Skip,
            "Skip self-signed cert-manager manifest (resource kind changed, adopted on apply)",
        ),
        MigrationRule::new(
            r"^module\.certificates\.",
            Transform::RenameSegment {
                from: "module.certificates".to_string(),
                to: "module.cert_manager".to_string(),
            },
            "Rename certificates module to cert_manager",
        ),
        MigrationRule::new(
            r"^aws_iam_role\.materialize_s3$",
            Transform::Relocate {
                from: String::new(),
                to: "module.storage".to_string(),
            },
            "Move IAM role to storage module",
        ),
        MigrationRule::new(
            r"^aws_iam_role_policy\.materialize_s3$",
            Transform::Relocate {
                from: String::new(),
                to: "module.storage".to_string(),
            },
            "Move IAM role policy to storage module",
        ),
        MigrationRule::new(
            r"^module\.materialize_node_group\.",
            Transform::RenameSegment {
                from: "module.materialize_node_group".to_string(),
                to: "module.mz_node_group".to_string(),
            },
            "Rename materialize_node_group to mz_node_group",
        ),
        MigrationRule::new(
            r"^module\.eks\.module\.eks\.module\.eks_managed_node_group\[.+?\]\.",
            Transform::Relocate {
                from: "module.eks.module.eks.module.eks_managed_node_group".to_string(),
                to: "module.base_node_group.module.node_group".to_string(),
            },
            "Migrate EKS internal managed node group to base_node_group",
        ),
    ];

    for (resource, what) in [
        ("kubernetes_manifest\\.materialize_instances", "Materialize instance manifests"),
        (
            "data\\.kubernetes_resource\\.materialize_instances",
            "Materialize instance data sources",
        ),
        ("kubernetes_namespace\\.instance_namespaces", "instance namespaces"),
        ("kubernetes_secret\\.materialize_backends", "backend secrets"),
        ("kubernetes_job\\.db_init_job", "db init jobs"),
    ] {
        rules.push(MigrationRule::new(
            &format!(r"^module\.operator\.{}\[.+?\]$", resource),
            Transform::Relocate {
                from: "module.operator".to_string(),
                to: String::new(),
            },
            &format!("Move {} from operator to root", what),
        ));
    }

    rules.extend([
        MigrationRule::new(
            r"^module\.nlb\[.+",
            Transform::Passthrough,
            "Keep NLB module path unchanged",
        ),
        MigrationRule::new(
            r"^module\.operator\.helm_release\..+",
            Transform::Passthrough,
            "Keep operator helm releases unchanged",
        ),
        MigrationRule::new(
            r"^module\.aws_lbc\.helm_release\..+",
            Transform::Passthrough,
            "Keep AWS LBC helm release unchanged",
        ),
        MigrationRule::new(
            r"^module\.cert_manager\.helm_release\..+",
            Transform::Passthrough,
            "Keep cert-manager helm release unchanged",
        ),
        MigrationRule::new(
            r"^module\.(networking|eks|database|storage|operator|aws_lbc|cert_manager)\..+",
            Transform::Passthrough,
            "Keep module path unchanged",
        ),
        MigrationRule::new(
            r"^(.*\.)?data\..*$",
            Transform::Skip,
            "Skip data source (will be recreated)",
        ),
        MigrationRule::new(
            r"^aws_cloudwatch_log_group\.materialize\[.*\]$",
            Transform::Skip,
            "Skip old cloudwatch log group",
        ),
    ]);

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RuleSet {
        RuleSet::new(default_rules()).unwrap()
    }

    fn target(rules: &RuleSet, address: &str) -> Option<String> {
        rules.resolve(address).target().map(str::to_string)
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = RuleSet::new(vec![
            MigrationRule::new(r"^module\.a\.", Transform::Skip, "first"),
            MigrationRule::new(r"^module\.a\.", Transform::Passthrough, "second"),
        ])
        .unwrap();

        assert_eq!(
            rules.resolve("module.a.aws_vpc.main"),
            Resolution::Skipped {
                description: "first".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let rules = defaults();
        let address = "module.operator[0].helm_release.operator";
        assert_eq!(rules.resolve(address), rules.resolve(address));
    }

    #[test]
    fn test_skip_and_unmatched_are_distinguishable() {
        let rules = defaults();

        let skipped = rules.resolve("data.aws_ami.x");
        assert_eq!(skipped.target(), None);
        assert_eq!(skipped.description(), Some("Skip data source (will be recreated)"));

        let unmatched = rules.resolve("aws_s3_bucket.legacy");
        assert_eq!(unmatched, Resolution::Unmatched);
        assert_eq!(unmatched.description(), None);
    }

    #[test]
    fn test_strip_index() {
        let rules = defaults();
        assert_eq!(
            target(&rules, "module.operator[0].helm_release.materialize_operator"),
            Some("module.operator.helm_release.materialize_operator".to_string())
        );
        assert_eq!(
            target(&rules, "module.aws_lbc[0].aws_iam_role.lbc"),
            Some("module.aws_lbc.aws_iam_role.lbc".to_string())
        );
    }

    #[test]
    fn test_rename_segment_keeps_rest() {
        let rules = defaults();
        assert_eq!(
            target(&rules, "module.certificates.helm_release.cert_manager[0]"),
            Some("module.cert_manager.helm_release.cert_manager[0]".to_string())
        );
        assert_eq!(
            target(&rules, "module.materialize_node_group.aws_eks_node_group.this"),
            Some("module.mz_node_group.aws_eks_node_group.this".to_string())
        );
    }

    #[test]
    fn test_relocate_into_and_out_of_modules() {
        let rules = defaults();
        assert_eq!(
            target(&rules, "aws_iam_role.materialize_s3"),
            Some("module.storage.aws_iam_role.materialize_s3".to_string())
        );
        assert_eq!(
            target(
                &rules,
                "module.operator.kubernetes_namespace.instance_namespaces[\"team-a\"]"
            ),
            Some("kubernetes_namespace.instance_namespaces[\"team-a\"]".to_string())
        );
        assert_eq!(
            target(
                &rules,
                "module.operator.data.kubernetes_resource.materialize_instances[\"alpha\"]"
            ),
            Some("data.kubernetes_resource.materialize_instances[\"alpha\"]".to_string())
        );
        assert_eq!(
            target(
                &rules,
                "module.eks.module.eks.module.eks_managed_node_group[\"mz-system\"].aws_eks_node_group.this[0]"
            ),
            Some("module.base_node_group.module.node_group.aws_eks_node_group.this[0]".to_string())
        );
    }

    #[test]
    fn test_type_changed_manifests_are_skipped() {
        let rules = defaults();
        for address in [
            "module.cert_manager.kubernetes_manifest.self_signed_cluster_issuer[0]",
            "module.certificates.kubernetes_manifest.root_ca_cluster_issuer[0]",
        ] {
            let resolution = rules.resolve(address);
            assert!(matches!(resolution, Resolution::Skipped { .. }), "{}", address);
        }
    }

    #[test]
    fn test_nested_module_data_source_is_kept_under_known_module() {
        let rules = defaults();
        assert_eq!(
            target(&rules, "module.networking.data.aws_availability_zones.available"),
            Some("module.networking.data.aws_availability_zones.available".to_string())
        );
        assert!(matches!(
            rules.resolve("module.legacy.data.aws_caller_identity.current"),
            Resolution::Skipped { .. }
        ));
    }

    #[test]
    fn test_inapplicable_transform_stops_evaluation() {
        let rules = RuleSet::new(vec![
            MigrationRule::new(
                r"^module\.a",
                Transform::StripIndex {
                    module: "module.a".to_string(),
                },
                "strip",
            ),
            MigrationRule::new(r".*", Transform::Passthrough, "keep"),
        ])
        .unwrap();

        let resolution = rules.resolve("module.a.aws_vpc.main");
        assert_eq!(
            resolution,
            Resolution::Inapplicable {
                description: "strip".to_string()
            }
        );
        assert_eq!(resolution.target(), None);
    }

    #[test]
    fn test_mistyped_custom_rule_does_not_hand_over_to_defaults() {
        let mut all = vec![MigrationRule::new(
            r"^module\.legacy\.",
            Transform::RenameSegment {
                from: "module.legcy".to_string(),
                to: "module.compute".to_string(),
            },
            "Rename legacy module",
        )];
        all.extend(default_rules());
        let rules = RuleSet::new(all).unwrap();

        for address in ["module.legacy.aws_instance.bastion", "module.legacy.data.aws_ami.x"] {
            assert_eq!(
                rules.resolve(address),
                Resolution::Inapplicable {
                    description: "Rename legacy module".to_string()
                },
                "{}",
                address
            );
        }
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = RuleSet::new(vec![MigrationRule::new("(", Transform::Skip, "bad")]);
        assert!(matches!(result, Err(MigrationError::InvalidRule { .. })));
    }

    #[test]
    fn test_rules_deserialize_from_yaml() {
        let yaml = r#"
- pattern: '^module\.custom_module\.'
  transform:
    kind: rename_segment
    from: module.custom_module
    to: module.new_name
  description: Rename custom_module to new_name
- pattern: '^aws_instance\.bastion$'
  transform:
    kind: skip
  description: Bastion is retired
"#;
        let parsed: Vec<MigrationRule> = serde_yaml::from_str(yaml).unwrap();
        let rules = RuleSet::new(parsed).unwrap();

        assert_eq!(
            target(&rules, "module.custom_module.aws_vpc.main"),
            Some("module.new_name.aws_vpc.main".to_string())
        );
        assert_eq!(
            rules.resolve("aws_instance.bastion").description(),
            Some("Bastion is retired")
        );
    }
}
