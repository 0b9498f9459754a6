//! Detection of instances that will break the next apply
//!
//! Detection is one pure function returning findings. What happens to the
//! findings is decided by a [`ScrubStrategy`]: purge them from the document
//! or only report them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::{ResourceAddress, StateDocument};
use crate::traits::Output;

/// Instances of `resource_type` must have every attribute in `required` set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAttributes {
    pub resource_type: String,
    pub required: Vec<String>,
}

/// Resources that exist in the cloud account but were never in the old
/// state; keeping the moved copies makes apply fail with duplicate errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreexistingLive {
    pub resource_type: String,
    /// Module path the record must sit in (`module.database`)
    pub module: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubConfig {
    #[serde(default = "default_required")]
    pub required_attributes: Vec<RequiredAttributes>,
    #[serde(default = "default_preexisting")]
    pub preexisting: Vec<PreexistingLive>,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            required_attributes: default_required(),
            preexisting: default_preexisting(),
        }
    }
}

fn default_required() -> Vec<RequiredAttributes> {
    ["aws_eks_access_entry", "aws_eks_access_policy_association"]
        .into_iter()
        .map(|resource_type| RequiredAttributes {
            resource_type: resource_type.to_string(),
            required: vec!["cluster_name".to_string(), "principal_arn".to_string()],
        })
        .collect()
}

fn default_preexisting() -> Vec<PreexistingLive> {
    vec![PreexistingLive {
        resource_type: "aws_security_group_rule".to_string(),
        module: "module.database".to_string(),
        names: vec![
            "allow_all_egress".to_string(),
            "eks_cluster_postgres_ingress".to_string(),
            "eks_nodes_postgres_ingress".to_string(),
        ],
    }]
}

/// Why an instance was flagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingCause {
    /// Required attributes are missing or null
    NullAttributes(Vec<String>),
    /// Known to already exist in the live account
    PreexistingLive,
}

impl fmt::Display for FindingCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingCause::NullAttributes(attrs) => {
                write!(f, "null required attributes: {}", attrs.join(", "))
            }
            FindingCause::PreexistingLive => {
                write!(f, "already exists in the live account")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub address: ResourceAddress,
    pub cause: FindingCause,
}

/// Scan the document for flagged instances
///
/// `include_preexisting` enables the live-duplicate patterns, which only the
/// purging strategy acts on.
pub fn detect(
    document: &StateDocument,
    config: &ScrubConfig,
    include_preexisting: bool,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for record in &document.resources {
        for check in config
            .required_attributes
            .iter()
            .filter(|c| c.resource_type == record.resource_type)
        {
            for instance in &record.instances {
                let missing: Vec<String> = check
                    .required
                    .iter()
                    .filter(|attr| instance.is_attribute_null(attr))
                    .cloned()
                    .collect();

                if !missing.is_empty() {
                    findings.push(Finding {
                        address: record.instance_address(instance),
                        cause: FindingCause::NullAttributes(missing),
                    });
                }
            }
        }

        if !include_preexisting {
            continue;
        }

        let preexisting = config.preexisting.iter().any(|p| {
            p.resource_type == record.resource_type
                && record.module.as_deref() == Some(p.module.as_str())
                && p.names.contains(&record.name)
        });

        if preexisting {
            for instance in &record.instances {
                findings.push(Finding {
                    address: record.instance_address(instance),
                    cause: FindingCause::PreexistingLive,
                });
            }
        }
    }

    findings
}

/// What to do with findings
pub trait ScrubStrategy {
    /// Whether live-duplicate patterns are part of detection
    fn includes_preexisting(&self) -> bool;

    /// Act on the findings; returns the number of instances removed
    fn apply(&self, document: &mut StateDocument, findings: &[Finding], output: &dyn Output)
    -> usize;
}

/// Remove flagged instances (and records they leave empty)
pub struct PurgeFindings;

impl ScrubStrategy for PurgeFindings {
    fn includes_preexisting(&self) -> bool {
        true
    }

    fn apply(
        &self,
        document: &mut StateDocument,
        findings: &[Finding],
        output: &dyn Output,
    ) -> usize {
        for finding in findings {
            output.warning(&format!("Removing {} ({})", finding.address, finding.cause));
        }

        let targets: Vec<ResourceAddress> = findings.iter().map(|f| f.address.clone()).collect();
        document.remove_instances(&targets)
    }
}

/// Report flagged instances without touching the document
pub struct ReportFindings;

impl ScrubStrategy for ReportFindings {
    fn includes_preexisting(&self) -> bool {
        false
    }

    fn apply(
        &self,
        _document: &mut StateDocument,
        findings: &[Finding],
        output: &dyn Output,
    ) -> usize {
        for finding in findings {
            output.warning(&format!("{} ({})", finding.address, finding.cause));
        }
        0
    }
}

/// Scrub policy as selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrubPolicy {
    #[default]
    Destructive,
    Report,
}

impl ScrubPolicy {
    pub fn strategy(&self) -> Box<dyn ScrubStrategy> {
        match self {
            ScrubPolicy::Destructive => Box::new(PurgeFindings),
            ScrubPolicy::Report => Box::new(ReportFindings),
        }
    }
}
