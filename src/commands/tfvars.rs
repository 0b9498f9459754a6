use anyhow::{Context as AnyhowContext, Result};
use handlebars::Handlebars;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::StateBackend;
use crate::context::Context;
use crate::state::StateDocument;

lazy_static! {
    // key = "value"
    static ref ASSIGNMENT: Regex =
        Regex::new(r#"^(\w+)\s*=\s*"([^"]+)""#).expect("Invalid assignment regex");
}

const TFVARS_TEMPLATE: &str = r#"# =============================================================================
# Terraform Variables
# =============================================================================
# Auto-generated from old configuration
# Review and update as needed, especially the license_key
# =============================================================================

{{#if aws_region}}aws_region = "{{aws_region}}"{{else}}aws_region = "us-east-1"  # Update this{{/if}}
{{#if aws_profile}}aws_profile = "{{aws_profile}}"{{else}}aws_profile = "default"  # Update this{{/if}}
{{#if name_prefix}}name_prefix = "{{name_prefix}}"{{else}}name_prefix = "materialize"  # Update this{{/if}}

# Add your Materialize license key from https://materialize.com/register
license_key = "your-license-key-here"

# CIDR blocks for access control
ingress_cidr_blocks = ["0.0.0.0/0"]
k8s_apiserver_authorized_networks = ["0.0.0.0/0"]

# Load balancer configuration
internal_load_balancer = true

# Tags
tags = {
  Environment = "production"
  ManagedBy   = "terraform"
  Project     = "materialize"
}
"#;

pub struct GenerateTfvarsCommand;

impl GenerateTfvarsCommand {
    /// Write `<new_dir>/terraform.tfvars` from the old variables and state
    pub fn execute(
        ctx: &Context,
        backend: &dyn StateBackend,
        old_dir: &Path,
        new_dir: &Path,
    ) -> Result<()> {
        ctx.output.section("Generating terraform.tfvars");

        let mut values = BTreeMap::new();

        let old_tfvars = old_dir.join("terraform.tfvars");
        if ctx.fs.exists(&old_tfvars) {
            ctx.output.info("Found old terraform.tfvars, extracting values...");
            let content = ctx.fs.read_to_string(&old_tfvars)?;
            values.extend(parse_assignments(&content));
        }

        match backend.pull(old_dir) {
            Ok(text) => detect_from_state(&StateDocument::parse_or_empty(&text), &mut values),
            Err(e) => ctx
                .output
                .dimmed(&format!("Could not read old state ({}), using defaults", e)),
        }

        let rendered = render(&values)?;
        let output_path = new_dir.join("terraform.tfvars");
        ctx.fs.write(&output_path, &rendered)?;
        ctx.output
            .success(&format!("Generated: {}", output_path.display()));

        if !values.is_empty() {
            ctx.output.section("Detected values");
            for (key, value) in &values {
                ctx.output.key_value(key, value);
            }
        }

        ctx.output.blank();
        ctx.output
            .warning("Please review and update the generated file, especially:");
        ctx.output.dimmed("  - license_key (required)");
        ctx.output
            .dimmed("  - name_prefix (must match your existing resources)");
        ctx.output.dimmed("  - CIDR blocks (restrict for production)");

        Ok(())
    }
}

/// Collect `key = "value"` lines, ignoring comments
fn parse_assignments(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| ASSIGNMENT.captures(line))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Region from the first instance carrying one, name prefix from the VPC name tag
fn detect_from_state(document: &StateDocument, values: &mut BTreeMap<String, String>) {
    if !values.contains_key("aws_region") {
        let region = document
            .resources
            .iter()
            .filter_map(|r| r.instances.first())
            .find_map(|i| i.attribute("region").and_then(|v| v.as_str()));

        if let Some(region) = region {
            values.insert("aws_region".to_string(), region.to_string());
        }
    }

    let prefix = document
        .resources
        .iter()
        .filter(|r| r.resource_type == "aws_vpc")
        .filter_map(|r| r.instances.first())
        .filter_map(|i| i.attribute("tags.Name").and_then(|v| v.as_str()))
        .find(|name| name.contains("-vpc"));

    if let Some(name) = prefix {
        values.insert("name_prefix".to_string(), name.replace("-vpc", ""));
    }
}

fn render(values: &BTreeMap<String, String>) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .render_template(TFVARS_TEMPLATE, values)
        .context("Failed to render terraform.tfvars")
}
