use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;

use super::CloudApi;
use crate::migration::imports::Direction;
use crate::traits::CommandExecutor;

/// Cloud operations through the `aws` command line
pub struct AwsCli {
    binary: String,
    command: Arc<dyn CommandExecutor>,
}

impl AwsCli {
    pub fn new(binary: &str, command: Arc<dyn CommandExecutor>) -> Self {
        Self {
            binary: binary.to_string(),
            command,
        }
    }
}

impl CloudApi for AwsCli {
    fn revoke_security_group_rule(
        &self,
        group_id: &str,
        rule_id: &str,
        direction: Direction,
    ) -> Result<()> {
        let action = match direction {
            Direction::Ingress => "revoke-security-group-ingress",
            Direction::Egress => "revoke-security-group-egress",
        };
        let args = [
            "ec2",
            action,
            "--group-id",
            group_id,
            "--security-group-rule-ids",
            rule_id,
        ];

        let output = self
            .command
            .execute(&self.binary, &args, Path::new("."))
            .with_context(|| format!("Failed to run {} ec2 {}", self.binary, action))?;

        if !output.status.success() {
            bail!(
                "{} ec2 {} failed: {}",
                self.binary,
                action,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
