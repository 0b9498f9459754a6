//! External state store and cloud API seams
//!
//! The orchestrator only talks to these traits. Production implementations
//! shell out through `CommandExecutor`; `DryRun` turns every write into a
//! no-op that reports success.

pub mod aws;
pub mod terraform;

pub use aws::AwsCli;
pub use terraform::TerraformCli;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::migration::imports::Direction;

/// One `state mv` between two local state files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    /// Directory whose configuration the move runs in
    pub working_dir: PathBuf,
    pub old_state: PathBuf,
    pub new_state: PathBuf,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Imported,
    /// The address was already in state; counts as success
    AlreadyManaged,
}

pub trait StateBackend {
    /// Prepare a configuration directory so its state can be read
    fn init(&self, dir: &Path) -> Result<()>;

    /// Current state JSON of a directory; an error means there is none to read
    fn pull(&self, dir: &Path) -> Result<String>;

    /// Replace the directory's state with the given file
    fn push(&self, dir: &Path, state_file: &Path) -> Result<()>;

    /// Move one resource; all or nothing
    fn move_resource(&self, request: &MoveRequest) -> Result<()>;

    fn import(&self, dir: &Path, address: &str, id: &str) -> Result<ImportStatus>;
}

pub trait CloudApi {
    fn revoke_security_group_rule(
        &self,
        group_id: &str,
        rule_id: &str,
        direction: Direction,
    ) -> Result<()>;
}

impl<T: StateBackend + ?Sized> StateBackend for &T {
    fn init(&self, dir: &Path) -> Result<()> {
        (**self).init(dir)
    }

    fn pull(&self, dir: &Path) -> Result<String> {
        (**self).pull(dir)
    }

    fn push(&self, dir: &Path, state_file: &Path) -> Result<()> {
        (**self).push(dir, state_file)
    }

    fn move_resource(&self, request: &MoveRequest) -> Result<()> {
        (**self).move_resource(request)
    }

    fn import(&self, dir: &Path, address: &str, id: &str) -> Result<ImportStatus> {
        (**self).import(dir, address, id)
    }
}

impl<T: CloudApi + ?Sized> CloudApi for &T {
    fn revoke_security_group_rule(
        &self,
        group_id: &str,
        rule_id: &str,
        direction: Direction,
    ) -> Result<()> {
        (**self).revoke_security_group_rule(group_id, rule_id, direction)
    }
}

/// Reads go through, writes succeed without doing anything
pub struct DryRun<T>(pub T);

impl<T: StateBackend> StateBackend for DryRun<T> {
    fn init(&self, dir: &Path) -> Result<()> {
        self.0.init(dir)
    }

    fn pull(&self, dir: &Path) -> Result<String> {
        self.0.pull(dir)
    }

    fn push(&self, _dir: &Path, _state_file: &Path) -> Result<()> {
        Ok(())
    }

    fn move_resource(&self, _request: &MoveRequest) -> Result<()> {
        Ok(())
    }

    fn import(&self, _dir: &Path, _address: &str, _id: &str) -> Result<ImportStatus> {
        Ok(ImportStatus::Imported)
    }
}

impl<T: CloudApi> CloudApi for DryRun<T> {
    fn revoke_security_group_rule(
        &self,
        _group_id: &str,
        _rule_id: &str,
        _direction: Direction,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockCommandExecutor, MockCommandResult};
    use std::sync::Arc;

    #[test]
    fn test_dry_run_reads_through_and_skips_writes() {
        let command = Arc::new(MockCommandExecutor::with_outputs(vec![MockCommandResult::ok(
            "terraform state pull",
            "{\"serial\": 3}",
        )]));
        let backend = DryRun(TerraformCli::new("terraform", command.clone()));
        let dir = Path::new("/old");

        assert_eq!(backend.pull(dir).unwrap(), "{\"serial\": 3}");
        backend.push(dir, Path::new("/old/state.json")).unwrap();
        backend
            .move_resource(&MoveRequest {
                working_dir: PathBuf::from("/new"),
                old_state: PathBuf::from("/new/w/old.tfstate"),
                new_state: PathBuf::from("/new/w/new.tfstate"),
                from: "aws_vpc.a".to_string(),
                to: "aws_vpc.b".to_string(),
            })
            .unwrap();
        assert_eq!(
            backend.import(dir, "aws_vpc.a", "vpc-1").unwrap(),
            ImportStatus::Imported
        );

        assert_eq!(command.calls(), vec!["terraform state pull"]);
    }

    #[test]
    fn test_dry_run_cloud_api_issues_nothing() {
        let command = Arc::new(MockCommandExecutor::new());
        let cloud = DryRun(AwsCli::new("aws", command.clone()));

        cloud
            .revoke_security_group_rule("sg-1", "sgr-1", Direction::Egress)
            .unwrap();

        assert!(command.calls().is_empty());
    }
}
