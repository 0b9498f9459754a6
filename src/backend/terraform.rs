use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;

use super::{ImportStatus, MoveRequest, StateBackend};
use crate::traits::CommandExecutor;

const ALREADY_MANAGED: &str = "Resource already managed";

/// State backend driven through the `terraform` binary
pub struct TerraformCli {
    binary: String,
    command: Arc<dyn CommandExecutor>,
}

impl TerraformCli {
    pub fn new(binary: &str, command: Arc<dyn CommandExecutor>) -> Self {
        Self {
            binary: binary.to_string(),
            command,
        }
    }

    fn run(&self, args: &[&str], dir: &Path) -> Result<Output> {
        self.command
            .execute(&self.binary, args, dir)
            .with_context(|| format!("Failed to run {} {}", self.binary, args.join(" ")))
    }
}

/// Path as seen from `base`, falling back to the path itself
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

impl StateBackend for TerraformCli {
    fn init(&self, dir: &Path) -> Result<()> {
        let output = self.run(&["init", "-input=false"], dir)?;
        if !output.status.success() {
            bail!("{} init failed: {}", self.binary, stderr_of(&output));
        }
        Ok(())
    }

    fn pull(&self, dir: &Path) -> Result<String> {
        let output = self.run(&["state", "pull"], dir)?;
        if !output.status.success() {
            bail!("{} state pull failed: {}", self.binary, stderr_of(&output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn push(&self, dir: &Path, state_file: &Path) -> Result<()> {
        let state_file = state_file.to_string_lossy();
        let output = self.run(&["state", "push", &*state_file], dir)?;
        if !output.status.success() {
            bail!("{}", stderr_of(&output));
        }
        Ok(())
    }

    fn move_resource(&self, request: &MoveRequest) -> Result<()> {
        let state = format!(
            "-state={}",
            relative_to(&request.old_state, &request.working_dir).display()
        );
        let state_out = format!(
            "-state-out={}",
            relative_to(&request.new_state, &request.working_dir).display()
        );

        let output = self.run(
            &[
                "state",
                "mv",
                state.as_str(),
                state_out.as_str(),
                request.from.as_str(),
                request.to.as_str(),
            ],
            &request.working_dir,
        )?;
        if !output.status.success() {
            bail!("{}", stderr_of(&output));
        }
        Ok(())
    }

    fn import(&self, dir: &Path, address: &str, id: &str) -> Result<ImportStatus> {
        let output = self.run(&["import", address, id], dir)?;
        if output.status.success() {
            return Ok(ImportStatus::Imported);
        }

        let stderr = stderr_of(&output);
        if stderr.contains(ALREADY_MANAGED) {
            return Ok(ImportStatus::AlreadyManaged);
        }

        bail!("{}", stderr)
    }
}
