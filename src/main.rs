mod backend;
mod commands;
mod config;
mod context;
mod migration;
mod output;
mod state;
mod traits;

#[cfg(test)]
mod test_helpers;

use anyhow::{Context as AnyhowContext, Result, bail};
use clap::Parser;
use commands::{GenerateTfvarsCommand, MigrateCommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "migrate")]
#[command(
    about = "Migrate Terraform state from the legacy Materialize layout to the modular one",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Path to the old Terraform configuration
    old_dir: PathBuf,

    /// Path to the new Terraform configuration
    new_dir: Option<PathBuf>,

    /// Show what would be moved without changing any state
    #[arg(long)]
    dry_run: bool,

    /// Generate terraform.tfvars in the new directory from the old configuration
    #[arg(long, conflicts_with = "dry_run")]
    generate_tfvars: bool,

    /// Migration config file (defaults to <new_dir>/.migrate.yaml)
    #[arg(short, long, env = "MIGRATE_CONFIG")]
    config: Option<PathBuf>,
}

/// Resolve a directory argument to an absolute path, failing if it is missing
fn existing_dir(path: &Path, what: &str) -> Result<PathBuf> {
    if !path.is_dir() {
        bail!("{} directory not found: {}", what, path.display());
    }

    std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve {} directory: {}", what, path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let old_dir = existing_dir(&cli.old_dir, "Old")?;
    let new_dir = cli
        .new_dir
        .as_deref()
        .context("new_dir is required")
        .and_then(|dir| existing_dir(dir, "New"))?;

    let ctx = context::Context::new();

    if cli.generate_tfvars {
        let config = config::MigrationConfig::load(&*ctx.fs, cli.config.as_deref(), &new_dir)?;
        let terraform = backend::TerraformCli::new(&config.terraform_binary, ctx.command.clone());
        GenerateTfvarsCommand::execute(&ctx, &terraform, &old_dir, &new_dir)?;
    } else {
        MigrateCommand::execute(
            &ctx,
            &old_dir,
            &new_dir,
            cli.dry_run,
            cli.config.as_deref(),
        )?;
    }

    Ok(())
}
