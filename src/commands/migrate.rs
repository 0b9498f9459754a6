use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::backend::{AwsCli, CloudApi, DryRun, StateBackend, TerraformCli};
use crate::config::MigrationConfig;
use crate::context::Context;
use crate::migration::{MigrationOptions, MigrationReport, Migrator};

pub struct MigrateCommand;

impl MigrateCommand {
    /// Execute the migrate command
    pub fn execute(
        ctx: &Context,
        old_dir: &Path,
        new_dir: &Path,
        dry_run: bool,
        config_path: Option<&Path>,
    ) -> Result<()> {
        let config = MigrationConfig::load(&*ctx.fs, config_path, new_dir)?;
        let options = MigrationOptions {
            old_dir: old_dir.to_path_buf(),
            new_dir: new_dir.to_path_buf(),
            dry_run,
        };

        let terraform = TerraformCli::new(&config.terraform_binary, ctx.command.clone());
        let aws = AwsCli::new(&config.aws_binary, ctx.command.clone());

        let report = if dry_run {
            Self::run(ctx, &DryRun(terraform), &DryRun(aws), &config, options)?
        } else {
            Self::run(ctx, &terraform, &aws, &config, options)?
        };

        Self::print_summary(ctx, &report, new_dir);
        Ok(())
    }

    fn run(
        ctx: &Context,
        backend: &dyn StateBackend,
        cloud: &dyn CloudApi,
        config: &MigrationConfig,
        options: MigrationOptions,
    ) -> Result<MigrationReport> {
        Migrator::new(ctx, backend, cloud, config, options)?.run()
    }

    fn print_summary(ctx: &Context, report: &MigrationReport, new_dir: &Path) {
        let output = &*ctx.output;
        let stats = &report.stats;

        output.section("Summary");
        output.key_value("Total resources", &stats.total.to_string());
        output.key_value("Moved", &stats.moved.to_string());
        output.key_value("Skipped", &stats.skipped.to_string());
        output.key_value("Failed", &stats.failed.to_string());
        if report.normalized > 0 {
            output.key_value("Keys normalized", &report.normalized.to_string());
        }
        if !report.findings.is_empty() {
            output.key_value("Flagged by validation", &report.findings.len().to_string());
            output.key_value("Removed by validation", &report.scrubbed.to_string());
        }
        if report.stale.revoked + report.stale.failed > 0 {
            output.key_value("Stale rules revoked", &report.stale.revoked.to_string());
            output.key_value("Stale rules not revoked", &report.stale.failed.to_string());
        }
        let imports = &report.imports;
        if imports.succeeded() + imports.failed + imports.unresolved > 0 {
            output.key_value("Imported", &imports.succeeded().to_string());
            output.key_value("Import failures", &imports.failed.to_string());
            output.key_value("Imports not resolved", &imports.unresolved.to_string());
        }

        if report.dry_run {
            output.blank();
            output.warning("This was a DRY RUN. Re-run without --dry-run to apply changes.");
            return;
        }

        output.blank();
        output.success("Migration complete!");
        output.next_steps(&next_steps(report, new_dir));
    }
}

fn next_steps(report: &MigrationReport, new_dir: &Path) -> Vec<String> {
    let mut steps = vec![
        format!("cd {}", new_dir.display()),
        "terraform plan".to_string(),
        "Review the plan carefully; cert-manager and NLB bindings may be recreated".to_string(),
    ];

    if report.scrubbed > 0 {
        steps.push(
            "Resources removed by validation will be recreated or need importing".to_string(),
        );
    }
    if report.imports.failed > 0 {
        steps.push(format!(
            "Import the {} rules that failed with terraform import '<address>' '<rule-id>'",
            report.imports.failed
        ));
    }
    if report.stale.failed > 0 {
        steps.push(format!(
            "Revoke the {} outdated security group rules by hand, then remove them from state",
            report.stale.failed
        ));
    }

    steps.push("terraform apply".to_string());
    steps.push(format!(
        "Delete {} once the migration is verified",
        relative_or_full(&report.work_dir, new_dir).display()
    ));
    steps
}

fn relative_or_full(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
