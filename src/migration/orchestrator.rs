//! Run sequencing for one migration
//!
//! Phases run strictly in order: snapshot, validate, detect prefix,
//! relocate, normalize, scrub, resolve imports, commit, import. Only the
//! implausible-source guard and a failed push abort the run; everything
//! else is counted and reported.

use anyhow::{Context as _, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::error::MigrationError;
use super::imports::{ImportOutcome, ImportResolver, StaleOutcome};
use super::normalizer;
use super::prefix;
use super::rules::{Resolution, RuleSet};
use super::scrubber::{self, Finding};
use crate::backend::{CloudApi, MoveRequest, StateBackend};
use crate::config::MigrationConfig;
use crate::context::Context;
use crate::state::StateDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    pub old_dir: PathBuf,
    pub new_dir: PathBuf,
    pub dry_run: bool,
}

/// Per-resource counters for one run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStats {
    pub total: usize,
    pub moved: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Local state files of one run, all kept after the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub dir: PathBuf,
    pub backup: PathBuf,
    pub old_state: PathBuf,
    pub new_state: PathBuf,
    pub old_updated: PathBuf,
}

impl WorkPaths {
    pub fn new(new_dir: &Path, work_dir: &str, timestamp: &str) -> Self {
        let dir = new_dir.join(work_dir);
        Self {
            backup: dir.join(format!("old-state-backup-{}.tfstate", timestamp)),
            old_state: dir.join("old.tfstate"),
            new_state: dir.join("new.tfstate"),
            old_updated: dir.join("old-updated.tfstate"),
            dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub stats: MigrationStats,
    pub module_prefix: Option<String>,
    /// Scrub findings (removed or only reported, depending on policy)
    pub findings: Vec<Finding>,
    pub scrubbed: usize,
    pub normalized: usize,
    pub stale: StaleOutcome,
    pub imports: ImportOutcome,
    pub work_dir: PathBuf,
    pub dry_run: bool,
}

pub struct Migrator<'a> {
    ctx: &'a Context,
    backend: &'a dyn StateBackend,
    cloud: &'a dyn CloudApi,
    config: &'a MigrationConfig,
    rules: RuleSet,
    options: MigrationOptions,
}

impl<'a> Migrator<'a> {
    pub fn new(
        ctx: &'a Context,
        backend: &'a dyn StateBackend,
        cloud: &'a dyn CloudApi,
        config: &'a MigrationConfig,
        options: MigrationOptions,
    ) -> Result<Self> {
        let rules = RuleSet::new(config.effective_rules())?;

        Ok(Self {
            ctx,
            backend,
            cloud,
            config,
            rules,
            options,
        })
    }

    pub fn run(&self) -> Result<MigrationReport> {
        let output = &*self.ctx.output;

        output.section("Automated State Migration");
        output.key_value("Old config", &self.options.old_dir.display().to_string());
        output.key_value("New config", &self.options.new_dir.display().to_string());
        if self.options.dry_run {
            output.warning("DRY RUN MODE - No changes will be made");
        }

        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let paths = WorkPaths::new(&self.options.new_dir, &self.config.work_dir, &timestamp);
        self.ctx.fs.create_dir_all(&paths.dir)?;
        output.key_value("Working directory", &paths.dir.display().to_string());

        let (old_doc, new_doc) = self.snapshot(&paths)?;

        output.section("Analyzing Old State");
        let addresses: Vec<String> = old_doc.addresses().iter().map(ToString::to_string).collect();
        let mut stats = MigrationStats {
            total: addresses.len(),
            ..Default::default()
        };

        if addresses.len() < self.config.min_resources {
            output.error(&format!(
                "Validation failed: old state only has {} resources",
                addresses.len()
            ));
            output.error("Check that the old directory has its backend configured and initialized");
            return Err(MigrationError::ImplausibleSource {
                found: addresses.len(),
                minimum: self.config.min_resources,
            }
            .into());
        }
        output.info(&format!("Found {} resources", addresses.len()));

        let module_prefix = prefix::detect(&addresses, &self.config.top_level_modules);
        match &module_prefix {
            Some(p) => output.info(&format!("Detected module prefix: {}", p)),
            None => output.dimmed("No module prefix detected (using root module)"),
        }

        output.section("Processing Resources");
        self.relocate(&addresses, module_prefix.as_deref(), &new_doc, &paths, &mut stats);

        // Moves rewrote the file; a dry run keeps working on the snapshot
        let mut new_doc = if self.options.dry_run {
            new_doc
        } else {
            StateDocument::load(&*self.ctx.fs, &paths.new_state)
        };

        let normalized = self.normalize(&mut new_doc, &paths)?;
        let (findings, scrubbed) = self.scrub(&mut new_doc, &paths)?;

        output.section("Resolving Imports");
        let resolver = ImportResolver::new(&self.config.imports);
        let stale = self.revoke_stale(&resolver, &mut new_doc, &paths)?;
        let plan = resolver.prepare(&new_doc, output);
        if plan.directives.is_empty() {
            output.dimmed("No imports needed");
        }

        self.commit(old_doc, &paths)?;

        let mut imports = if plan.directives.is_empty() {
            ImportOutcome::default()
        } else {
            output.section("Importing Resources");
            ImportResolver::run(&plan.directives, self.backend, &self.options.new_dir, output)
        };
        imports.unresolved = plan.unresolved;

        output.blank();
        output.dimmed(&format!("Work files kept in: {}", paths.dir.display()));

        Ok(MigrationReport {
            stats,
            module_prefix,
            findings,
            scrubbed,
            normalized,
            stale,
            imports,
            work_dir: paths.dir,
            dry_run: self.options.dry_run,
        })
    }

    /// Pull both documents into the work directory, backing up the old one first
    fn snapshot(&self, paths: &WorkPaths) -> Result<(StateDocument, StateDocument)> {
        let output = &*self.ctx.output;
        let fs = &*self.ctx.fs;

        output.section("Pulling States");

        output.info("Pulling old state...");
        let old_doc = match self.backend.pull(&self.options.old_dir) {
            Ok(text) => {
                fs.write(&paths.backup, &text)
                    .context("Failed to write old state backup")?;
                output.key_value("Backup", &paths.backup.display().to_string());
                self.write_snapshot(&text, &paths.old_state)?
            }
            Err(e) => {
                output.warning(&format!("Could not pull old state: {}", e));
                self.write_snapshot("", &paths.old_state)?
            }
        };

        output.info("Pulling new state...");
        if let Err(e) = self.backend.init(&self.options.new_dir) {
            output.warning(&format!("Init of new directory failed: {}", e));
        }
        let new_text = self.backend.pull(&self.options.new_dir).unwrap_or_default();
        let new_doc = self.write_snapshot(&new_text, &paths.new_state)?;

        Ok((old_doc, new_doc))
    }

    /// Keep pulled text verbatim; anything unusable becomes an empty document
    fn write_snapshot(&self, text: &str, path: &Path) -> Result<StateDocument> {
        match serde_json::from_str::<StateDocument>(text) {
            Ok(document) => {
                self.ctx.fs.write(path, text)?;
                Ok(document)
            }
            Err(_) => {
                let document = StateDocument::empty();
                document.save(&*self.ctx.fs, path)?;
                Ok(document)
            }
        }
    }

    fn relocate(
        &self,
        addresses: &[String],
        module_prefix: Option<&str>,
        new_doc: &StateDocument,
        paths: &WorkPaths,
        stats: &mut MigrationStats,
    ) {
        let output = &*self.ctx.output;
        let mut existing: HashSet<String> =
            new_doc.addresses().iter().map(ToString::to_string).collect();

        for address in addresses {
            let stripped = prefix::strip(module_prefix, address);

            let (target, description) = match self.rules.resolve(stripped) {
                Resolution::Target {
                    address: target,
                    description,
                } => (target, description),
                Resolution::Skipped { description } => {
                    output.dimmed(&format!("⊘ {}", address));
                    output.dimmed(&format!("    {}", description));
                    stats.skipped += 1;
                    continue;
                }
                Resolution::Inapplicable { description } => {
                    output.error(&format!("✗ {}", address));
                    output.error(&format!(
                        "    Rule does not fit this address: {}",
                        description
                    ));
                    stats.failed += 1;
                    continue;
                }
                Resolution::Unmatched => {
                    output.warning(&format!("⊘ {}", address));
                    output.warning("    No transformation rule");
                    stats.skipped += 1;
                    continue;
                }
            };

            if existing.contains(&target) {
                output.dimmed(&format!("⊘ {}", address));
                output.dimmed(&format!("    Already exists: {}", target));
                stats.skipped += 1;
                continue;
            }

            output.info(&format!("→ {}", address));
            if target != stripped {
                output.dimmed(&format!("  ↳ {} ({})", target, description));
            }

            let request = MoveRequest {
                working_dir: self.options.new_dir.clone(),
                old_state: paths.old_state.clone(),
                new_state: paths.new_state.clone(),
                from: address.clone(),
                to: target.clone(),
            };

            match self.backend.move_resource(&request) {
                Ok(()) => {
                    existing.insert(target);
                    stats.moved += 1;
                }
                Err(e) => {
                    output.error(&format!("    Failed to move: {}", e));
                    stats.failed += 1;
                }
            }
        }
    }

    /// Persist a mutated document once, unless this is a dry run
    fn persist(&self, document: &mut StateDocument, paths: &WorkPaths) -> Result<()> {
        document.bump_serial();
        if self.options.dry_run {
            return Ok(());
        }
        document.save(&*self.ctx.fs, &paths.new_state)
    }

    fn normalize(&self, document: &mut StateDocument, paths: &WorkPaths) -> Result<usize> {
        let output = &*self.ctx.output;
        output.section("Normalizing for_each Keys");

        let mut changes = 0;
        for descriptor in &self.config.normalize {
            let outcome = normalizer::normalize(document, descriptor, output);
            changes += outcome.renamed + outcome.dropped;
        }

        if changes > 0 {
            self.persist(document, paths)?;
            output.success(&format!("Normalized {} instance keys", changes));
        }

        Ok(changes)
    }

    fn scrub(
        &self,
        document: &mut StateDocument,
        paths: &WorkPaths,
    ) -> Result<(Vec<Finding>, usize)> {
        let output = &*self.ctx.output;
        output.section("Validating Migrated State");

        let strategy = self.config.scrub_policy.strategy();
        let findings =
            scrubber::detect(document, &self.config.scrub, strategy.includes_preexisting());

        if findings.is_empty() {
            output.success("No corrupted resources found");
            return Ok((findings, 0));
        }

        let removed = strategy.apply(document, &findings, output);
        if removed > 0 {
            self.persist(document, paths)?;
            output.success(&format!("Removed {} resources from state", removed));
        }

        Ok((findings, removed))
    }

    /// Revoke live rules whose source changed and drop their local copies
    ///
    /// A local instance is only removed once its live permission is gone.
    fn revoke_stale(
        &self,
        resolver: &ImportResolver<'_>,
        document: &mut StateDocument,
        paths: &WorkPaths,
    ) -> Result<StaleOutcome> {
        let output = &*self.ctx.output;
        let scan = resolver.find_stale(document, output);
        let mut outcome = StaleOutcome {
            failed: scan.unrevocable,
            ..Default::default()
        };
        let mut revoked = Vec::new();

        for stale in scan.rules {
            output.warning(&format!("Stale source group on {}", stale.address));

            match self.cloud.revoke_security_group_rule(
                &stale.group_id,
                &stale.rule_id,
                stale.direction,
            ) {
                Ok(()) => {
                    output.success(&format!("Revoked {} on {}", stale.rule_id, stale.group_id));
                    revoked.push(stale.address);
                }
                Err(e) => {
                    output.error(&format!("Failed to revoke {}: {}", stale.rule_id, e));
                    outcome.failed += 1;
                }
            }
        }

        if revoked.is_empty() {
            return Ok(outcome);
        }

        outcome.revoked = document.remove_instances(&revoked);
        self.persist(document, paths)?;
        Ok(outcome)
    }

    /// Push the old document (if anything is left in it), then the new one
    fn commit(&self, old_snapshot: StateDocument, paths: &WorkPaths) -> Result<()> {
        let output = &*self.ctx.output;
        output.section("Updating States");

        let mut old_doc = if self.options.dry_run {
            old_snapshot
        } else {
            StateDocument::load(&*self.ctx.fs, &paths.old_state)
        };

        if old_doc.resources.is_empty() {
            output.dimmed("Skipping old state push (no resources left)");
        } else {
            old_doc.bump_serial();
            if !self.options.dry_run {
                old_doc.save(&*self.ctx.fs, &paths.old_updated)?;
            }
            output.info("Pushing old state...");
            self.push(&self.options.old_dir, &paths.old_updated)?;
        }

        output.info("Pushing new state...");
        self.push(&self.options.new_dir, &paths.new_state)
    }

    fn push(&self, dir: &Path, state_file: &Path) -> Result<()> {
        self.backend.push(dir, state_file).map_err(|e| {
            self.ctx.output.error(&format!("Failed to push state: {}", e));
            MigrationError::PushFailed {
                dir: dir.display().to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(())
    }
}
