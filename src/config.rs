use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::migration::imports::{self, ImportRecipe};
use crate::migration::normalizer::KeyNormalization;
use crate::migration::rules::{self, MigrationRule};
use crate::migration::scrubber::{ScrubConfig, ScrubPolicy};
use crate::traits::FileSystem;

/// Config file looked up in the new directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = ".migrate.yaml";

/// Migration settings; every field is optional in the YAML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub terraform_binary: String,
    pub aws_binary: String,
    /// Working directory for state files, relative to the new directory
    pub work_dir: String,
    /// Fewer resources than this in the old state aborts the run
    pub min_resources: usize,
    /// Module names a wrapping module may enclose
    pub top_level_modules: Vec<String>,
    /// Custom rules, evaluated before the default ones
    pub rules: Vec<MigrationRule>,
    pub replace_default_rules: bool,
    pub scrub_policy: ScrubPolicy,
    pub scrub: ScrubConfig,
    pub normalize: Vec<KeyNormalization>,
    pub imports: Vec<ImportRecipe>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            terraform_binary: "terraform".to_string(),
            aws_binary: "aws".to_string(),
            work_dir: ".migration-work".to_string(),
            min_resources: 10,
            top_level_modules: vec![
                "networking".to_string(),
                "eks".to_string(),
                "database".to_string(),
            ],
            rules: Vec::new(),
            replace_default_rules: false,
            scrub_policy: ScrubPolicy::default(),
            scrub: ScrubConfig::default(),
            normalize: vec![KeyNormalization::default()],
            imports: imports::default_recipes(),
        }
    }
}

impl MigrationConfig {
    /// Parse a YAML config file
    pub fn from_file(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let content = fs.read_to_string(path)?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load the explicit config file, or `<new_dir>/.migrate.yaml` if present,
    /// or fall back to defaults
    pub fn load(fs: &dyn FileSystem, explicit: Option<&Path>, new_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(fs, path);
        }

        let path: PathBuf = new_dir.join(DEFAULT_CONFIG_FILE);
        if fs.exists(&path) {
            return Self::from_file(fs, &path);
        }

        Ok(Self::default())
    }

    /// Custom rules followed by the defaults (unless replaced)
    pub fn effective_rules(&self) -> Vec<MigrationRule> {
        let mut effective = self.rules.clone();
        if !self.replace_default_rules {
            effective.extend(rules::default_rules());
        }
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::rules::Transform;
    use crate::traits::MockFileSystem;

    #[test]
    fn test_missing_file_gives_defaults() {
        let fs = MockFileSystem::new();
        let config = MigrationConfig::load(&fs, None, Path::new("/new")).unwrap();
        assert_eq!(config, MigrationConfig::default());
        assert_eq!(config.min_resources, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let fs = MockFileSystem::new();
        fs.write(
            Path::new("/new/.migrate.yaml"),
            r#"
min_resources: 3
scrub_policy: report
rules:
  - pattern: '^module\.legacy\.'
    transform: { kind: rename_segment, from: module.legacy, to: module.modern }
    description: Rename legacy module
"#,
        )
        .unwrap();

        let config = MigrationConfig::load(&fs, None, Path::new("/new")).unwrap();

        assert_eq!(config.min_resources, 3);
        assert_eq!(config.scrub_policy, ScrubPolicy::Report);
        assert_eq!(config.terraform_binary, "terraform");
        assert_eq!(config.work_dir, ".migration-work");

        let effective = config.effective_rules();
        assert_eq!(effective.len(), rules::default_rules().len() + 1);
        assert_eq!(
            effective[0].transform,
            Transform::RenameSegment {
                from: "module.legacy".to_string(),
                to: "module.modern".to_string()
            }
        );
    }

    #[test]
    fn test_replace_default_rules() {
        let config = MigrationConfig {
            replace_default_rules: true,
            ..Default::default()
        };
        assert!(config.effective_rules().is_empty());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let fs = MockFileSystem::new();
        let explicit = Path::new("/etc/migrate.yaml");
        let result = MigrationConfig::load(&fs, Some(explicit), Path::new("/new"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let fs = MockFileSystem::new();
        fs.write(Path::new("/new/.migrate.yaml"), "min_resources: [").unwrap();
        let err = MigrationConfig::load(&fs, None, Path::new("/new")).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
