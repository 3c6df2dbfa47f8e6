//! Project configuration.
//!
//! There is no global "current project" singleton: every operation takes an
//! explicit [`ProjectConfig`]. Configuration is composed from defaults, the
//! project file (`datashed.toml` at the project root), and a
//! `DATASHED_*` environment overlay, highest precedence last.

use crate::descriptor::HashAlgorithm;
use crate::error::Error;
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the project configuration file at the project root.
pub const PROJECT_FILE: &str = "datashed.toml";

/// Name of the control directory under the project root.
pub const CONTROL_DIR: &str = ".datashed";

/// Sync pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Initial job-poll delay in milliseconds.
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,

    /// Maximum job-poll delay in milliseconds; reaching it resets the delay.
    #[serde(default = "default_poll_cap_ms")]
    pub poll_cap_ms: u64,

    /// Upper bound on poll attempts before the job is reported as failed.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: usize,

    /// Destination handed to the bulk-transfer collaborator.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_poll_initial_ms() -> u64 {
    500
}

fn default_poll_cap_ms() -> u64 {
    30_000
}

fn default_poll_max_attempts() -> usize {
    120
}

fn default_bucket() -> String {
    "default".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_initial_ms: default_poll_initial_ms(),
            poll_cap_ms: default_poll_cap_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            bucket: default_bucket(),
        }
    }
}

/// Per-project configuration, passed explicitly into every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Stable project identifier; input to every derived id.
    pub project_id: String,

    /// Identifier namespace; an input to node-id derivation.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Default content-digest algorithm for `register`.
    #[serde(default = "default_algorithm")]
    pub default_algorithm: HashAlgorithm,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Project root on disk; set by the loader, never read from the file.
    #[serde(skip)]
    pub root: PathBuf,
}

fn default_namespace() -> String {
    "datashed".to_string()
}

fn default_algorithm() -> HashAlgorithm {
    HashAlgorithm::Sha256
}

impl ProjectConfig {
    /// Minimal in-memory config for a root and project id.
    pub fn new(root: impl Into<PathBuf>, project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            namespace: default_namespace(),
            default_algorithm: default_algorithm(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
            root: root.into(),
        }
    }

    /// Load configuration for a project root.
    /// Precedence: defaults -> `datashed.toml` -> `DATASHED_*` environment.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let builder = Self::builder_with_defaults()?;
        let project_file = root.join(PROJECT_FILE);
        let builder = if project_file.exists() {
            builder.add_source(File::from(project_file))
        } else {
            builder
        };
        let builder = builder.add_source(
            Environment::with_prefix("DATASHED")
                .separator("__")
                .try_parsing(true),
        );
        let mut config: ProjectConfig = builder.build()?.try_deserialize()?;
        config.root = root.to_path_buf();
        if config.project_id.is_empty() {
            return Err(Error::Config(
                "project_id must be set in datashed.toml or DATASHED_PROJECT_ID".to_string(),
            ));
        }
        Ok(config)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
        let builder = config::Config::builder()
            .set_default("project_id", "")?
            .set_default("namespace", default_namespace())?
            .set_default("default_algorithm", "sha256")?;
        Ok(builder)
    }

    /// Control directory holding descriptors, index, stream, and commits.
    pub fn control_dir(&self) -> PathBuf {
        self.root.join(CONTROL_DIR)
    }

    /// Directory of descriptor pointer files, mirroring tracked paths.
    pub fn descriptors_dir(&self) -> PathBuf {
        self.control_dir().join("descriptors")
    }

    /// Directory of metadata stream files.
    pub fn metadata_dir(&self) -> PathBuf {
        self.control_dir().join("metadata")
    }

    /// Append-only local index log.
    pub fn index_path(&self) -> PathBuf {
        self.control_dir().join("index.jsonl")
    }

    /// Directory of assembled commits.
    pub fn commits_dir(&self) -> PathBuf {
        self.control_dir().join("commits")
    }

    /// Append-only log of confirmed bulk-transfer uploads.
    pub fn uploads_path(&self) -> PathBuf {
        self.control_dir().join("uploads.jsonl")
    }

    /// Append-only pending commit queue.
    pub fn pending_path(&self) -> PathBuf {
        self.commits_dir().join("pending.jsonl")
    }

    /// Append-only completed commit queue.
    pub fn completed_path(&self) -> PathBuf {
        self.commits_dir().join("completed.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_project_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            "project_id = \"study-42\"\n\n[sync]\npoll_initial_ms = 100\n",
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.project_id, "study-42");
        assert_eq!(config.namespace, "datashed");
        assert_eq!(config.sync.poll_initial_ms, 100);
        assert_eq!(config.sync.poll_cap_ms, 30_000);
        assert_eq!(config.root, dir.path());
    }

    #[test]
    fn test_missing_project_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = ProjectConfig::load(dir.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_control_paths_are_rooted() {
        let config = ProjectConfig::new("/data/proj", "p1");
        assert_eq!(
            config.index_path(),
            PathBuf::from("/data/proj/.datashed/index.jsonl")
        );
        assert_eq!(
            config.pending_path(),
            PathBuf::from("/data/proj/.datashed/commits/pending.jsonl")
        );
    }
}
