use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use probe::ServerConfig;
use serde::{Deserialize, Serialize};
use stackcheck_core::serde_millis;
use supervisor::CommandSpec;
use tokio::fs;
use tracing::debug;

pub const CONFIG_FILE: &str = "stackcheck.toml";

/// Contents of `stackcheck.toml`. Every field has a default, so an empty
/// or missing file describes a Rust backend in `./backend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackcheckConfig {
    pub project: ProjectConfig,
    pub prerequisites: PrerequisitesConfig,
    pub unit: SuiteConfig,
    pub integration: SuiteConfig,
    pub watch: WatchConfig,
    pub server: ServerConfig,
    pub run: RunConfig,
}

impl Default for StackcheckConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            prerequisites: PrerequisitesConfig::default(),
            unit: SuiteConfig::unit(),
            integration: SuiteConfig::integration(),
            watch: WatchConfig::default(),
            server: ServerConfig::default(),
            run: RunConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory the test commands run in
    pub working_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("backend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrerequisitesConfig {
    pub tools: Vec<String>,
    #[serde(rename = "timeout_ms", with = "serde_millis")]
    pub timeout: Duration,
}

impl Default for PrerequisitesConfig {
    fn default() -> Self {
        Self {
            tools: vec!["cargo".to_string()],
            timeout: Duration::from_secs(30),
        }
    }
}

/// A test command plus how to tell it the desired parallelism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variable that receives the thread count
    #[serde(default = "default_parallelism_env")]
    pub parallelism_env: String,
    #[serde(rename = "timeout_ms", with = "serde_millis", default = "default_suite_timeout")]
    pub timeout: Duration,
}

impl SuiteConfig {
    pub fn unit() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec!["test".to_string(), "--lib".to_string()],
            parallelism_env: default_parallelism_env(),
            timeout: default_suite_timeout(),
        }
    }

    pub fn integration() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec!["test".to_string(), "--test".to_string(), "*".to_string()],
            parallelism_env: default_parallelism_env(),
            timeout: Duration::from_secs(15 * 60),
        }
    }

    /// Command for this suite with `filter` appended and `threads` exported.
    pub fn command(&self, working_dir: &Path, filter: Option<&str>, threads: usize) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .current_dir(working_dir)
            .env(&self.parallelism_env, threads.to_string());
        if let Some(filter) = filter {
            spec = spec.arg(filter);
        }
        spec
    }
}

fn default_parallelism_env() -> String {
    "RUST_TEST_THREADS".to_string()
}

fn default_suite_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Long-running watcher started by `stackcheck watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub program: String,
    /// `{threads}` is replaced with the thread count
    pub args: Vec<String>,
}

impl WatchConfig {
    pub fn command(&self, working_dir: &Path, threads: usize) -> CommandSpec {
        let threads = threads.to_string();
        CommandSpec::new(&self.program)
            .args(self.args.iter().map(|arg| arg.replace("{threads}", &threads)))
            .current_dir(working_dir)
            .inherit_output(true)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec![
                "watch".to_string(),
                "-x".to_string(),
                "test --lib -- --test-threads={threads}".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    #[serde(rename = "grace_period_ms", with = "serde_millis")]
    pub grace_period: Duration,
    #[serde(rename = "kill_timeout_ms", with = "serde_millis")]
    pub kill_timeout: Duration,
    #[serde(rename = "server_timeout_ms", with = "serde_millis")]
    pub server_timeout: Duration,
    #[serde(rename = "health_timeout_ms", with = "serde_millis")]
    pub health_timeout: Duration,
    #[serde(rename = "tick_ms", with = "serde_millis")]
    pub tick: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grace_period: supervisor::DEFAULT_GRACE_PERIOD,
            kill_timeout: supervisor::DEFAULT_KILL_TIMEOUT,
            server_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            tick: Duration::from_millis(120),
        }
    }
}

impl StackcheckConfig {
    /// Read the config at `path`.
    ///
    /// A missing file yields the defaults unless `required` is set, which
    /// is the case when the path was given explicitly.
    pub async fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            anyhow::ensure!(!required, "Config file {} does not exist", path.display());
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Working directory resolved against the directory holding the config.
    pub fn working_dir(&self, config_path: &Path) -> PathBuf {
        if self.project.working_dir.is_absolute() {
            return self.project.working_dir.clone();
        }
        config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.join(&self.project.working_dir))
            .unwrap_or_else(|| self.project.working_dir.clone())
    }
}
