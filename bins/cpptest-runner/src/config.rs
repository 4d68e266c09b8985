// Framework and runner configuration for the cpptest runner
use anyhow::{bail, Context, Result};
use cpptest_common::config::DEFAULT_MANIFEST_PATH;
use cpptest_common::types::FrameworkKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Extra flags a framework needs so its output matches what the parser reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    pub framework: FrameworkKind,
    #[serde(default)]
    pub run_args: Vec<String>,
}

impl FrameworkConfig {
    pub fn builtin(framework: FrameworkKind) -> Self {
        let run_args: &[&str] = match framework {
            // XML names every case, even one without assertions; `--out` is added per run
            FrameworkKind::Catch2 => &["--success", "--reporter", "xml"],
            FrameworkKind::BoostTest => &["--log_level=test_suite", "--report_level=short"],
            // Report file argument is added per run
            FrameworkKind::GoogleTest => &[],
            // Plain text to stdout is the default logger
            FrameworkKind::QtTest => &[],
        };
        Self {
            framework,
            run_args: run_args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameworksJson {
    frameworks: Vec<FrameworkConfig>,
}

/// Framework configuration manager
#[derive(Debug, Clone)]
pub struct FrameworkConfigManager {
    configs: HashMap<FrameworkKind, FrameworkConfig>,
}

impl FrameworkConfigManager {
    /// Built-in settings for every framework
    pub fn builtin() -> Self {
        let configs = FrameworkKind::ALL
            .iter()
            .map(|kind| (*kind, FrameworkConfig::builtin(*kind)))
            .collect();
        Self { configs }
    }

    /// Load overrides from a frameworks.json; frameworks it does not list
    /// keep their built-in settings
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Framework config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read frameworks.json")?;
        Self::from_json(&content).context("Failed to parse frameworks.json")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let frameworks_json: FrameworksJson = serde_json::from_str(content)?;

        let mut manager = Self::builtin();
        for config in frameworks_json.frameworks {
            manager.configs.insert(config.framework, config);
        }
        Ok(manager)
    }

    /// Get configuration for a specific framework
    pub fn get_config(&self, framework: FrameworkKind) -> FrameworkConfig {
        self.configs
            .get(&framework)
            .cloned()
            .unwrap_or_else(|| FrameworkConfig::builtin(framework))
    }
}

/// Runner settings taken from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub suite_path: PathBuf,
    pub frameworks_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub report_path: Option<PathBuf>,
    pub json_logs: bool,
}

impl RunnerSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let concurrency = match lookup("CPPTEST_CONCURRENCY") {
            Some(value) => {
                let parsed: usize = value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid CPPTEST_CONCURRENCY: {}", value))?;
                if parsed == 0 {
                    bail!("CPPTEST_CONCURRENCY must be at least 1");
                }
                Some(parsed)
            }
            None => None,
        };

        Ok(Self {
            suite_path: lookup("CPPTEST_SUITE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH)),
            frameworks_path: lookup("CPPTEST_FRAMEWORKS").map(PathBuf::from),
            concurrency,
            report_path: lookup("CPPTEST_REPORT").map(PathBuf::from),
            json_logs: lookup("CPPTEST_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}
