// Suite manifest: which binaries to run and how
use crate::types::{FrameworkKind, TestBinary};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST_PATH: &str = "config/suite.json";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryEntry {
    pub path: PathBuf,
    pub framework: FrameworkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
}

impl BinaryEntry {
    pub fn new(path: impl Into<PathBuf>, framework: FrameworkKind) -> Self {
        Self {
            path: path.into(),
            framework,
            name: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout_ms: None,
            filter: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteManifest {
    /// Parallel binaries; number of CPUs when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub harness: Vec<String>,
    #[serde(default)]
    pub binaries: Vec<BinaryEntry>,
    /// Directory relative binary paths are resolved against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for SuiteManifest {
    fn default() -> Self {
        Self {
            concurrency: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            harness: Vec::new(),
            binaries: Vec::new(),
            base_dir: None,
        }
    }
}

impl SuiteManifest {
    /// Load a manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Suite manifest not found: {}", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut manifest = Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Load with default path (config/suite.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_MANIFEST_PATH))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: SuiteManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == Some(0) {
            bail!("concurrency must be at least 1");
        }
        if self.default_timeout_ms == 0 {
            bail!("default_timeout_ms must be greater than zero");
        }
        for entry in &self.binaries {
            if entry.path.as_os_str().is_empty() {
                bail!("binary entry with empty path");
            }
            if entry.timeout_ms == Some(0) {
                bail!("timeout_ms of {} must be greater than zero", entry.path.display());
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn add_binary(&mut self, entry: BinaryEntry) -> Result<()> {
        if self.binaries.iter().any(|b| b.path == entry.path) {
            bail!("Binary '{}' already exists in manifest", entry.path.display());
        }
        self.binaries.push(entry);
        Ok(())
    }

    pub fn remove_binary(&mut self, path: &Path) -> Result<BinaryEntry> {
        match self.binaries.iter().position(|b| b.path == path) {
            Some(idx) => Ok(self.binaries.remove(idx)),
            None => bail!("Binary '{}' is not in the manifest", path.display()),
        }
    }

    /// Resolve entries into runnable binaries, in manifest order
    pub fn test_binaries(&self) -> Vec<TestBinary> {
        self.binaries
            .iter()
            .map(|entry| {
                let path = match self.base_dir {
                    Some(ref base) if entry.path.is_relative() => base.join(&entry.path),
                    _ => entry.path.clone(),
                };
                TestBinary {
                    path,
                    framework: entry.framework,
                    name: entry.name.clone(),
                    args: entry.args.clone(),
                    env: entry.env.clone(),
                    timeout_ms: entry.timeout_ms.unwrap_or(self.default_timeout_ms),
                    filter: entry.filter.clone(),
                    harness: self.harness.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "concurrency": 2,
        "default_timeout_ms": 5000,
        "harness": ["valgrind", "--error-exitcode=3"],
        "binaries": [
            {"path": "gtest", "framework": "google_test", "args": ["argument1"]},
            {"path": "/abs/boost_one_argument", "framework": "boost_test", "timeout_ms": 100,
             "env": {"LC_ALL": "C"}}
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = SuiteManifest::from_json(SAMPLE).unwrap();
        assert_eq!(manifest.concurrency, Some(2));
        assert_eq!(manifest.binaries.len(), 2);

        let binaries = manifest.test_binaries();
        assert_eq!(binaries[0].timeout_ms, 5000);
        assert_eq!(binaries[0].args, vec!["argument1"]);
        assert_eq!(binaries[0].harness, vec!["valgrind", "--error-exitcode=3"]);
        assert_eq!(binaries[1].timeout_ms, 100);
        assert_eq!(binaries[1].env.get("LC_ALL").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_defaults() {
        let manifest = SuiteManifest::from_json(r#"{"binaries": []}"#).unwrap();
        assert_eq!(manifest.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(manifest.concurrency, None);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(SuiteManifest::from_json(r#"{"concurrency": 0}"#).is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let manifest = SuiteManifest::load(&path).unwrap();
        let binaries = manifest.test_binaries();
        assert_eq!(binaries[0].path, dir.path().join("gtest"));
        assert_eq!(binaries[1].path, PathBuf::from("/abs/boost_one_argument"));
    }

    #[test]
    fn test_add_and_remove_binary() {
        let mut manifest = SuiteManifest::default();
        manifest
            .add_binary(BinaryEntry::new("qt_success", FrameworkKind::QtTest))
            .unwrap();
        assert!(manifest
            .add_binary(BinaryEntry::new("qt_success", FrameworkKind::QtTest))
            .is_err());

        let removed = manifest.remove_binary(Path::new("qt_success")).unwrap();
        assert_eq!(removed.framework, FrameworkKind::QtTest);
        assert!(manifest.remove_binary(Path::new("qt_success")).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("suite.json");
        let mut manifest = SuiteManifest::default();
        manifest
            .add_binary(BinaryEntry::new("catch2_special_chars", FrameworkKind::Catch2))
            .unwrap();
        manifest.save(&path).unwrap();

        let loaded = SuiteManifest::load(&path).unwrap();
        assert_eq!(loaded.binaries, manifest.binaries);
    }
}
