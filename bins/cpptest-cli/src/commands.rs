// CLI commands for maintaining the suite manifest
use anyhow::{bail, Context, Result};
use cpptest_common::config::{BinaryEntry, SuiteManifest, DEFAULT_TIMEOUT_MS};
use cpptest_common::listing::{list_args, parse_listing, Catch2Version};
use cpptest_common::types::{FrameworkKind, TestBinary};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Cases one binary reported, as printed by `list --json`
#[derive(Debug, Serialize)]
pub struct Listing {
    pub binary: String,
    pub path: PathBuf,
    pub framework: FrameworkKind,
    pub cases: Vec<String>,
}

/// Write an empty manifest
pub async fn init_manifest(manifest_path: &Path, force: bool) -> Result<()> {
    println!("🚀 Initializing suite manifest at: {}", manifest_path.display());

    if manifest_path.exists() && !force {
        bail!(
            "Manifest {} already exists (use --force to overwrite)",
            manifest_path.display()
        );
    }

    SuiteManifest::default().save(manifest_path)?;
    println!("  ✅ Created: {}", manifest_path.display());

    println!("\n📋 Next steps:");
    println!("  1. Add a binary: cpptest-cli add-binary --path build/tests/unit --framework google_test");
    println!("  2. Check what it contains: cpptest-cli list --path build/tests/unit");
    println!("  3. Run the suite: cpptest-runner");

    Ok(())
}

/// Append a binary to the manifest
pub async fn add_binary(
    manifest_path: &Path,
    path: PathBuf,
    framework: FrameworkKind,
    args: Vec<String>,
    timeout_ms: Option<u64>,
    name: Option<String>,
    filter: Vec<String>,
) -> Result<()> {
    println!("🚀 Adding binary: {} ({})", path.display(), framework);

    if timeout_ms == Some(0) {
        bail!("Timeout must be greater than zero");
    }

    let mut manifest = SuiteManifest::load(manifest_path)?;

    let mut entry = BinaryEntry::new(path, framework);
    entry.args = args;
    entry.timeout_ms = timeout_ms;
    entry.name = name;
    entry.filter = filter;

    if !entry.path.exists() && entry.path.is_absolute() {
        println!("  ⚠️  {} does not exist yet", entry.path.display());
    }

    let display = entry.path.display().to_string();
    manifest.add_binary(entry)?;

    println!("📝 Updating {}...", manifest_path.display());
    manifest.save(manifest_path)?;

    println!("✅ Binary '{}' added successfully!", display);
    println!("\n📋 Next steps:");
    println!("  1. Verify the listing: cpptest-cli list --path {}", display);
    println!("  2. Run the suite: cpptest-runner");

    Ok(())
}

/// Remove a binary from the manifest, asking first unless `yes`
pub async fn remove_binary(manifest_path: &Path, path: &Path, yes: bool) -> Result<()> {
    println!("🗑️  Removing binary: {}", path.display());

    let mut manifest = SuiteManifest::load(manifest_path)?;

    if !manifest.binaries.iter().any(|b| b.path == path) {
        bail!("Binary '{}' not found in manifest", path.display());
    }

    if !yes {
        print!("⚠️  This will remove the entry for {} from {}\n", path.display(), manifest_path.display());
        print!("\nContinue? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    let removed = manifest.remove_binary(path)?;
    println!("📝 Updating {}...", manifest_path.display());
    manifest.save(manifest_path)?;

    println!("✅ Binary '{}' ({}) removed successfully!", removed.path.display(), removed.framework);
    Ok(())
}

/// Print the manifest's binaries
pub async fn show_manifest(manifest_path: &Path) -> Result<()> {
    let manifest = SuiteManifest::load(manifest_path)?;

    if manifest.binaries.is_empty() {
        println!("No binaries configured.");
        println!("\n💡 Add one with: cpptest-cli add-binary --path <path> --framework <framework>");
        return Ok(());
    }

    let concurrency = manifest
        .concurrency
        .map(|c| c.to_string())
        .unwrap_or_else(|| "number of CPUs".to_string());
    println!("📦 Suite manifest: {}", manifest_path.display());
    println!("  Concurrency: {}", concurrency);
    println!("  Default timeout: {} ms", manifest.default_timeout_ms);
    if !manifest.harness.is_empty() {
        println!("  Harness: {}", manifest.harness.join(" "));
    }

    println!("\n{} binaries:", manifest.binaries.len());
    for (entry, binary) in manifest.binaries.iter().zip(manifest.test_binaries()) {
        println!("  • {} ({})", binary.display_name(), entry.framework);
        println!("      Path: {}", entry.path.display());
        println!("      Timeout: {} ms", binary.timeout_ms);
        if !entry.args.is_empty() {
            println!("      Args: {}", entry.args.join(" "));
        }
        if !entry.filter.is_empty() {
            println!("      Filter: {}", entry.filter.join(", "));
        }
        for (key, value) in &entry.env {
            println!("      Env: {}={}", key, value);
        }
    }

    Ok(())
}

/// List the cases of one binary, or of every manifest binary
pub async fn list_cases(
    manifest_path: &Path,
    path: Option<&Path>,
    framework: Option<FrameworkKind>,
    json: bool,
) -> Result<()> {
    let binaries = select_binaries(manifest_path, path, framework)?;

    let mut listings = Vec::with_capacity(binaries.len());
    for binary in &binaries {
        let cases = collect_cases(binary)
            .await
            .with_context(|| format!("Failed to list {}", binary.path.display()))?;
        listings.push(Listing {
            binary: binary.display_name(),
            path: binary.path.clone(),
            framework: binary.framework,
            cases,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    for listing in &listings {
        println!("🔍 {} ({}): {} cases", listing.binary, listing.framework, listing.cases.len());
        for case in &listing.cases {
            println!("  {}", case);
        }
    }

    Ok(())
}

fn select_binaries(
    manifest_path: &Path,
    path: Option<&Path>,
    framework: Option<FrameworkKind>,
) -> Result<Vec<TestBinary>> {
    match (path, framework) {
        (Some(path), Some(framework)) => Ok(vec![TestBinary::new(path, framework, DEFAULT_TIMEOUT_MS)]),
        (None, Some(_)) => bail!("--framework needs --path"),
        (path, None) => {
            let manifest = SuiteManifest::load(manifest_path)?;
            let binaries = manifest.test_binaries();
            let Some(path) = path else {
                return Ok(binaries);
            };

            let idx = manifest
                .binaries
                .iter()
                .position(|b| b.path == path)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Binary '{}' not found in manifest (pass --framework to list it anyway)",
                        path.display()
                    )
                })?;
            Ok(vec![binaries[idx].clone()])
        }
    }
}

/// Run the binary's listing command and parse what it printed
pub async fn collect_cases(binary: &TestBinary) -> Result<Vec<String>> {
    let catch2 = if binary.framework == FrameworkKind::Catch2 {
        let help = capture(binary, &["--help".to_string()]).await?;
        Catch2Version::detect(&help)
    } else {
        None
    };

    let output = capture(binary, &list_args(binary.framework, catch2)).await?;
    Ok(parse_listing(binary.framework, &output, &binary.display_name()))
}

/// Stdout followed by stderr; Boost.Test prints its content tree on stderr.
/// Runs behind the manifest harness, so emulated binaries list too.
async fn capture(binary: &TestBinary, args: &[String]) -> Result<String> {
    let (program, argv) = binary.command_line(args.iter().cloned());
    let mut command = Command::new(&program);
    command
        .args(&argv)
        .envs(&binary.env)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(binary.timeout(), command.output())
        .await
        .with_context(|| format!("Timed out after {} ms", binary.timeout_ms))?
        .with_context(|| format!("Failed to launch {}", program.display()))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest_in(dir: &TempDir) -> PathBuf {
        dir.path().join("config").join("suite.json")
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let manifest = manifest_in(&dir);

        init_manifest(&manifest, false).await.unwrap();
        assert!(manifest.exists());
        assert!(init_manifest(&manifest, false).await.is_err());
        init_manifest(&manifest, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_and_remove_binary() {
        let dir = TempDir::new().unwrap();
        let manifest = manifest_in(&dir);
        init_manifest(&manifest, false).await.unwrap();

        add_binary(
            &manifest,
            PathBuf::from("tests/gtest_args"),
            FrameworkKind::GoogleTest,
            vec!["one".into(), "two".into()],
            Some(2000),
            None,
            vec![],
        )
        .await
        .unwrap();

        let loaded = SuiteManifest::load(&manifest).unwrap();
        assert_eq!(loaded.binaries.len(), 1);
        assert_eq!(loaded.binaries[0].args, vec!["one", "two"]);
        assert_eq!(loaded.binaries[0].timeout_ms, Some(2000));

        let duplicate = add_binary(
            &manifest,
            PathBuf::from("tests/gtest_args"),
            FrameworkKind::GoogleTest,
            vec![],
            None,
            None,
            vec![],
        )
        .await;
        assert!(duplicate.is_err());

        remove_binary(&manifest, Path::new("tests/gtest_args"), true)
            .await
            .unwrap();
        assert!(SuiteManifest::load(&manifest).unwrap().binaries.is_empty());

        assert!(remove_binary(&manifest, Path::new("tests/gtest_args"), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manifest = manifest_in(&dir);
        init_manifest(&manifest, false).await.unwrap();

        let result = add_binary(
            &manifest,
            PathBuf::from("tests/qt_test"),
            FrameworkKind::QtTest,
            vec![],
            Some(0),
            None,
            vec![],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_show_without_manifest_fails() {
        let dir = TempDir::new().unwrap();
        assert!(show_manifest(&manifest_in(&dir)).await.is_err());
    }

    #[test]
    fn test_select_unknown_binary_needs_framework() {
        let dir = TempDir::new().unwrap();
        let manifest = manifest_in(&dir);
        SuiteManifest::default().save(&manifest).unwrap();

        assert!(select_binaries(&manifest, Some(Path::new("bin/other")), None).is_err());
        assert!(select_binaries(&manifest, None, Some(FrameworkKind::Catch2)).is_err());

        let direct = select_binaries(&manifest, Some(Path::new("bin/other")), Some(FrameworkKind::Catch2)).unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[cfg(unix)]
    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collect_gtest_cases() {
        let dir = TempDir::new().unwrap();
        let path = script(
            &dir,
            "gtest_list",
            r#"printf 'FooTest.\n  test_success\n  DISABLED_test_disabled\nParamTest/Values.  # TypeParam = int\n  works/0  # GetParam() = 1\n'"#,
        );
        let binary = TestBinary::new(path, FrameworkKind::GoogleTest, 5000);

        let cases = collect_cases(&binary).await.unwrap();
        assert_eq!(
            cases,
            vec![
                "FooTest.test_success",
                "FooTest.DISABLED_test_disabled",
                "ParamTest/Values.works/0",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listing_goes_through_harness() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("harness.log");
        let harness = script(
            &dir,
            "emulator",
            &format!(r#"echo "$@" >> '{}'; exec /bin/sh "$@""#, log.display()),
        );
        // Not executable on its own: only the harness can start it
        let binary_path = dir.path().join("qt_listing");
        std::fs::write(
            &binary_path,
            "#!/bin/sh\nprintf 'initTestCase()\\ntestErrorOne()\\ncleanupTestCase()\\n'\n",
        )
        .unwrap();

        let manifest = manifest_in(&dir);
        let mut suite = SuiteManifest::default();
        suite.harness = vec!["/bin/sh".to_string(), harness.display().to_string()];
        suite
            .add_binary(BinaryEntry::new(&binary_path, FrameworkKind::QtTest))
            .unwrap();
        suite.save(&manifest).unwrap();

        let binaries = select_binaries(&manifest, Some(&binary_path), None).unwrap();
        let cases = collect_cases(&binaries[0]).await.unwrap();
        assert_eq!(cases, vec!["initTestCase", "testErrorOne", "cleanupTestCase"]);

        let logged = std::fs::read_to_string(&log).unwrap();
        assert_eq!(logged.trim(), format!("{} -functions", binary_path.display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collect_catch2_cases_detects_version() {
        let dir = TempDir::new().unwrap();
        let path = script(
            &dir,
            "catch2_list",
            r#"case "$1" in
  --help) echo '  --list-test-names-only  list all/matching test cases names only' ;;
  --list-test-names-only) printf 'Brackets in [test] name\n**Star in test name**\n' ;;
  *) echo "unexpected $1"; exit 1 ;;
esac"#,
        );
        let binary = TestBinary::new(path, FrameworkKind::Catch2, 5000);

        let cases = collect_cases(&binary).await.unwrap();
        assert_eq!(cases, vec!["Brackets in [test] name", "**Star in test name**"]);
    }
}
