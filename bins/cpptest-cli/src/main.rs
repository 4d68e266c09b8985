mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cpptest_common::config::DEFAULT_MANIFEST_PATH;
use cpptest_common::types::FrameworkKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cpptest-cli")]
#[command(about = "cpptest CLI - Maintain the suite manifest and inspect test binaries", long_about = None)]
struct Cli {
    /// Suite manifest to operate on
    #[arg(short, long, global = true, default_value = DEFAULT_MANIFEST_PATH)]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an empty suite manifest
    Init {
        /// Overwrite an existing manifest
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Add a test binary to the manifest
    AddBinary {
        /// Path to the test executable
        #[arg(short, long)]
        path: PathBuf,

        /// Framework the binary links (catch2, boost_test, google_test, qt_test)
        #[arg(short, long)]
        framework: FrameworkKind,

        /// Argument handed to the binary (repeatable)
        #[arg(short, long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Per-binary timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Display name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// Only run these cases (repeatable)
        #[arg(long)]
        filter: Vec<String>,
    },

    /// Remove a test binary from the manifest
    RemoveBinary {
        /// Path as recorded in the manifest
        #[arg(short, long)]
        path: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// Show the binaries in the manifest
    Show,

    /// List the cases a binary contains without running them
    List {
        /// Binary to list; every manifest binary when absent
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Framework of a binary that is not in the manifest
        #[arg(short, long)]
        framework: Option<FrameworkKind>,

        /// Print the listing as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let manifest = cli.manifest.as_path();

    match cli.command {
        Commands::Init { force } => {
            commands::init_manifest(manifest, force).await?;
        }
        Commands::AddBinary {
            path,
            framework,
            args,
            timeout_ms,
            name,
            filter,
        } => {
            commands::add_binary(manifest, path, framework, args, timeout_ms, name, filter).await?;
        }
        Commands::RemoveBinary { path, yes } => {
            commands::remove_binary(manifest, &path, yes).await?;
        }
        Commands::Show => {
            commands::show_manifest(manifest).await?;
        }
        Commands::List {
            path,
            framework,
            json,
        } => {
            commands::list_cases(manifest, path.as_deref(), framework, json).await?;
        }
    }

    Ok(())
}
