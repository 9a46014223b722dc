// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use hubsync::config::{self, SyncConfig, UpdateSchedule};
use hubsync::hub::{ApiVersion, HubClient};
use hubsync::privilege::Principal;
use hubsync::store::LocalStore;
use hubsync::sync::SyncOrchestrator;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "hubsync")]
#[command(author, version, about = "Keep locally installed content types in sync with a content type hub", long_about = None)]
struct Cli {
    /// Data directory holding the database, staging area and libraries
    #[arg(short, long, global = true, default_value = "/var/lib/hubsync")]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,
    /// Fetch the hub catalog and install eligible updates
    Sync {
        /// Only run if the configured update schedule says a sync is due
        #[arg(long)]
        scheduled: bool,
    },
    /// Show or change sync settings
    Config {
        /// Hub endpoint base, e.g. api.h5p.org/v1
        #[arg(long)]
        endpoint: Option<String>,
        /// How often scheduled syncs run: never, daily or weekly
        #[arg(long)]
        schedule: Option<UpdateSchedule>,
        /// Platform API version as MAJOR.MINOR
        #[arg(long)]
        platform_api: Option<ApiVersion>,
        /// Principal that sync runs act as
        #[arg(long)]
        principal: Option<String>,
    },
    /// List installed content type libraries
    List,
    /// Exclude a library from automatic updates
    Restrict {
        /// Library machine name
        name: String,
        /// Library version as MAJOR.MINOR
        version: String,
        /// Remove the restriction instead
        #[arg(long)]
        lift: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

/// Parse a `MAJOR.MINOR` library version
fn parse_major_minor(version: &str) -> Result<(u32, u32)> {
    let (major, minor) = version
        .split_once('.')
        .with_context(|| format!("Invalid version '{}', expected MAJOR.MINOR", version))?;
    let major = major
        .parse()
        .with_context(|| format!("Invalid major version in '{}'", version))?;
    let minor = minor
        .parse()
        .with_context(|| format!("Invalid minor version in '{}'", version))?;
    Ok((major, minor))
}

fn open_store(root: &Path) -> Result<LocalStore> {
    LocalStore::open(root)
        .with_context(|| format!("Failed to open hubsync data directory {}", root.display()))
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let root = cli.root;

    match cli.command {
        Some(Commands::Init) => {
            info!("Initializing hubsync data directory at: {}", root.display());
            let store = open_store(&root)?;
            SyncConfig::load(store.conn())?.save(store.conn())?;
            println!("Initialized hubsync at: {}", root.display());
            Ok(())
        }
        Some(Commands::Sync { scheduled }) => {
            let store = open_store(&root)?;
            let config = SyncConfig::load(store.conn())?;

            if scheduled {
                let last = config::last_sync(store.conn())?;
                if !config::needs_sync(config.schedule, last.as_deref()) {
                    info!(
                        "No sync due (schedule: {}, last sync: {})",
                        config.schedule,
                        last.as_deref().unwrap_or("never")
                    );
                    return Ok(());
                }
            }

            let client = HubClient::new(&config.endpoint_base)?;
            info!("Syncing against {}", client.base_url());

            let report =
                SyncOrchestrator::new(&config, &client, &client, &store, &store).run_sync();
            config::record_last_sync(store.conn())?;

            if let Some(message) = report.catalog_error {
                anyhow::bail!(message);
            }

            for entry in &report.installed {
                println!("Installed {} (id {})", entry.id, entry.local_id);
            }
            for entry in &report.failed {
                match entry.stage {
                    Some(stage) => println!("Failed {} at {}: {}", entry.id, stage, entry.message),
                    None => println!("Failed {}: {}", entry.id, entry.message),
                }
            }
            println!(
                "{} installed, {} skipped, {} failed",
                report.installed.len(),
                report.skipped.len(),
                report.failed.len()
            );

            if !report.failed.is_empty() {
                anyhow::bail!("{} content type(s) failed to install", report.failed.len());
            }
            Ok(())
        }
        Some(Commands::Config {
            endpoint,
            schedule,
            platform_api,
            principal,
        }) => {
            let store = open_store(&root)?;
            let mut config = SyncConfig::load(store.conn())?;
            let changed = endpoint.is_some()
                || schedule.is_some()
                || platform_api.is_some()
                || principal.is_some();

            if let Some(endpoint) = endpoint {
                config.endpoint_base = config::sanitize_endpoint_base(&endpoint);
            }
            if let Some(schedule) = schedule {
                config.schedule = schedule;
            }
            if let Some(platform_api) = platform_api {
                config.platform_api = platform_api;
            }
            if let Some(principal) = principal {
                config.principal = Principal::new(principal.trim());
            }

            if changed {
                config.save(store.conn())?;
                info!("Saved settings to {}", root.display());
            }

            println!("endpoint:     {}", config.endpoint_base);
            println!("schedule:     {}", config.schedule);
            println!("platform api: {}", config.platform_api);
            println!("principal:    {}", config.principal);
            println!(
                "last sync:    {}",
                config::last_sync(store.conn())?.unwrap_or_else(|| "never".to_string())
            );
            Ok(())
        }
        Some(Commands::List) => {
            let store = open_store(&root)?;
            let packages = store.list_installed()?;

            if packages.is_empty() {
                println!("No content types installed");
                return Ok(());
            }

            for package in &packages {
                println!(
                    "{} {}{}",
                    package.name,
                    package.version,
                    if package.restricted { " [restricted]" } else { "" }
                );
            }
            println!("\nTotal: {} content type(s)", packages.len());
            Ok(())
        }
        Some(Commands::Restrict {
            name,
            version,
            lift,
        }) => {
            let (major, minor) = parse_major_minor(&version)?;
            let store = open_store(&root)?;
            store.set_restricted(&name, major, minor, !lift)?;
            println!(
                "{} {}.{} is now {}",
                name,
                major,
                minor,
                if lift { "unrestricted" } else { "restricted" }
            );
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "hubsync", &mut io::stdout());
            Ok(())
        }
        None => {
            println!("hubsync v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'hubsync --help' for usage information");
            Ok(())
        }
    }
}
