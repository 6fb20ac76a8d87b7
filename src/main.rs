// src/main.rs

use anyhow::{Context as _, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use openspm::config::{Config, ConfigOverrides, ConfigSource, DEFAULT_CONFIG_PATH};
use openspm::fetch::HttpFetcher;
use openspm::install::{Installer, InstalledRecords, LogProgress, remove_package};
use openspm::repository::{IndexBuilder, PackageIndex, Registry};
use openspm::resolver::Resolver;
use openspm::store::BlobStore;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "openspm")]
#[command(author, version, about = "Simple package manager with YAML repositories and tag filtering", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding the data store (overrides dataDir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Install destination (overrides targetDir)
    #[arg(long, global = true)]
    target_dir: Option<PathBuf>,

    /// Supported tags, semicolon separated (overrides supported_tags)
    #[arg(long, global = true)]
    tags: Option<String>,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a repository and rebuild the package index
    AddRepo {
        /// Repository base URL
        url: String,
        /// Do not rebuild the package index afterwards
        #[arg(long)]
        no_update: bool,
    },
    /// Remove a repository
    RemoveRepo {
        /// Repository base URL
        url: String,
    },
    /// List configured repositories
    ListRepos,
    /// Refresh repository metadata, then rebuild the package index
    Update,
    /// Refresh repository metadata
    UpdateRepos,
    /// Rebuild the package index from all repositories
    UpdatePackages,
    /// List available packages
    List {
        /// Show installed packages instead
        #[arg(long)]
        installed: bool,
    },
    /// Search package names and descriptions
    Search {
        /// Substring to look for (case-insensitive)
        pattern: String,
    },
    /// Install a package and its dependencies
    Install {
        /// Package name
        name: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove an installed package's files
    Remove {
        /// Package name
        name: String,
    },
    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the --config path
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

/// Objects shared by every store-backed command
struct Session {
    config: Config,
    store: BlobStore,
    fetcher: HttpFetcher,
}

impl Session {
    fn open(config: Config) -> Result<Self> {
        if !config.supported {
            if config.unsupported_msg.is_empty() {
                bail!("OpenSPM is not supported on this system");
            }
            bail!("{}", config.unsupported_msg);
        }

        let store = BlobStore::new(config.data_archive_path());
        store.ensure_created()?;
        let fetcher = HttpFetcher::with_timeout(config.http_timeout())?;

        Ok(Self {
            config,
            store,
            fetcher,
        })
    }

    fn registry(&self) -> Registry<'_> {
        Registry::new(&self.store, &self.fetcher).with_policy(self.config.on_repository_error)
    }

    fn rebuild_index(&self) -> Result<()> {
        let count = IndexBuilder::new(&self.store, &self.fetcher)
            .with_policy(self.config.on_repository_error)
            .rebuild()?;
        println!("Package index updated: {} package(s)", count);
        Ok(())
    }

    fn refresh_repositories(&self) -> Result<()> {
        let report = self.registry().refresh_all()?;
        println!("Refreshed {} repository(ies)", report.refreshed);
        for url in &report.failed {
            println!("  failed: {}", url);
        }
        Ok(())
    }
}

fn init_logging(config: &Config) {
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_ansi(config.color_output)
        .with_writer(io::stderr)
        .init();
}

/// Ask on stdin; anything but y/yes declines
fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn main() {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "openspm", &mut io::stdout());
        return;
    }

    let (mut config, source) = match Config::load(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    config.apply(&ConfigOverrides {
        data_dir: cli.data_dir.clone(),
        target_dir: cli.target_dir.clone(),
        supported_tags: cli.tags.clone(),
        no_color: cli.no_color,
        debug: cli.debug,
    });

    init_logging(&config);
    if source == ConfigSource::Defaults {
        warn!(
            "Config file {} not found or empty, using defaults",
            cli.config.display()
        );
    }

    if let Err(e) = run(cli, config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Some(Commands::AddRepo { url, no_update }) => {
            let session = Session::open(config)?;
            let registry = session.registry();

            let info = registry
                .fetch_info(&url)
                .with_context(|| format!("Failed to read repository at {}", url))?;
            registry.add(info.clone())?;
            println!("Added repository {} ({})", info.name, info.url);

            if !no_update {
                session.rebuild_index()?;
            }
            Ok(())
        }

        Some(Commands::RemoveRepo { url }) => {
            let session = Session::open(config)?;
            session.registry().remove(&url)?;
            println!("Removed repository {}", url);
            println!("Run 'openspm update-packages' to refresh the package index");
            Ok(())
        }

        Some(Commands::ListRepos) => {
            let session = Session::open(config)?;
            let repositories = session.registry().list()?;

            if repositories.is_empty() {
                println!("No repositories configured.");
                return Ok(());
            }

            println!("Repositories:");
            for repo in &repositories {
                println!("  {} - {}", repo.name, repo.url);
                if !repo.description.is_empty() {
                    println!("    {}", repo.description);
                }
                if !repo.maintainer.is_empty() {
                    println!("    Maintainer: {}", repo.maintainer);
                }
            }
            println!("\nTotal: {} repository(ies)", repositories.len());
            Ok(())
        }

        Some(Commands::Update) => {
            let session = Session::open(config)?;
            session.refresh_repositories()?;
            session.rebuild_index()
        }

        Some(Commands::UpdateRepos) => Session::open(config)?.refresh_repositories(),

        Some(Commands::UpdatePackages) => Session::open(config)?.rebuild_index(),

        Some(Commands::List { installed }) => {
            let session = Session::open(config)?;

            if installed {
                let records = InstalledRecords::new(&session.store).list()?;
                if records.is_empty() {
                    println!("No packages installed.");
                    return Ok(());
                }
                println!("Installed packages:");
                for (name, record) in &records {
                    println!(
                        "  {} {} (installed {}, {} files)",
                        name,
                        record.version,
                        record.installed_at,
                        record.files.len()
                    );
                }
                println!("\nTotal: {} package(s)", records.len());
                return Ok(());
            }

            let index = PackageIndex::load(&session.store)?;
            for package in index.iter() {
                println!("  {} {} [{}]", package.name, package.version, package.tags);
            }
            println!("\nTotal: {} package(s)", index.len());
            Ok(())
        }

        Some(Commands::Search { pattern }) => {
            let session = Session::open(config)?;
            let index = PackageIndex::load(&session.store)?;
            let matches = index.search(&pattern);

            if matches.is_empty() {
                println!("No packages match '{}'.", pattern);
                return Ok(());
            }
            for package in &matches {
                println!("  {} {} - {}", package.name, package.version, package.description);
            }
            Ok(())
        }

        Some(Commands::Install { name, yes }) => {
            let session = Session::open(config)?;
            let index = PackageIndex::load(&session.store)?;
            let supported_tags = session.config.supported_tags();
            let packages = Resolver::new(&index, &supported_tags).resolve(&name)?;

            println!("The following packages will be installed:");
            for package in &packages {
                println!("  {} {}", package.name, package.version);
            }
            println!("Target directory: {}", session.config.target_dir.display());

            if !yes && !confirm("Proceed with installation?")? {
                println!("Installation cancelled.");
                return Ok(());
            }

            let installer = Installer::new(&session.store, &session.fetcher, &session.config.target_dir);
            installer.install(&packages, &mut LogProgress::default())?;
            println!("Installed {} package(s)", packages.len());
            Ok(())
        }

        Some(Commands::Remove { name }) => {
            let session = Session::open(config)?;
            let removed = remove_package(&session.store, &session.config.target_dir, &name)?;
            println!("Removed package {} ({} files)", name, removed);
            Ok(())
        }

        Some(Commands::Config { init }) => {
            if init {
                config.save(&cli.config)?;
                info!("Configuration initialized");
                println!("Wrote configuration to {}", cli.config.display());
            } else {
                print!("{}", config.to_yaml()?);
            }
            Ok(())
        }

        Some(Commands::Completions { .. }) => Ok(()),

        None => {
            println!("OpenSPM Package Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'openspm --help' for usage information");
            Ok(())
        }
    }
}
