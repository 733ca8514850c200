//! depot - package and artifact lifecycle manager CLI

use std::path::PathBuf;

use anyhow::Result;
use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use depot::external::TestOptions;
use depot::gc::GcOptions;
use depot::ops::{
    self, ActivateOptions, AddOptions, Context, InstantiateOptions, RmOptions, StatusOptions,
    UpOptions,
};
use depot::runtime::{Config, Runtime};
use depot::types::{Mode, PackageSpec, PreserveLevel, Tracking, UpgradeLevel, VersionSpec};

#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about = "Package and artifact lifecycle manager for Julia depots")]
struct Cli {
    /// Environment to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum PreserveArg {
    #[default]
    Tiered,
    All,
    Direct,
    Semver,
    None,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LevelArg {
    Fixed,
    Patch,
    Minor,
    #[default]
    Major,
}

#[derive(Subcommand)]
enum Commands {
    /// Add packages to the project
    Add {
        /// Package spec(s): name, name@version, or a repository URL
        #[arg(required = true)]
        packages: Vec<String>,
        #[arg(long, value_enum, default_value = "tiered")]
        preserve: PreserveArg,
        /// Target platform triplet for artifact selection
        #[arg(long)]
        platform: Option<String>,
        /// Fetch registry metadata first
        #[arg(long)]
        update_registry: bool,
    },
    /// Track packages from a local checkout or repository
    Develop {
        #[arg(required = true)]
        packages: Vec<String>,
        #[arg(long, value_enum, default_value = "tiered")]
        preserve: PreserveArg,
    },
    /// Remove packages
    Rm {
        #[arg(required = true)]
        packages: Vec<String>,
        /// Operate on the manifest instead of the project
        #[arg(long)]
        manifest: bool,
    },
    /// Upgrade packages
    Up {
        packages: Vec<String>,
        #[arg(long, value_enum, default_value = "major")]
        level: LevelArg,
        #[arg(long)]
        manifest: bool,
        #[arg(long)]
        update_registry: bool,
    },
    /// Pin packages to their current (or a given) version
    Pin {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Undo pins and stop tracking paths or repositories
    Free {
        #[arg(required = true)]
        packages: Vec<String>,
        #[arg(long)]
        manifest: bool,
    },
    /// Show the environment's contents
    Status {
        #[arg(long)]
        manifest: bool,
    },
    /// Re-resolve the manifest without upgrading
    Resolve,
    /// Download and build everything the manifest names
    Instantiate {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        update_registry: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// Precompile the dependency graph
    Precompile {
        #[arg(long)]
        verbose: bool,
    },
    /// Reclaim unreachable depot content
    Gc {
        /// Grace period in days before unreachable content is deleted
        #[arg(long, default_value_t = 7.0)]
        collect_delay: f64,
        /// Delete unreachable content immediately
        #[arg(long)]
        all: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// Run package test suites
    Test {
        packages: Vec<String>,
        #[arg(long)]
        coverage: bool,
    },
    /// Run package build scripts
    Build {
        packages: Vec<String>,
    },
    /// Revert the last environment change
    Undo,
    /// Re-apply a reverted environment change
    Redo,
    /// Switch the active environment
    Activate {
        target: Option<String>,
        /// Use a shared environment from the depot
        #[arg(long)]
        shared: bool,
        /// Use a throwaway temporary environment
        #[arg(long)]
        temp: bool,
    },
}

/// Parse a CLI package argument: `Name`, `Name@1.2.3`, a filesystem path, or
/// a git URL (optionally `url#rev`).
fn parse_spec(arg: &str) -> Result<PackageSpec> {
    if arg.contains("://") || arg.ends_with(".git") {
        let (source, rev) = match arg.split_once('#') {
            Some((source, rev)) => (source.to_string(), Some(rev.to_string())),
            None => (arg.to_string(), None),
        };
        return Ok(PackageSpec {
            tracking: Tracking::Repo {
                source,
                rev,
                subdir: None,
            },
            ..PackageSpec::default()
        });
    }
    if arg.starts_with('.') || arg.starts_with('/') || arg.starts_with('~') {
        return Ok(PackageSpec {
            tracking: Tracking::Path(PathBuf::from(arg)),
            ..PackageSpec::default()
        });
    }
    let (name, version) = match arg.split_once('@') {
        Some((name, version)) => {
            let version = VersionSpec::parse(version)
                .ok_or_else(|| anyhow::anyhow!("invalid version in {arg}"))?;
            (name, version)
        }
        None => (arg, VersionSpec::Any),
    };
    Ok(PackageSpec {
        name: Some(name.to_string()),
        version,
        ..PackageSpec::default()
    })
}

fn parse_specs(args: &[String]) -> Result<Vec<PackageSpec>> {
    args.iter().map(|arg| parse_spec(arg)).collect()
}

impl From<PreserveArg> for PreserveLevel {
    fn from(arg: PreserveArg) -> Self {
        match arg {
            PreserveArg::Tiered => Self::Tiered,
            PreserveArg::All => Self::All,
            PreserveArg::Direct => Self::Direct,
            PreserveArg::Semver => Self::Semver,
            PreserveArg::None => Self::None,
        }
    }
}

impl From<LevelArg> for UpgradeLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Fixed => Self::Fixed,
            LevelArg::Patch => Self::Patch,
            LevelArg::Minor => Self::Minor,
            LevelArg::Major => Self::Major,
        }
    }
}

fn mode(manifest: bool) -> Mode {
    if manifest {
        Mode::Manifest
    } else {
        Mode::Project
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env_path = match cli.project {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let runtime = Runtime::new(Config::from_env(), env_path);
    let mut ctx = Context::new(runtime);

    match cli.command {
        Commands::Add {
            packages,
            preserve,
            platform,
            update_registry,
        } => {
            let options = AddOptions {
                preserve: preserve.into(),
                platform,
                update_registry,
            };
            ops::add(&mut ctx, &parse_specs(&packages)?, &options).await?;
        }
        Commands::Develop { packages, preserve } => {
            let options = AddOptions {
                preserve: preserve.into(),
                ..AddOptions::default()
            };
            ops::develop(&mut ctx, &parse_specs(&packages)?, &options).await?;
        }
        Commands::Rm { packages, manifest } => {
            let options = RmOptions {
                mode: mode(manifest),
            };
            ops::rm(&mut ctx, &parse_specs(&packages)?, &options).await?;
        }
        Commands::Up {
            packages,
            level,
            manifest,
            update_registry,
        } => {
            let options = UpOptions {
                level: level.into(),
                mode: mode(manifest),
                update_registry,
            };
            ops::up(&mut ctx, &parse_specs(&packages)?, &options).await?;
        }
        Commands::Pin { packages } => {
            ops::pin(&mut ctx, &parse_specs(&packages)?).await?;
        }
        Commands::Free { packages, manifest } => {
            let options = RmOptions {
                mode: mode(manifest),
            };
            ops::free(&mut ctx, &parse_specs(&packages)?, &options).await?;
        }
        Commands::Status { manifest } => {
            ops::status(
                &ctx,
                &StatusOptions {
                    mode: mode(manifest),
                },
            )?;
        }
        Commands::Resolve => {
            ops::resolve(&mut ctx).await?;
        }
        Commands::Instantiate {
            platform,
            update_registry,
            verbose,
        } => {
            let options = InstantiateOptions {
                platform,
                update_registry,
                verbose,
            };
            ops::instantiate(&mut ctx, &options).await?;
        }
        Commands::Precompile { verbose } => {
            ops::precompile(&ctx, verbose).await?;
        }
        Commands::Gc {
            collect_delay,
            all,
            verbose,
        } => {
            let delay_secs = if all {
                0
            } else {
                (collect_delay * 86_400.0) as i64
            };
            let options = GcOptions {
                collect_delay: Duration::seconds(delay_secs),
                verbose,
                now: None,
            };
            ops::gc(&ctx, &options)?;
        }
        Commands::Test { packages, coverage } => {
            let options = TestOptions {
                coverage,
                ..TestOptions::default()
            };
            ops::test(&ctx, &parse_specs(&packages)?, &options).await?;
        }
        Commands::Build { packages } => {
            ops::build(&ctx, &parse_specs(&packages)?).await?;
        }
        Commands::Undo => {
            ops::undo(&mut ctx)?;
        }
        Commands::Redo => {
            ops::redo(&mut ctx)?;
        }
        Commands::Activate {
            target,
            shared,
            temp,
        } => {
            let options = ActivateOptions { shared, temp };
            let dir = ops::activate(&mut ctx, target.as_deref(), &options)?;
            println!("{}", dir.display());
        }
    }
    Ok(())
}
