//! loopfetch CLI

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use loopfetch::ops::RunError;

mod cmd;

#[derive(Parser)]
#[command(name = "loopfetch")]
#[command(author, version, about = "Resolve and deploy vendor audio-content packages")]
struct Cli {
    /// Show what would happen without making changes
    #[arg(long, global = true)]
    dry_run: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Diff style for 'compare' (unified or context)
    #[arg(long, global = true)]
    compare_style: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Application families to process (garageband, logicpro, mainstage, all)
    #[arg(short, long, num_args = 1..)]
    apps: Vec<String>,

    /// Specific catalog identities to process (e.g. garageband1021.plist)
    #[arg(short, long, num_args = 1..)]
    plists: Vec<String>,

    /// Individual packages to fetch by download name (searches all catalogs)
    #[arg(long, num_args = 1..)]
    packages: Vec<String>,

    /// Include mandatory packages
    #[arg(short, long)]
    mandatory: bool,

    /// Include optional packages
    #[arg(short, long)]
    optional: bool,

    /// Caching proxy, http://example.org:45678 format
    #[arg(short, long, value_name = "URL")]
    cache_server: Option<String>,

    /// Static mirror URL, or a disk image (.dmg) path/URL
    #[arg(long, value_name = "URL|PATH")]
    pkg_server: Option<String>,

    /// External patch document replacing the embedded one
    #[arg(long, value_name = "PATH")]
    patch_file: Option<PathBuf>,

    /// Destination root for downloaded content
    #[arg(short, long, value_name = "PATH")]
    destination: Option<PathBuf>,

    /// Build a compressed disk image of the results at this path
    #[arg(short, long, value_name = "PATH")]
    build_image: Option<PathBuf>,

    /// Use APFS for the built image (requires --build-image)
    #[arg(long)]
    apfs: bool,

    /// Skip TLS certificate validation (not recommended)
    #[arg(long)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download packages to a local destination
    Download {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Download and deploy packages (requires root), cleaning up after
    Deploy {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Diff the package sets of two catalogs from one application family
    Compare {
        /// First catalog (identity or local file)
        manifest_a: String,
        /// Second catalog (identity or local file)
        manifest_b: String,
    },
}

impl RunArgs {
    fn into_options(self, dry_run: bool, quiet: bool) -> cmd::run::RunOptions {
        cmd::run::RunOptions {
            apps: self.apps,
            plists: self.plists,
            packages: self.packages,
            mandatory: self.mandatory,
            optional: self.optional,
            cache_server: self.cache_server,
            pkg_server: self.pkg_server,
            patch_file: self.patch_file,
            destination: self.destination,
            build_image: self.build_image,
            apfs: self.apfs,
            insecure: self.insecure,
            dry_run,
            quiet,
        }
    }
}

/// Console logging plus a per-run log file under `~/.loopfetch/logs`.
/// The run proceeds without a file when the directory cannot be created.
fn init_logging(quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if quiet { "warn" } else { "info" }));

    let file_layer = open_run_log().map(|file| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Arc::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
}

fn open_run_log() -> Option<std::fs::File> {
    loopfetch::try_loopfetch_home()?;
    std::fs::create_dir_all(loopfetch::log_dir()).ok()?;
    std::fs::File::create(loopfetch::run_log_path()).ok()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.quiet);

    let result = match cli.command {
        Commands::Download { args } => {
            if cli.compare_style.is_some() {
                Err(RunError::StyleWithoutCompare)
            } else {
                cmd::run::run(args.into_options(cli.dry_run, cli.quiet), false).await
            }
        }
        Commands::Deploy { args } => {
            if cli.compare_style.is_some() {
                Err(RunError::StyleWithoutCompare)
            } else {
                cmd::run::run(args.into_options(cli.dry_run, cli.quiet), true).await
            }
        }
        Commands::Compare {
            manifest_a,
            manifest_b,
        } => cmd::compare::compare(&manifest_a, &manifest_b, cli.compare_style.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("loopfetch: error: {e}");
        std::process::exit(e.exit_code());
    }
}
