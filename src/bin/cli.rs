//! blocktable admin CLI
//!
//! Inspect and exercise a table from the command line.

use std::path::PathBuf;
use std::process;

use blocktable::{Config, Table};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// blocktable CLI
#[derive(Parser, Debug)]
#[command(name = "blocktable-cli")]
#[command(about = "Admin CLI for the blocktable page allocator")]
#[command(version)]
struct Args {
    /// TOML config file (`db = "..."`)
    #[arg(short, long, conflicts_with = "db")]
    config: Option<PathBuf>,

    /// Metadata store path
    #[arg(long, default_value = "./blocktable_data/meta.redb")]
    db: PathBuf,

    /// Block directory (defaults to `blocks/` next to the metadata store)
    #[arg(long)]
    block_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the metadata store and block directory
    Init,

    /// Acquire pages
    Acquire {
        /// Number of pages
        count: u64,
    },

    /// Release pages by id
    Release {
        /// Page ids
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Create an empty file record
    CreateFile {
        /// File name
        name: String,
    },

    /// List files by name prefix
    Files {
        /// Name prefix
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Show occupancy counts
    Stats,

    /// Check block/page invariants
    Verify,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blocktable=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            process::exit(2);
        }
    };

    let table = match Table::open(config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to open table: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&table, args.command) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn load_config(args: &Args) -> blocktable::Result<Config> {
    if let Some(path) = &args.config {
        return Config::from_toml_file(path);
    }

    let mut builder = Config::builder().metadata_path(&args.db);
    if let Some(dir) = &args.block_dir {
        builder = builder.block_dir(dir);
    }
    let config = builder.build();
    config.validate()?;
    Ok(config)
}

fn run(table: &Table, command: Commands) -> blocktable::Result<()> {
    match command {
        Commands::Init => {
            println!("initialized {}", table.config().metadata_path.display());
        }
        Commands::Acquire { count } => {
            for page in table.acquire_pages(count)? {
                println!(
                    "page {:>8}  block {:>6}  slot {:>6}  {}@{}",
                    page.record.id,
                    page.record.block_id,
                    page.record.block_slot,
                    page.extent,
                    page.extent_offset
                );
            }
        }
        Commands::Release { ids } => {
            let report = table.release_pages(&ids)?;
            println!("released {}", report.released);
            for (id, err) in &report.failures {
                println!("  page {}: {}", id, err);
            }
        }
        Commands::CreateFile { name } => {
            let file = table.create_file(&name)?;
            println!("file {} {:?}", file.id, file.name);
        }
        Commands::Files { prefix } => {
            for file in table.list_files(&prefix)? {
                println!("{:>8}  {:>12}  {}", file.id, file.size, file.name);
            }
        }
        Commands::Stats => {
            let stats = table.stats()?;
            println!("blocks          {}", stats.blocks);
            println!("pages           {} ({} live, {} free)", stats.pages, stats.live_pages, stats.free_pages);
            println!("slots           {}/{}", stats.occupied_slots, stats.total_slots);
            println!("files           {}", stats.files);
        }
        Commands::Verify => {
            let report = table.verify()?;
            println!(
                "{} blocks, {} pages ({} live)",
                report.blocks, report.pages, report.live_pages
            );
            for violation in &report.violations {
                println!("  {}", violation);
            }
            if !report.is_clean() {
                process::exit(3);
            }
            println!("ok");
        }
    }
    Ok(())
}
