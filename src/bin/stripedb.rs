//! Administrative CLI for a StripeDB store.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stripedb::{ingest, Bptree, Disk, Result, StoreConfig};

#[derive(Parser, Debug)]
#[command(
    name = "stripedb",
    version,
    about = "Administrative CLI for a StripeDB store"
)]
struct Cli {
    /// Path of the store configuration file (TOML).
    #[arg(long, value_name = "FILE", env = "STRIPEDB_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a fresh store and bulk-load it from a CSV file.
    Create {
        /// `;`-delimited input; the first column holds the values.
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
    },
    /// Look up one key and print its value.
    Get {
        /// Key to search for.
        key: u64,
    },
    /// Print the superblock counters.
    Stats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = StoreConfig::from_path(&cli.config)?;
    match cli.command {
        Command::Create { csv } => {
            let disk = Disk::create(&cfg)?;
            let mut tree = Bptree::create(disk)?;
            let loaded = ingest::load_csv(&mut tree, &cfg, &csv)?;
            tree.close()?;
            println!("store created, {loaded} keys loaded");
        }
        Command::Get { key } => {
            let mut tree = Bptree::open(Disk::open(&cfg)?)?;
            match tree.search(key)? {
                Some(value) => {
                    let text = String::from_utf8_lossy(&value);
                    println!("{}", text.trim_end_matches(|c| c == ' ' || c == '\0'));
                }
                None => println!("key {key} not found"),
            }
            tree.close()?;
        }
        Command::Stats => {
            let disk = Disk::open(&cfg)?;
            let sb = disk.super_block();
            println!("encrypted:   {}", disk.is_encrypted());
            println!("height:      {}", sb.height());
            println!("keys:        {}", sb.key_count());
            println!("inner nodes: {}", sb.inner_count());
            println!("leaf nodes:  {}", sb.leaf_count());
            for d in 0..stripedb::types::DISK_COUNT {
                println!("disk {d} next-write offset: {}", sb.next_write_offset(d));
            }
            disk.close()?;
        }
    }
    Ok(())
}
