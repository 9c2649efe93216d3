//! CLI dump utility: print the contents of a logbase's internal files in a
//! human-readable form (spec §6, "CLI surface (out of core)").

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, LevelFilter};

use logbase::{Logbase, Result};

/// Args for logbase-dump
#[derive(Parser)]
#[clap(author, version, about)]
struct DumpArgs {
    /// Path to the logbase directory
    #[clap(short, long, value_parser)]
    path: PathBuf,
    /// Dump log file number n
    #[clap(short, long, value_parser)]
    log: Option<u32>,
    /// Dump index file number n
    #[clap(short, long, value_parser)]
    index: Option<u32>,
    /// Dump the master catalog
    #[clap(short, long, action)]
    master: bool,
    /// Dump the zapmap
    #[clap(short, long, action)]
    zapmap: bool,
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{}", e);
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = DumpArgs::parse();
    let logbase = Logbase::open(&args.path)?;

    if let Some(n) = args.log {
        for line in logbase.dump_log(n)? {
            println!("{line}");
        }
    }
    if let Some(n) = args.index {
        for line in logbase.dump_index(n)? {
            println!("{line}");
        }
    }
    if args.master {
        for line in logbase.dump_master() {
            println!("{line}");
        }
    }
    if args.zapmap {
        for line in logbase.dump_zapmap() {
            println!("{line}");
        }
    }

    Ok(())
}
