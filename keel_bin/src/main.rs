//! Command-line entry point: prints a summary of every table in a catalog.
//!
//! Paths come from the first two arguments, falling back to `KEEL_CATALOG`
//! and `KEEL_WAL_PATH`. Buffer pool settings are read from `KEEL_*`
//! variables.

use std::path::PathBuf;
use std::process::ExitCode;

use keel::BufferPoolConfig;
use keel_bin::inspect;

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let catalog_path = args
        .next()
        .or_else(|| std::env::var("KEEL_CATALOG").ok())
        .unwrap_or("catalog.txt".to_string());
    let wal_path = args
        .next()
        .or_else(|| std::env::var("KEEL_WAL_PATH").ok())
        .unwrap_or("keel.wal".to_string());

    let result = BufferPoolConfig::from_env().and_then(|config| {
        inspect(&PathBuf::from(&catalog_path), &PathBuf::from(&wal_path), config)
    });
    match result {
        Ok(summaries) => {
            for s in summaries {
                println!("{}\t{}\t{} pages\t{} tuples", s.name, s.table_id, s.pages, s.tuples);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("inspection of {catalog_path} failed: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
