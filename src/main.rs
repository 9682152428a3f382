//! bidmatch-cli entry point.
//!
//! Bootstrap layer around the scheduler core: loads configuration from
//! the environment, initializes logging, reads a newline-delimited batch
//! from a file or stdin, runs it through the runtime, and prints the
//! responses in submission order. Network listeners live in a separate
//! transport binary; this CLI performs no network I/O.
//!
//! ## CLI Subcommands
//!
//! - `bidmatch-cli batch [FILE]` - Process one batch (stdin when FILE is
//!   omitted or `-`); `--diagnostics` adds per-row detail
//! - `bidmatch-cli version` - Print the crate version
//! - `bidmatch-cli help` - Print usage

use std::io::Read;
use std::process::ExitCode;

use bidmatch_core::config;
use bidmatch_core::protocol::RequestHeader;
use bidmatch_core::strategy::BidTable;
use bidmatch_core::telemetry;
use bidmatch_core::{Runtime, RuntimeConfig};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "batch" => run_batch(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("bidmatch-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("unknown command: {other}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn run_batch(args: &[String]) -> ExitCode {
    let env = config::load();
    if let Err(error) = telemetry::init_logging(&env.log) {
        eprintln!("failed to initialize logging: {error}");
        return ExitCode::FAILURE;
    }
    tracing::info!(config = ?env.effective_config(), "starting");

    let diagnostics = args.iter().any(|a| a == "--diagnostics");
    let file = args.iter().find(|a| !a.starts_with("--")).map(String::as_str);

    let raw = match read_input(file) {
        Ok(raw) => raw,
        Err(error) => {
            eprintln!("failed to read batch input: {error}");
            return ExitCode::FAILURE;
        }
    };

    let bids = match std::fs::read_to_string(&env.bid_file) {
        Ok(text) => BidTable::from_lines(&text),
        Err(error) => {
            tracing::warn!(path = %env.bid_file.display(), %error, "no bid inventory, starting empty");
            BidTable::new()
        }
    };

    let config = RuntimeConfig::from_env(&env, bids);
    let message_type = config.strategy.message_type();
    let runtime = Runtime::new(config);
    let mut header = RequestHeader::for_batch(message_type, raw.len());
    header.diagnostics = diagnostics;

    let result = runtime.controller().submit_task(&header, &raw);
    runtime.shutdown();

    match result {
        Ok(response) => {
            for line in &response.lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("batch failed: {error}");
            ExitCode::FAILURE
        }
    }
}

fn read_input(file: Option<&str>) -> std::io::Result<Vec<u8>> {
    match file {
        Some(path) if path != "-" => std::fs::read(path),
        _ => {
            let mut raw = Vec::new();
            std::io::stdin().read_to_end(&mut raw)?;
            Ok(raw)
        }
    }
}

fn print_usage() {
    println!("bidmatch-cli - bid-matching batch server core");
    println!();
    println!("USAGE:");
    println!("  bidmatch-cli batch [FILE] [--diagnostics]   process one batch (stdin if no FILE)");
    println!("  bidmatch-cli version                        print version");
    println!("  bidmatch-cli help                           print this help");
    println!();
    println!("Configuration is read from BIDMATCH_* environment variables.");
}
