#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! Small ops tool over the sync engine: inspect the offline queue, run a
//! replay pass, install or activate the asset cache.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use outpost::{HttpTransport, NoNotifier, SyncConfig, SyncEngine};

fn print_usage() {
    eprintln!("Usage: outpost [--config <file>] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status      Show connectivity defaults and the queued actions");
    eprintln!("  sync        Run one replay pass against the server");
    eprintln!("  install     Pre-populate the asset cache");
    eprintln!("  activate    Delete caches from older asset versions");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <file>   TOML configuration (default: built-in defaults)");
    eprintln!("  -h, --help        Show this help");
}

fn parse_args() -> Result<(Option<PathBuf>, String), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut config_path = None;
    let mut command = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => config_path = Some(PathBuf::from(path)),
                    None => return Err("--config requires a value".to_string()),
                }
            }
            "-h" | "--help" => return Err(String::new()),
            other if command.is_none() && !other.starts_with('-') => {
                command = Some(other.to_string());
            }
            other => return Err(format!("unexpected argument: {other}")),
        }
        i += 1;
    }

    match command {
        Some(command) => Ok((config_path, command)),
        None => Err(String::new()),
    }
}

#[tokio::main]
async fn main() -> outpost::Result<()> {
    env_logger::init();

    let (config_path, command) = match parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("Error: {message}");
                eprintln!();
            }
            print_usage();
            std::process::exit(if message.is_empty() { 0 } else { 1 });
        }
    };

    let config = match config_path {
        Some(path) => SyncConfig::load(&path)?,
        None => SyncConfig::default(),
    };

    let transport = Arc::new(HttpTransport::new(&config.api)?);
    let engine = SyncEngine::new(config, transport, Arc::new(NoNotifier)).await?;

    match command.as_str() {
        "status" => {
            let actions = engine.queued_actions().await?;
            println!("cache:  {}", engine.cache().cache_name());
            println!("queued: {} action(s)", actions.len());
            for action in actions {
                println!(
                    "  #{} {} {} ({} bytes, queued {})",
                    action.id,
                    action.method,
                    action.url,
                    action.body.len(),
                    action.queued_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        "sync" => {
            let report = engine.replay_now().await?;
            println!(
                "{} replayed, {} failed, {} expired, {} remaining",
                report.replayed, report.failed, report.expired, report.remaining
            );
        }
        "install" => {
            let count = engine.cache().install().await?;
            println!("installed {count} asset(s) into {}", engine.cache().cache_name());
        }
        "activate" => {
            let deleted = engine.cache().activate().await?;
            if deleted.is_empty() {
                println!("no stale caches");
            } else {
                for name in deleted {
                    println!("deleted {name}");
                }
            }
        }
        other => {
            eprintln!("Error: unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }

    engine.shutdown().await;
    Ok(())
}
