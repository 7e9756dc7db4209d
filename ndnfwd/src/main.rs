use std::path::PathBuf;
use std::process;

use clap::{value_parser, Arg, ArgAction, Command};
use log::{error, info};
use tokio::signal;

mod config;
mod daemon;
mod service;
mod stats;

use config::Config;
use daemon::Daemon;

fn cli() -> Command {
    Command::new("ndnfwd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("NDN forwarder daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .value_parser(value_parser!(PathBuf))
                .default_value("/etc/ndnfw/ndnfwd.toml"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("N")
                .help("Number of forwarding workers, overriding the config file")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level, overriding the config file"),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .help("Print the effective configuration and exit")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("/etc/ndnfw/ndnfwd.toml"));
    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            process::exit(1);
        }
    };
    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.forwarder.workers = workers;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    if matches.get_flag("dump-config") {
        match config.to_toml() {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("Failed to render configuration: {e:#}");
                process::exit(1);
            }
        }
        return;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.level.as_str())).init();

    info!("Starting ndnfwd");
    info!("Config file: {}", config_path.display());

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        process::exit(1);
    }

    let mut daemon = Daemon::new(config);
    if let Err(e) = daemon.start().await {
        error!("Failed to start daemon: {:#}", e);
        daemon.stop().await;
        process::exit(1);
    }

    info!("ndnfwd started successfully");

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }

    info!("Shutting down ndnfwd");
    daemon.stop().await;
}
