//! k2bouncer: command-line front end for checking and syncing decisions.

use clap::{Parser, Subcommand};
use k2bouncer::{Bouncer, Config, Mode};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "k2bouncer")]
#[command(author = "Kaitu.io")]
#[command(version)]
#[command(about = "Resolve ban/captcha remediations from CrowdSec decisions", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true, default_value = "k2bouncer.yaml")]
    config: PathBuf,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one client address and print the verdict
    Check {
        /// Client address
        addr: String,

        /// Request host, used for the captcha session lookup
        #[arg(long, default_value = "")]
        host: String,
    },

    /// Run the stream synchronizer in the foreground
    Sync,

    /// Print the effective configuration, or an annotated example
    PrintConfig {
        /// Print an example configuration instead
        #[arg(long)]
        example: bool,
    },

    /// Validate the configuration file
    Validate,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let result = match cli.command {
        Commands::Check { addr, host } => check(&cli.config, &addr, &host),
        Commands::Sync => run_sync(&cli.config),
        Commands::PrintConfig { example } => print_config(&cli.config, example),
        Commands::Validate => validate(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn check(path: &Path, addr: &str, host: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(path)?;
    let bouncer = Bouncer::from_config(&config)?;

    if let Some(stats) = bouncer.sync_once()? {
        log::info!(
            "Loaded {} addresses and {} ranges",
            stats.addresses_added,
            stats.ranges_added
        );
    }

    let verdict = bouncer.evaluate(addr, host);
    println!("{}", verdict);
    Ok(())
}

fn run_sync(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(path)?;
    if config.mode != Mode::Stream {
        return Err("sync requires mode: stream".into());
    }

    let bouncer = Bouncer::from_config(&config)?;
    let handle = bouncer
        .start()?
        .ok_or("stream synchronizer did not start")?;

    println!(
        "Syncing from {} every {}s (Ctrl-C to stop)",
        config.lapi.url, config.lapi.update_interval_seconds
    );
    handle.join();
    Ok(())
}

fn print_config(path: &Path, example: bool) -> Result<(), Box<dyn std::error::Error>> {
    if example {
        print!("{}", Config::example());
        return Ok(());
    }

    let mut config = Config::load(path)?;
    if !config.lapi.api_key.is_empty() {
        config.lapi.api_key = "<redacted>".to_string();
    }
    if !config.captcha.secret_key.is_empty() {
        config.captcha.secret_key = "<redacted>".to_string();
    }
    if config.cache.redis.password.is_some() {
        config.cache.redis.password = Some("<redacted>".to_string());
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(path)?;
    let trusted = config.parse_trusted_ips()?;

    println!("Configuration OK: {}", path.display());
    println!("  mode: {:?}", config.mode);
    println!("  lapi: {}", config.lapi.url);
    println!("  cache: {:?}", config.cache.backend);
    println!(
        "  captcha: {}",
        config.captcha.provider.as_deref().unwrap_or("disabled")
    );
    println!("  trusted networks: {}", trusted.len());
    Ok(())
}
