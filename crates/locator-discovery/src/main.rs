// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locator Discovery CLI
//!
//! # Usage
//!
//! ```bash
//! # Run the proxy with defaults
//! locator-discovery
//!
//! # Only accept locators of one deployment
//! locator-discovery --instance prod
//!
//! # Using configuration file
//! locator-discovery --config locator-discovery.toml
//!
//! # Enumerate locators
//! locator-discovery list --instance prod
//! ```

use clap::{Parser, Subcommand};
use locator_discovery::{start_discovery, DiscoveryConfig, ProxyServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Locator discovery proxy
#[derive(Parser, Debug)]
#[command(name = "locator-discovery")]
#[command(about = "Discovers an RPC locator over multicast and forwards locator requests to it")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only accept locators of this instance
    #[arg(short, long)]
    instance: Option<String>,

    /// Address to accept locator requests on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Lookup endpoints (comma-separated, `udp -h <group> -p <port>`)
    #[arg(long, value_delimiter = ',')]
    lookup: Option<Vec<String>>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List locator deployments answering the lookup
    List {
        /// Only list this instance
        #[arg(short, long)]
        instance: Option<String>,

        /// How long to collect replies (milliseconds)
        #[arg(short, long, default_value = "1000")]
        wait: u64,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "locator-discovery.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = build_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::List { instance, wait } => cmd_list(config, instance, wait).await,
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let server = Arc::new(ProxyServer::bind(config).await?);

    println!("Locator Discovery Proxy v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Listening on {}", server.local_addr());
    for target in server.coordinator().targets() {
        println!("Lookup: {} (replies to {})", target.destination, target.reply);
    }
    if let Some(name) = &server.coordinator().settings().instance_name {
        println!("Instance: {}", name);
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    server.shutdown();
    running.await??;

    let stats = server.coordinator().stats();
    println!("\nFinal Statistics:");
    println!(
        "  {} rounds, {} lookups ({:.1}% failed), {} accepted, {} merged, {} rejected, {} invalidated",
        stats.rounds,
        stats.lookups_sent,
        stats.send_failure_ratio() * 100.0,
        stats.replies_accepted,
        stats.replies_merged,
        stats.replies_rejected,
        stats.invalidations
    );

    Ok(())
}

fn build_config(args: &Args) -> Result<DiscoveryConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => DiscoveryConfig::from_file(path)?,
        None => DiscoveryConfig::default(),
    };

    // Command line overrides the file
    if let Some(instance) = &args.instance {
        config.instance_name = Some(instance.clone());
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(lookup) = &args.lookup {
        config.lookup = lookup.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn cmd_list(
    config: DiscoveryConfig,
    instance: Option<String>,
    wait_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (coordinator, listeners) = start_discovery(&config).await?;

    let instance = instance.or_else(|| config.instance_name.clone());
    let found = coordinator
        .survey(instance.as_deref(), Duration::from_millis(wait_ms))
        .await;

    coordinator.shutdown();
    for listener in listeners {
        let _ = listener.await;
    }

    if found.is_empty() {
        println!("No locator answered within {} ms", wait_ms);
        return Ok(());
    }

    for locator in &found {
        println!("[{}] {}", locator.instance_name(), locator);
    }
    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = DiscoveryConfig {
        lookup: vec!["udp -h 239.255.0.1 -p 4061".into()],
        instance_name: Some("prod".into()),
        ..Default::default()
    };

    let content = format!(
        r#"# Locator Discovery Configuration
# Generated by locator-discovery gen-config

{}
"#,
        config.to_toml()?
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match DiscoveryConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Listen: {}", config.listen);
            println!(
                "Instance: {}",
                config.instance_name.as_deref().unwrap_or("(any)")
            );
            for endpoint in config.lookup_endpoints()? {
                println!("  lookup {}", endpoint);
            }
            println!(
                "Timeout: {} ms x {} attempts, retry delay {} ms",
                config.timeout_ms, config.retry_count, config.retry_delay_ms
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
