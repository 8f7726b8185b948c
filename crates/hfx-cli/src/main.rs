//! 🚀 hfx-cli — the front door, the bouncer, the maitre d' of hfx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Parses flags, sets up logging, loads config, then lets the library
//! do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🍯 Stream honeypot events from an hpfeeds broker into Elasticsearch.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file. Used only if it exists; `HFX_*` env vars fill in the rest.
    #[arg(default_value = "hfx.toml")]
    config: PathBuf,

    /// Create one index per honeypot app before starting.
    #[arg(long)]
    init: bool,

    /// Like --init, but delete each matching index first.
    #[arg(long)]
    init_override: bool,

    /// JSON file with the index mapping used by --init.
    #[arg(long, value_name = "PATH")]
    mapping_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG wins; otherwise info and up
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("🍯 hfx v{}", env!("CARGO_PKG_VERSION"));

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = match cli.config.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the config file exists. Maybe a permissions thing, maybe cwd. Was checking here: '{}'",
            cli.config.display()
        )
    })? {
        true => Some(cli.config.as_path()),
        false => None,
    };

    let mut app_config = hfx::app_config::load_config(config_file)
        .context("💀 In hfx-cli, main, we couldn't load the config. Take a look at the file and the HFX_* env vars.")?;

    if cli.init || cli.init_override {
        app_config.bootstrap.enabled = true;
    }
    if cli.init_override {
        app_config.bootstrap.override_existing = true;
    }
    if let Some(mapping_file) = cli.mapping_file {
        app_config.bootstrap.mapping_file = mapping_file;
    }

    if let Err(err) = hfx::run(app_config).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("onnection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("nobody answered")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Double-check the store_config url and that the cluster is actually running. \
                If you're using Docker, `docker ps` is your friend. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
