//! Cachet CLI: run a resource cache from a TOML config.
//!
//! ```bash
//! cachet serve --config cachet.toml
//! cachet check --config cachet.toml
//! ```
//!
//! See `cachet --help` for all available commands and options.

use anyhow::Context;
use cachet_core::config::{CachetConfig, DEFAULT_CONFIG_FILE};
use cachet_core::http::{AccessLog, CacheServer, Fallback, Router, StaticFiles};
use cachet_core::logging::init_logging;
use cachet_core::notify::{NotifyDisabled, UpdateBridge};
use cachet_core::proxy::WebAppProxy;
use cachet_core::registry::Cacher;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "cachet",
    about = "In-process HTTP resource cache with SSE change feeds",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the cache server
    Serve {
        /// Config file to load
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate a config file and list its resources
    Check {
        /// Config file to load
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, port } => serve(config, port).await,
        Commands::Check { config } => check(config),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load(path: &Path, port: Option<u16>) -> anyhow::Result<CachetConfig> {
    let mut config = CachetConfig::load_from(path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = load(&path, None)?;

    println!("{} is valid", path.display());
    println!("  listen:   {}", config.server.bind_addr());
    println!("  cache:    {} ({:?})", config.cache.mount, config.cache.alias_source);
    if config.notify.enabled {
        println!("  notify:   {} ({:?})", config.notify.mount, config.notify.policy);
    }
    for resource in &config.resources {
        println!(
            "  resource: {} {} {} every {}s",
            resource.alias, resource.method, resource.url, resource.interval_secs
        );
    }
    if let Some(dev_proxy) = &config.dev_proxy {
        println!("  proxy:    {} -> {}", dev_proxy.prefix, dev_proxy.target);
    }
    if let Some(webapp) = &config.webapp {
        println!("  webapp:   {} -> {}", webapp.prefix, webapp.root.display());
    }
    Ok(())
}

async fn serve(path: PathBuf, port: Option<u16>) -> anyhow::Result<()> {
    let config = load(&path, port)?;
    init_logging(&config.logging);

    let cacher = Cacher::new(config.cache.to_options())?;

    let mut router = Router::new().layer(AccessLog).mount(&config.cache.mount, cacher.clone());

    // The bridge must subscribe before resources are added so it sees every update
    router = if config.notify.enabled {
        let bridge = UpdateBridge::attach(&cacher, config.notify.to_options()).await;
        router.mount(&config.notify.mount, bridge)
    } else {
        router.mount(&config.notify.mount, NotifyDisabled)
    };

    for resource in &config.resources {
        let spec = resource.to_spec()?;
        cacher
            .add_resource(spec, None)
            .await
            .with_context(|| format!("Failed to add resource '{}'", resource.alias))?;
    }

    if let Some(dev_proxy) = &config.dev_proxy {
        let proxy = WebAppProxy::new(&dev_proxy.target)?;
        router = router.mount(&dev_proxy.prefix, proxy);
    }

    if let Some(webapp) = &config.webapp {
        let files = StaticFiles::new(&webapp.root).strip_prefix(&webapp.prefix);
        router = match &webapp.fallback {
            Some(fallback) => {
                let handler = Fallback::from_file(files, fallback)
                    .await
                    .with_context(|| format!("Failed to read {}", fallback.display()))?;
                router.mount(&webapp.prefix, handler)
            }
            None => router.mount(&webapp.prefix, files),
        };
    }

    log::info!("Routes: {:?}", router.prefixes());

    let server = CacheServer::bind(config.server.bind_addr(), router).await?;
    log::info!("Cachet listening on http://{}", server.local_addr()?);

    // Stopping the cacher first closes SSE channels so streams end before the drain
    let shutdown_cacher = cacher.clone();
    server
        .run_until(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            shutdown_cacher.stop().await;
        })
        .await?;

    log::info!("Cachet stopped");
    Ok(())
}
