//! Plugin portal - serves a plugin catalog through live-compiled page templates.

mod build;
mod catalog;
mod cli;
mod compiler;
mod config;
mod error;
mod generator;
mod logger;
mod portal;
mod render;
mod route;
mod serve;
mod watch;

use anyhow::{Context, Result, bail};
use build::build_site;
use clap::Parser;
use cli::{Cli, Commands};
use config::SiteConfig;
use portal::Portal;
use serve::serve_site;
use std::{path::Path, sync::Arc};
use tokio::runtime::Runtime;

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    logger::set_verbose(cli.verbose);
    let config: &'static SiteConfig = Box::leak(Box::new(load_config(cli)?));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("portal")
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match &cli.command {
        Commands::Validate => validate_catalog(config),
        Commands::Build => runtime.block_on(build_site(config)),
        Commands::Serve { .. } => serve_all(config, &runtime),
    }
}

/// Load and validate configuration from CLI arguments
fn load_config(cli: &'static Cli) -> Result<SiteConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    let mut config = if config_path.exists() {
        SiteConfig::from_path(&config_path)?
    } else {
        SiteConfig::default()
    };
    config.update_with_cli(cli);
    config.validate()?;

    Ok(config)
}

fn validate_catalog(config: &'static SiteConfig) -> Result<()> {
    let (plugins, report) = catalog::load(&config.build.catalog)?;
    log!("catalog"; "{} plugins", plugins.len());
    catalog::log_report(&report);

    if report.has_errors() {
        bail!("catalog has {} errors", report.errors().count());
    }
    Ok(())
}

/// Compile every page up front, then hand over to the live server.
fn serve_all(config: &'static SiteConfig, runtime: &Runtime) -> Result<()> {
    let portal = Arc::new(Portal::load(config)?);
    runtime.block_on(portal.compile_all());
    serve_site(portal, runtime)
}
