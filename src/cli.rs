//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Plugin portal: live page server and static site generator
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Output directory path (relative to project root)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Page templates directory path (relative to project root)
    #[arg(short, long)]
    pub pages: Option<PathBuf>,

    /// Plugin catalog directory path (relative to project root)
    #[arg(short = 'd', long)]
    pub catalog: Option<PathBuf>,

    /// Config file name (default: portal.toml)
    #[arg(short = 'C', long, default_value = "portal.toml")]
    pub config: PathBuf,

    /// Print debug diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile every page and write the static site into the output directory
    Build,

    /// Serve pages live. Recompile and regenerate on change automatically
    Serve {
        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// The port you should provide
        #[arg(long)]
        port: Option<u16>,

        /// enable watch
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },

    /// Load the plugin catalog and report validation issues
    Validate,
}

#[allow(unused)]
impl Cli {
    pub const fn is_build(&self) -> bool {
        matches!(self.command, Commands::Build)
    }
    pub const fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }
    pub const fn is_validate(&self) -> bool {
        matches!(self.command, Commands::Validate)
    }
}
