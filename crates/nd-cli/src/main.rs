#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod logging;

use clap::Parser;
use miette::{miette, IntoDiagnostic, Result};
use nd_core::Project;
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser, Debug)]
#[command(name = "nd")]
#[command(version, about = "Run your node app", long_about = None)]
struct Cli {
    /// Set the node project root (defaults to the current directory)
    #[arg(short, long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(clap::Subcommand, Debug)]
enum Cmd {
    /// Install dependencies, then run node with the given arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Ensure all node modules are installed
    #[command(name = ":refresh")]
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let root = match cli.project {
        Some(root) => root,
        None => std::env::current_dir().into_diagnostic()?,
    };

    match cli.command {
        Cmd::Run { args } => {
            Project::load(&root)
                .await
                .map_err(|e| miette!("{e}"))?;

            let status = Command::new("node")
                .args(&args)
                .current_dir(&root)
                .status()
                .into_diagnostic()?;
            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }
        Cmd::Refresh => {
            Project::load(&root)
                .await
                .map_err(|e| miette!("{e}"))?;
        }
    }

    Ok(())
}
