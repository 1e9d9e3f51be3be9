//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`validate`], or [`health`]. Each handler
//! lives in its own submodule.

pub mod health;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::SignpostError;

pub async fn dispatch(cli: Cli) -> Result<(), SignpostError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  signpost v{version}: service discovery aggregator\n\n  \
         No command provided. To get started:\n\n    \
         signpost run                      Start (auto-detects ./signpost.toml)\n    \
         signpost run -c edge.toml         Start with a specific config file\n    \
         signpost validate edge.toml       Check a config file\n    \
         signpost --help                   See all commands and options\n"
    );
}
