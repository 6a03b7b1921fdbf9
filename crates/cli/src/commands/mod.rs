//! Command dispatch.

pub mod run;
pub mod session;
pub mod trigger;

use anyhow::Result;

use crate::cli::{Cli, Commands};
use crate::config::SnagConfig;

pub async fn dispatch(cli: Cli) -> Result<()> {
    let config = SnagConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Run => run::run(config).await,
        Commands::Trigger => trigger::run(config).await,
        Commands::Session { action } => session::run(action, &config).await,
    }
}
