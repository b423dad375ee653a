use anyhow::Context;
use clap::Parser;
use stacksync::cli::commands::{dispatch, inspect, serve};
use stacksync::cli::{Cli, Commands};
use stacksync::{AppContext, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load().context("failed to load settings")?,
    };
    stacksync::logging::init_with_config(&settings.logging);

    let ctx = AppContext::build(settings, tokio::runtime::Handle::current())?;

    match cli.command {
        Commands::Serve => serve::run(&ctx).await?,
        Commands::Handlers => inspect::handlers(&ctx),
        Commands::Monitors => inspect::monitors(&ctx)?,
        Commands::User { event, name } => dispatch::user(&ctx, event.into(), name).await?,
        Commands::Permission { event, permission } => {
            dispatch::permission(&ctx, event.into(), permission.into()).await?
        }
    }

    Ok(())
}
