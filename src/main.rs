use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tributary::app::AppContext;
use tributary::cli::{commands, Cli, Commands};
use tributary::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Refresh => {
            commands::refresh(&ctx).await?;
        }
        Commands::Myfeed => {
            commands::refresh_my_feed(&ctx).await?;
        }
        Commands::Articles { feed_id, limit } => {
            commands::list_articles(&ctx, &feed_id, limit)?;
        }
        Commands::Counts => {
            commands::show_counts(&ctx)?;
        }
        Commands::Show { url, category } => {
            commands::show(&ctx, url.as_deref(), category.as_deref()).await?;
        }
        Commands::Read { url } => {
            commands::mark_read(&ctx, &url)?;
        }
        Commands::Media { url } => {
            commands::fetch_media(&ctx, &url).await?;
        }
        Commands::Cleanup => {
            commands::cleanup(&ctx)?;
        }
        Commands::Clear { feed_id } => {
            commands::clear(&ctx, feed_id.as_deref())?;
        }
    }

    Ok(())
}
