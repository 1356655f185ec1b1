use anyhow::{Context, Result};
use clap::Parser;
use render_stream::{logger, Config, RenderStreaming};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "render-stream", about = "Stream to remote viewers through a polling signaling relay")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "RENDER_STREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling relay base URL, overrides the configuration
    #[arg(long, env = "RENDER_STREAM_SIGNALING_URL")]
    signaling_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = cli.signaling_url {
        config.signaling.url = url;
    }
    logger::init(&config.logging);

    let (streaming, _engine) = RenderStreaming::connect(&config)
        .await
        .with_context(|| format!("starting session against {}", config.signaling.url))?;
    let (width, height) = streaming.streaming_size();
    info!(
        session_id = %streaming.session_id(),
        width,
        height,
        "streaming; press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    streaming.shutdown().await;
    Ok(())
}
