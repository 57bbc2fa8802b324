mod api;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deltaflow_core::Config;

fn load_config(profile: Option<&str>) -> Config {
    deltaflow_core::config::load_dotenv();
    match profile {
        Some(p) => Config::for_profile(p),
        None => Config::from_env(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    config.log_summary();

    let addr = config.server.bind_addr();
    let state = Arc::new(state::AppState::from_config(config)?);
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn print_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
    let profiles = Config::available_profiles();
    if !profiles.is_empty() {
        println!("profiles: {}", profiles.join(", "));
    }
    match config.validate() {
        Ok(()) => println!("configuration ok"),
        Err(e) => println!("configuration invalid: {}", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        None => serve(load_config(None)).await?,
        Some("serve") => serve(load_config(args.get(2).map(|s| s.as_str()))).await?,
        Some("config") => print_config(&load_config(args.get(2).map(|s| s.as_str())))?,
        _ => {
            println!("deltaflow-server v{}", env!("CARGO_PKG_VERSION"));
            println!("Usage: deltaflow-server <command>");
            println!("  serve [profile]    Start HTTP server (default command)");
            println!("  config [profile]   Print the resolved configuration with secrets redacted");
        }
    }

    Ok(())
}
