use anyhow::Context;
use santa_server::{app, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(true)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let bind_addr = config.bind_addr.clone();
    if let Some(path) = &config.persist_path {
        tracing::info!("Persisting games to {}", path.display());
    }

    let state = AppState::from_config(config)
        .await
        .context("Failed to open game store")?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!("Starting server on {}", bind_addr);

    axum::serve(listener, app(state))
        .await
        .context("server error")?;
    Ok(())
}
