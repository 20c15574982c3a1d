use clap::Parser;
use llm_relay::config::config_search_paths;
use llm_relay::{build_router, AppState, Gateway, GatewayConfig, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "llm-relay",
    about = "Translating gateway between OpenAI, Anthropic and Responses-style LLM APIs",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Default provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = cli.provider {
        config.default_provider = provider;
    }

    let gateway = Gateway::from_config(&config, Arc::new(MemoryStore::new()))?;

    info!(version = env!("CARGO_PKG_VERSION"), "llm-relay starting");
    info!(
        default_provider = %config.default_provider,
        providers = gateway.providers().len(),
        routes = config.models.len(),
        request_timeout_secs = config.request_timeout_secs,
        "Configured"
    );

    let app = build_router(Arc::new(AppState::new(gateway)));
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI clients:    OPENAI_BASE_URL=http://localhost:{}/v1", config.port);
    info!("  Anthropic clients: ANTHROPIC_BASE_URL=http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
