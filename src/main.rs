mod broker;
mod config;
mod oauth;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use clap::{Parser, Subcommand};

use broker::CallbackBroker;
use oauth::state::StatePayload;

/// OAuth State Broker — receives an OAuth provider's redirect, decrypts the
/// origin embedded in the `state` token, and redirects the browser back to
/// the application that started the flow.
#[derive(Parser, Debug)]
#[command(name = "oauth-state-broker", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config file and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a state token under the configured secret and print it.
    ///
    /// Token minting normally happens in the upstream application; this is an
    /// operator tool for smoke-testing a deployment.
    Mint {
        /// Origin to redirect back to, e.g. https://app.example.com
        #[arg(long)]
        target: String,

        /// OAuth provider identifier
        #[arg(long, default_value = "github")]
        provider: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Local development convenience; deployments set real environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // CLI --port overrides config and PORT
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }

    if let Some(Command::Mint { target, provider }) = cli.command {
        mint(&cfg, target, provider);
        return;
    }

    tracing::info!(
        secret_configured = cfg.broker.state_secret.as_deref().is_some_and(|s| !s.is_empty()),
        allowed_domains = cfg.broker.allowed_domains.len(),
        "Configuration loaded"
    );

    let broker = Arc::new(CallbackBroker::new(
        cfg.broker.state_secret,
        cfg.broker.allowed_domains,
    ));

    let app = Router::new()
        // Path mirrors the original serverless deployment; the bare alias
        // keeps curl-ability when the service runs standalone.
        .route("/api/callback", any(routes::callback::callback))
        .route("/callback", any(routes::callback::callback))
        .with_state(broker);

    let bind_addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("Listening on {bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {bind_addr}: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}

fn mint(cfg: &config::Config, target: String, provider: String) {
    let Some(secret) = cfg
        .broker
        .state_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        tracing::error!("Cannot mint: no state secret configured");
        std::process::exit(1);
    };

    let payload = StatePayload { target, provider };
    match oauth::state::encrypt(&payload, secret) {
        Ok(token) => {
            println!("{token}");
            println!(
                "example: /api/callback?code=test&state={}",
                urlencoding::encode(&token)
            );
        }
        Err(e) => {
            tracing::error!("Failed to mint token: {e}");
            std::process::exit(1);
        }
    }
}
