use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canary::api::handlers::{issue_token, page_params, resolve_expiry, token_url, EventListParams, TOKEN_LIST_LIMIT};
use canary::config::{self, Config};
use canary::server::{self, AppState};
use canary::store::memory::MemoryStore;
use canary::store::postgres::PgStore;
use canary::store::{EventStore, TokenStore};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OTLP export is opt-in; without an endpoint we only log locally.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "ssrf-canary"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("OpenTelemetry exporter unavailable, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "canary=debug,ssrf_canary=debug,tower_http=info".into()),
        ))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => run_server(cfg, port, in_memory).await,
        Some(cli::Commands::Token { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_token_command(command, &db, &cfg).await
        }
        Some(cli::Commands::Events { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_event_command(command, &db).await
        }
        None => run_server(cfg, None, false).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: Option<u16>, in_memory: bool) -> anyhow::Result<()> {
    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid APP_HOST: {}", cfg.host))?;
    let addr = SocketAddr::new(host, port.unwrap_or(cfg.port));

    let state = if in_memory {
        tracing::warn!("using in-memory store; recorded events are lost on exit");
        AppState::from_config(cfg, Arc::new(MemoryStore::new()))
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url).await?;

        tracing::info!("Running migrations...");
        db.migrate().await?;

        AppState::from_config(cfg, Arc::new(db))
    };

    tracing::info!(
        rate_limit_max = state.config.rate_limit_max,
        rate_limit_window_secs = state.config.rate_limit_window_secs,
        trust_forwarded_for = state.config.trust_forwarded_for,
        reverse_dns = state.config.reverse_dns,
        "canary configured"
    );

    server::serve(Arc::new(state), addr).await
}

async fn handle_token_command(
    cmd: cli::TokenCommands,
    db: &PgStore,
    cfg: &Config,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Create { owner, expires_in } => {
            let expires_in = expires_in.map(serde_json::Value::from);
            let expires_at = resolve_expiry(expires_in.as_ref(), cfg.token_expiry_secs, chrono::Utc::now());
            let token = issue_token(db, Some(owner), expires_at).await?;
            println!(
                "Token created:\n  Token:   {}\n  URL:     {}\n  Expires: {}",
                token.token,
                token_url(&cfg.base_url, &token.token),
                token
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
        }
        cli::TokenCommands::List => {
            let tokens = db.list_tokens(TOKEN_LIST_LIMIT).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<34} {:<20} {:<8} {}", "TOKEN", "OWNER", "ACTIVE", "EXPIRES");
                for t in tokens {
                    println!(
                        "{:<34} {:<20} {:<8} {}",
                        t.token,
                        t.owner.unwrap_or_default(),
                        t.active,
                        t.expires_at
                            .map(|e| e.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "never".into())
                    );
                }
            }
        }
        cli::TokenCommands::Deactivate { token } => {
            if db.deactivate_token(&token).await? {
                println!("Token deactivated.");
            } else {
                println!("Token not found.");
            }
        }
    }
    Ok(())
}

async fn handle_event_command(cmd: cli::EventCommands, db: &PgStore) -> anyhow::Result<()> {
    match cmd {
        cli::EventCommands::List { page, per } => {
            let (page, per) = page_params(&EventListParams {
                page: Some(page.to_string()),
                per: Some(per.to_string()),
            });
            let (total, events) = db.list_events(page, per).await?;
            println!("{} events total (page {}, {} per page)", total, page, per);
            for e in events {
                println!(
                    "{} {:<34} {:<7} {:<15} {:<5} {}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.token,
                    e.method,
                    e.remote_addr.unwrap_or_else(|| "-".into()),
                    if e.suspicious { "SUSP" } else { "" },
                    e.path
                );
            }
        }
    }
    Ok(())
}
