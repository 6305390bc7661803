//! Tourbook server binary.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tourbook_kernel::models::User;
use tourbook_kernel::resource::handlers;
use tourbook_kernel::{AppState, Config, build_router};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "ADMIN_PASSWORD")]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, environment = ?config.environment, "Configuration loaded");

    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state, config.port).await,
        Command::CreateAdmin {
            name,
            email,
            password,
        } => create_admin(&state, name, email, password).await,
    }
}

async fn serve(state: AppState, port: u16) -> Result<()> {
    let panicked = CancellationToken::new();
    install_panic_hook(panicked.clone());

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(panicked.clone()))
    .await
    .context("server error")?;

    if panicked.is_cancelled() {
        error!("Shut down after an unhandled panic");
        std::process::exit(1);
    }
    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, SIGTERM, or after a panic anywhere in the process.
async fn shutdown_signal(panicked: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = panicked.cancelled() => error!("Unhandled panic, shutting down"),
    }
}

/// Log panics and ask the server to drain and exit.
///
/// Panics inside request handlers are already turned into 500 responses by
/// the panic-catching layer; this covers background tasks.
fn install_panic_hook(panicked: CancellationToken) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(panic = %info, "unhandled panic");
        default_hook(info);
        panicked.cancel();
    }));
}

async fn create_admin(
    state: &AppState,
    name: String,
    email: String,
    password: String,
) -> Result<()> {
    let mut input = Map::new();
    input.insert("name".to_string(), Value::String(name));
    input.insert("email".to_string(), Value::String(email));
    input.insert("password".to_string(), Value::String(password.clone()));
    input.insert("password_confirm".to_string(), Value::String(password));
    input.insert("role".to_string(), Value::String("admin".to_string()));

    let user = handlers::create::<User>(state, &input)
        .await
        .context("failed to create administrator")?;
    info!(id = %user.id, email = %user.email, "Administrator created");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
