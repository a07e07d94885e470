//! api-guard - API token authentication and per-identity rate limiting
//!
//! This is the main entry point: it serves the HTTP API and provides
//! subcommands for managing identities from the command line.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use api_guard::auth::AuthManager;
use api_guard::config::Config;
use api_guard::database::SqliteDatabase;
use api_guard::models::{CreateIdentityRequest, CreatedIdentity, Identity, RateSettings};
use api_guard::otel::{init_tracing, AuthMetrics, OtelProvider};
use api_guard::server::{AppState, Server};

/// api-guard - API token authentication and per-identity rate limiting
#[derive(Parser, Debug)]
#[command(name = "api-guard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "API_GUARD_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    #[command(flatten)]
    Admin(AdminCommand),
}

/// Identity and settings administration against the local database
#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Store global settings and create a first identity if none exists
    Install {
        /// Require an API token on every protected request
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        token_only: bool,

        /// Default per-minute quota (0 = unlimited)
        #[arg(long, default_value_t = 120)]
        default_rate: i64,

        /// Name of the bootstrap identity
        #[arg(long, default_value = "api-root")]
        bootstrap_user: String,

        /// Per-minute quota of the bootstrap identity
        #[arg(long, default_value_t = 120)]
        bootstrap_rate: i64,
    },

    /// Create an identity and print its token
    Create {
        #[arg(long)]
        name: String,

        /// Per-minute quota (0 = use the default)
        #[arg(long, default_value_t = 0)]
        rate: i64,
    },

    /// List identities
    List,

    /// Enable an identity
    Enable {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },

    /// Disable an identity
    Disable {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },

    /// Delete an identity
    Delete {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },

    /// Replace the token of an identity and print the new one
    Rotate {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },

    /// Set the per-minute quota of an identity
    Rate {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,

        /// Per-minute quota (0 = use the default)
        #[arg(long)]
        rate: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Admin(command) => {
            let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
            let manager = AuthManager::new(database, config.auth.clone());
            run_admin(&manager, command).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting api-guard");

    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let metrics = AuthMetrics::new(&otel_provider.meter());
    let auth_manager = Arc::new(AuthManager::with_metrics(
        Arc::clone(&database),
        config.auth.clone(),
        metrics,
    ));
    info!(
        token_only = config.auth.token_only,
        default_quota_per_minute = config.auth.default_quota_per_minute,
        "Authentication manager initialized"
    );

    let state = AppState {
        auth_manager,
        database,
    };

    let server = Server::new(config.server.clone(), state);
    let result = server.run(shutdown_signal()).await;

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("api-guard shutdown complete");

    result.map_err(Into::into)
}

async fn run_admin(
    manager: &AuthManager<SqliteDatabase>,
    command: AdminCommand,
) -> anyhow::Result<()> {
    match command {
        AdminCommand::Install {
            token_only,
            default_rate,
            bootstrap_user,
            bootstrap_rate,
        } => {
            let settings = RateSettings {
                token_only,
                default_quota_per_minute: default_rate,
            };
            let bootstrap = CreateIdentityRequest::new(bootstrap_user).with_quota(bootstrap_rate);

            match manager.install(settings, bootstrap).await? {
                Some(created) => print_created("Bootstrap identity created", &created),
                None => println!("Identities already exist; no bootstrap identity created"),
            }
            println!(
                "Settings stored: token_only={} default_rate={}",
                token_only,
                default_rate.max(0)
            );
        }
        AdminCommand::Create { name, rate } => {
            let created = manager
                .create_identity(CreateIdentityRequest::new(name).with_quota(rate))
                .await?;
            print_created("Identity created", &created);
        }
        AdminCommand::List => {
            let identities = manager.list_identities().await?;
            print!("{}", render_table(&identities));
        }
        AdminCommand::Enable { id } => {
            manager.set_enabled(id, true).await?;
            println!("Identity {} enabled", id);
        }
        AdminCommand::Disable { id } => {
            manager.set_enabled(id, false).await?;
            println!("Identity {} disabled", id);
        }
        AdminCommand::Delete { id } => {
            manager.delete_identity(id).await?;
            println!("Identity {} deleted", id);
        }
        AdminCommand::Rotate { id } => {
            let rotated = manager.rotate_identity(id).await?;
            print_created("Token rotated", &rotated);
        }
        AdminCommand::Rate { id, rate } => {
            manager.update_quota(id, rate).await?;
            println!("Identity {} rate set to {}/min", id, rate.max(0));
        }
    }

    Ok(())
}

fn print_created(headline: &str, created: &CreatedIdentity) {
    println!(
        "{}: id={} name={}",
        headline, created.identity.id, created.identity.name
    );
    println!("Token (shown once): {}", created.token);
}

/// Render identities as an aligned text table
fn render_table(identities: &[Identity]) -> String {
    let header = ["ID", "NAME", "ENABLED", "RATE/MIN", "LAST USED"];
    let rows: Vec<[String; 5]> = identities
        .iter()
        .map(|i| {
            [
                i.id.to_string(),
                i.name.clone(),
                i.enabled.to_string(),
                i.quota_per_minute.to_string(),
                i.last_used_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };

    push_row(&header);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&cells);
    }

    out
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
