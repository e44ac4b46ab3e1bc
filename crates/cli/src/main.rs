//! Larder CLI - Database migrations and session inspection tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! larder migrate
//!
//! # Sign in and print the resolved identity and profile
//! larder whoami -e a@b.com -p hunter22
//!
//! # Follow a session until Ctrl+C
//! larder watch -r <refresh-token>
//!
//! # Sign a session out
//! larder sign-out -r <refresh-token>
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `whoami` - Sign in and print the session state
//! - `watch` - Print every session state change
//! - `sign-out` - Sign a session out and print where to go next

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use larder_session::{ConfigError, SessionConfig, SessionError};

mod commands;

#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version, about = "Larder session tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Sign in and print the resolved session
    Whoami {
        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long)]
        password: String,
    },
    /// Print every session state change until Ctrl+C
    Watch {
        /// Refresh token of the session to follow
        #[arg(short, long)]
        refresh_token: String,
    },
    /// Sign a session out
    SignOut {
        /// Refresh token of the session to sign out
        #[arg(short, long)]
        refresh_token: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &SessionConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Migrations only need a database URL, so a partial config is not fatal yet
    let config = SessionConfig::from_env();

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "larder_session=info,larder_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, config).await;

    if let Err(e) = result {
        match e.downcast_ref::<SessionError>() {
            Some(session_error) => session_error.report(),
            None => tracing::error!("Command failed: {e}"),
        }
        std::process::exit(1);
    }
}

async fn run(
    cli: Cli,
    config: Result<SessionConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config.map_err(SessionError::from);
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Whoami { email, password } => {
            commands::session::whoami(&config?, &email, &password).await?;
        }
        Commands::Watch { refresh_token } => {
            commands::session::watch(&config?, refresh_token).await?;
        }
        Commands::SignOut { refresh_token } => {
            commands::session::sign_out(&config?, refresh_token).await?;
        }
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_config_fails_as_session_error() {
        let cli = Cli::parse_from(["larder", "whoami", "-e", "a@b.com", "-p", "hunter22"]);
        let config = Err(ConfigError::MissingEnvVar("LARDER_AUTH_URL".to_string()));

        let error = run(cli, config).await.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<SessionError>(),
            Some(SessionError::Config(ConfigError::MissingEnvVar(key))) if key == "LARDER_AUTH_URL"
        ));
    }
}
