//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! larder migrate
//! ```
//!
//! # Environment Variables
//!
//! - `LARDER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/session/migrations/`:
//! ```text
//! migrations/
//! └── 20260301000001_create_profile.sql
//! ```

use secrecy::SecretString;
use thiserror::Error;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run the profile table migrations.
///
/// # Errors
///
/// Returns `MigrationError` if the database URL is missing, the connection
/// fails, or a migration fails to apply.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("LARDER_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MigrationError::MissingEnvVar("LARDER_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    let pool = larder_session::store::create_pool(&database_url).await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../session/migrations").run(&pool).await?;

    tracing::info!("Migrations complete");
    Ok(())
}
