//! Session inspection commands.
//!
//! # Usage
//!
//! ```bash
//! # Sign in and print the resolved session
//! larder whoami -e a@b.com -p hunter22
//!
//! # Follow a session and print every state change until Ctrl+C
//! larder watch -r <refresh-token>
//!
//! # Sign a session out
//! larder sign-out -r <refresh-token>
//! ```
//!
//! # Environment Variables
//!
//! See `larder_session::config` for the full list.

use std::sync::Arc;

use secrecy::SecretString;

use larder_session::{
    GoTrueClient, PgProfileStore, ProfileResolver, SessionConfig, SessionError, SessionState,
    SessionSync, StoreError, store::create_pool,
};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Sign in with a password, wait for the profile, and print the state.
pub async fn whoami(config: &SessionConfig, email: &str, password: &str) -> CommandResult {
    let client = GoTrueClient::new(&config.auth).map_err(SessionError::from)?;
    client
        .sign_in_with_password(email, password)
        .await
        .map_err(SessionError::from)?;

    let sync = start_engine(config, &client).await?;
    let state = sync.context().wait_until_settled().await?;
    print_state(&state)?;

    sync.shutdown().await;
    Ok(())
}

/// Restore a session and print every state change until interrupted.
pub async fn watch(config: &SessionConfig, refresh_token: String) -> CommandResult {
    let client = GoTrueClient::new(&config.auth).map_err(SessionError::from)?;
    client
        .set_session(&SecretString::from(refresh_token))
        .await
        .map_err(SessionError::from)?;

    let sync = start_engine(config, &client).await?;
    let mut changes = sync.context().changes();
    print_state(&sync.context().state())?;

    let signal = crate::shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            () = &mut signal => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = changes.borrow_and_update().clone();
                print_state(&state)?;
            }
        }
    }

    sync.shutdown().await;
    Ok(())
}

/// Restore a session, then sign it out and print the outcome.
pub async fn sign_out(config: &SessionConfig, refresh_token: String) -> CommandResult {
    let client = GoTrueClient::new(&config.auth).map_err(SessionError::from)?;
    client
        .set_session(&SecretString::from(refresh_token))
        .await
        .map_err(SessionError::from)?;

    let sync = start_engine(config, &client).await?;
    let context = sync.context();
    context.wait_until_settled().await?;

    let outcome = context.sign_out().await?;
    let summary = serde_json::json!({
        "redirect_to": outcome.redirect_to,
        "remote_error": outcome.remote_error.as_ref().map(ToString::to_string),
    });

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if let Some(e) = outcome.remote_error {
        tracing::warn!(error = %e, "Session cleared locally but not revoked at the provider");
    }

    sync.shutdown().await;
    Ok(())
}

async fn start_engine(
    config: &SessionConfig,
    client: &GoTrueClient,
) -> Result<SessionSync, SessionError> {
    let pool = create_pool(&config.database_url)
        .await
        .map_err(StoreError::from)?;
    tracing::info!(table = %config.profile_table, "Database pool created");

    let store = PgProfileStore::new(pool, config.profile_table.clone());
    Ok(SessionSync::start(
        Arc::new(client.clone()),
        ProfileResolver::new(Arc::new(store)),
        config.sync_options(),
    ))
}

fn print_state(state: &SessionState) -> Result<(), serde_json::Error> {
    let json = serde_json::to_string_pretty(state)?;

    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }
    Ok(())
}
