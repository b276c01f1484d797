//! Auth command handlers.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use draftbench_core::auth::{
    self, Identity, Route, SessionController, SessionEvent, SessionState, TokenStorage,
};
use draftbench_core::config::{Config, paths};
use tokio::sync::mpsc;

/// Builds the desktop session controller for one-shot CLI use.
fn build_session(
    config: &Config,
) -> (
    SessionController<Identity>,
    mpsc::UnboundedReceiver<Route>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let storage = TokenStorage::desktop();
    let provider = Identity::from_config(config);
    (
        SessionController::new(storage, provider, config.token.clone(), tx),
        rx,
    )
}

pub async fn login(config: &Config, token: Option<String>) -> Result<()> {
    let (mut session, _routes) = build_session(config);
    session.start().await;

    // Check if already logged in
    if session.state() == SessionState::LoggedIn {
        let current = session.context().token.clone().unwrap_or_default();
        println!(
            "Already logged in (token: {})",
            auth::mask_token(&current)
        );
        print!("Do you want to replace the existing credentials? [y/N] ");
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().lock().read_line(&mut response)?;
        if !response.trim().eq_ignore_ascii_case("y") {
            println!("Login cancelled.");
            return Ok(());
        }
        session.handle(SessionEvent::LogOut).await;
    }

    let token = match token {
        Some(token) => token.trim().to_string(),
        None => {
            print!("Paste API token: ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().lock().read_line(&mut input)?;
            input.trim().to_string()
        }
    };
    if token.is_empty() {
        anyhow::bail!("Token cannot be empty");
    }

    session
        .handle(SessionEvent::LogIn { token: Some(token) })
        .await;

    match session.state() {
        SessionState::LoggedIn => {
            let stored = session.context().token.clone().unwrap_or_default();
            println!();
            println!("✓ Logged in (token: {})", auth::mask_token(&stored));
            if config.token.is_some() {
                // The resolver returns a developer override as-is, without
                // writing it to any slot.
                println!("  Using developer token override; nothing persisted.");
            } else {
                println!(
                    "  Credentials saved to: {}",
                    paths::credentials_path().display()
                );
            }
            Ok(())
        }
        _ => anyhow::bail!("Login failed: the identity service rejected the token"),
    }
}

pub fn logout() -> Result<()> {
    let storage = TokenStorage::desktop();
    let had_token = storage.any_persisted();
    storage.clear()?;

    if had_token {
        println!("✓ Logged out");
        println!(
            "  Credentials removed from: {}",
            paths::credentials_path().display()
        );
    } else {
        println!("Not logged in (no credentials found).");
    }

    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    let (mut session, _routes) = build_session(config);
    session.start().await;

    match session.state() {
        SessionState::LoggedIn => {
            let token = session.context().token.clone().unwrap_or_default();
            let email = session
                .context()
                .user
                .as_ref()
                .map_or("<unknown>", |user| user.email.as_str());
            println!(
                "Logged in as {email} (token: {})",
                auth::mask_token(&token)
            );
        }
        _ => println!("Logged out. Run `draftbench login` to authenticate."),
    }

    Ok(())
}

pub async fn whoami(config: &Config) -> Result<()> {
    let (mut session, _routes) = build_session(config);
    session.start().await;

    let Some(user) = session.context().user.clone() else {
        anyhow::bail!("Not logged in");
    };

    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}
