//! CLI commands.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use stockroom_core::api::RegisterRequest;
use stockroom_core::{ApiClient, AuthClient, Config, Session, SessionManager, SessionSignal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    Status,
    Register {
        email: String,
        first_name: String,
        last_name: String,
    },
    Get { path: String },
    Watch,
}

impl Command {
    pub fn parse(args: &[String]) -> Option<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["login"] => Some(Command::Login { email: None }),
            ["login", email] => Some(Command::Login {
                email: Some(email.to_string()),
            }),
            ["logout"] => Some(Command::Logout),
            ["status"] => Some(Command::Status),
            ["register", email, first, last] => Some(Command::Register {
                email: email.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
            }),
            ["get", path] => Some(Command::Get {
                path: path.to_string(),
            }),
            ["watch"] => Some(Command::Watch),
            _ => None,
        }
    }
}

pub async fn run(command: Command, config: Config) -> Result<()> {
    let auth = config.auth_client()?;
    let store = config.session_store()?;
    let manager = SessionManager::new(Arc::new(auth.clone()), store, config.session_options());

    let result = match command {
        Command::Login { email } => login(&manager, config, email).await,
        Command::Logout => {
            manager.logout("");
            println!("Logged out.");
            Ok(())
        }
        Command::Status => status(&manager).await,
        Command::Register {
            email,
            first_name,
            last_name,
        } => register(&auth, email, first_name, last_name).await,
        Command::Get { path } => get(&auth, &manager, &path).await,
        Command::Watch => watch(&manager).await,
    };

    // Restore and login start the renewal loop; let a renewal that is
    // already under way store its tokens before the runtime goes away
    manager.suspend_renewal().await;
    result
}

async fn login(manager: &SessionManager, mut config: Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        bail!("Email is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    println!("\nAuthenticating...");
    let session = match manager.login(&email, &password).await {
        Ok(session) => session,
        Err(e) => bail!("Login failed: {}", e.user_message()),
    };

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}.", display_name(&session));
    Ok(())
}

async fn status(manager: &SessionManager) -> Result<()> {
    let Some(session) = manager.restore().await? else {
        println!("Not logged in.");
        return Ok(());
    };

    println!("Logged in as {}", display_name(&session));
    if let Some(role) = session.profile.as_ref().and_then(|p| p.role.as_deref()) {
        println!("Role: {}", role);
    }
    match session.expires_at() {
        Some(expiry) => println!(
            "Access token expires {} ({} min)",
            expiry.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            session.minutes_until_expiry()
        ),
        None => println!("Access token expiry unknown"),
    }
    Ok(())
}

async fn register(
    auth: &AuthClient,
    email: String,
    first_name: String,
    last_name: String,
) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let request = RegisterRequest {
        email: email.clone(),
        password,
        first_name,
        last_name,
    };
    if let Err(e) = auth.register(&request).await {
        bail!("Registration failed: {}", e.user_message());
    }

    info!(email = %email, "Account registered");
    println!("Account created. Run `stockroom login {}` to sign in.", email);
    Ok(())
}

async fn get(auth: &AuthClient, manager: &SessionManager, path: &str) -> Result<()> {
    if manager.restore().await?.is_none() {
        bail!("Not logged in. Run `stockroom login` first.");
    }

    let api = ApiClient::new(auth, manager.clone());
    let value: serde_json::Value = api
        .get(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch(manager: &SessionManager) -> Result<()> {
    let mut signals = manager.subscribe();
    let Some(session) = manager.restore().await? else {
        bail!("Not logged in. Run `stockroom login` first.");
    };
    println!(
        "Watching session for {} (Ctrl+C to stop)",
        display_name(&session)
    );

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Ok(SessionSignal::Unauthenticated { reason }) => {
                    if reason.is_empty() {
                        println!("Logged out.");
                    } else {
                        println!("{}", reason);
                    }
                    return Ok(());
                }
                Ok(SessionSignal::Authenticated { email }) => {
                    println!("Authenticated as {}", email);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session signals");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn display_name(session: &Session) -> String {
    session
        .profile
        .as_ref()
        .map(|p| p.display_name())
        .unwrap_or_else(|| session.identity.clone())
}
