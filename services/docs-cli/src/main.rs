//! Document API command-line client
//!
//! Thin front end over the request engine:
//! 1. Loads TOML configuration and the stored credential
//! 2. Signs in (authorization code or password) and out
//! 3. Fetches resources, following next-page links on request
//! 4. Forces a token refresh or reports credential status

mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docs_auth::{FileCredentialStore, now_millis};
use docs_client::Client;
use docs_session::{TokenManager, spawn_refresh_task};
use transport::ReqwestTransport;

use crate::cli::{Args, Command};
use crate::config::Config;

/// How often the background task checks expiry during long listings
const REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config_path = args.config;
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let transport = Arc::new(
        ReqwestTransport::new(&config.transport_config()).context("failed to build HTTP client")?,
    );
    let store = Arc::new(
        FileCredentialStore::load(config.auth.credentials_path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to load credentials from {}",
                    config.auth.credentials_path.display()
                )
            })?,
    );
    let tokens = Arc::new(TokenManager::new(
        store,
        transport.clone(),
        config.auth_config()?,
        config.token_settings(),
    ));

    match args.command {
        Command::Get { path, all } => {
            let client = Client::builder(config.api.base_url.clone(), transport, tokens.clone())
                .retry_policy(config.retry_policy())
                .build();
            let refresher = all.then(|| {
                spawn_refresh_task(
                    tokens.clone(),
                    REFRESH_CHECK_INTERVAL,
                    config.token_settings().min_validity,
                )
            });
            let result = fetch(&client, &path, all).await;
            if let Some(refresher) = refresher {
                refresher.abort();
            }
            result?;
        }
        Command::Refresh => {
            let credential = tokens.refresh().await.context("token refresh failed")?;
            info!(
                expires_in_secs = credential.remaining_millis(now_millis()) / 1000,
                "credential refreshed"
            );
        }
        Command::SignIn {
            code: Some(code), ..
        } => {
            tokens
                .sign_in_with_code(&code)
                .await
                .context("sign-in failed")?;
        }
        Command::SignIn {
            password: Some(username),
            ..
        } => {
            let password = read_password()?;
            tokens
                .sign_in_with_password(&username, &password)
                .await
                .context("sign-in failed")?;
        }
        Command::SignIn { .. } => anyhow::bail!("sign-in needs --code or --password"),
        Command::SignOut => {
            tokens.sign_out().await.context("sign-out failed")?;
        }
        Command::Status => {
            let status = match tokens.current().await? {
                Some(credential) => serde_json::json!({
                    "signed_in": true,
                    "expires_in_secs": credential.remaining_millis(now_millis()) / 1000,
                    "usable": tokens.is_usable(Some(&credential), now_millis()),
                }),
                None => serde_json::json!({ "signed_in": false }),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// GET `path` and print each page as pretty JSON on stdout.
async fn fetch(client: &Client, path: &str, all: bool) -> Result<()> {
    let mut response = client
        .get(path)
        .decode_json::<serde_json::Value>()
        .run()
        .await
        .with_context(|| format!("GET {path} failed"))?;
    let mut pages = 1u32;

    loop {
        let (resource, next, server_date) = response.into_parts();
        println!("{}", serde_json::to_string_pretty(&resource)?);
        info!(page = pages, %server_date, has_next = next.is_some(), "page received");

        match next {
            Some(page) if all => {
                let cursor = page.cursor().to_string();
                response = client
                    .next_page(page)
                    .run()
                    .await
                    .with_context(|| format!("GET {cursor} failed"))?;
                pages += 1;
            }
            _ => break,
        }
    }
    Ok(())
}

/// Password from DOCS_PASSWORD, else the first line of stdin.
fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("DOCS_PASSWORD") {
        return Ok(password);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
