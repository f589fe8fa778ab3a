use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::DEFAULT_CONFIG_FILE, ChatMessage, ClientConfig, ClientEvent, ClientHandle, Credential,
    CredentialStore, EnvCredentialStore, MemoryCredentialStore, RealtimeClient,
};
use shared::domain::UserId;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides `server_url` from the config file and `CHAT_SERVER_URL`.
    #[arg(long)]
    server_url: Option<String>,
    /// Bearer token; falls back to `CHAT_TOKEN`.
    #[arg(long)]
    token: Option<String>,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints incoming messages and connection changes until interrupted.
    Listen,
    History {
        #[arg(long)]
        peer: i64,
        #[arg(long)]
        limit: Option<u32>,
    },
    Send {
        #[arg(long)]
        peer: i64,
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut config = ClientConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(server_url) = cli.server_url {
        config = config.with_server_url(server_url);
        config.validate()?;
    }
    let credentials: Arc<dyn CredentialStore> = match cli.token {
        Some(token) => Arc::new(MemoryCredentialStore::new(Some(Credential::new(token)))),
        None => Arc::new(EnvCredentialStore::default()),
    };

    let client = RealtimeClient::new(config, credentials)?;
    let mut events = client.subscribe_events();
    client.connect().await.context("connecting to the message server")?;

    match cli.command {
        Command::Listen => listen(&mut events).await,
        Command::History { peer, limit } => {
            let messages = client.get_chat_history(UserId(peer), limit).await?;
            for message in &messages {
                print_message(message);
            }
            println!("{} message(s)", messages.len());
        }
        Command::Send { peer, text } => {
            let timeout = client.config().request_timeout;
            client.send_message(UserId(peer), &text).await?;
            let confirmed = tokio::time::timeout(timeout, wait_for_confirmation(&mut events, &text))
                .await
                .context("no confirmation from the server")??;
            print_message(&confirmed);
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn listen(events: &mut broadcast::Receiver<ClientEvent>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            event = events.recv() => match event {
                Ok(ClientEvent::MessageReceived(message)) => print_message(&message),
                Ok(ClientEvent::MessageConfirmed(message)) => print_message(&message),
                Ok(ClientEvent::ConnectionChanged(connected)) => {
                    println!("-- {}", if connected { "connected" } else { "disconnected" });
                }
                Ok(ClientEvent::ServerError(message)) => println!("-- server error: {message}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => return,
            },
        }
    }
}

async fn wait_for_confirmation(
    events: &mut broadcast::Receiver<ClientEvent>,
    text: &str,
) -> Result<ChatMessage> {
    loop {
        match events.recv().await {
            Ok(ClientEvent::MessageConfirmed(message)) if message.text == text => {
                return Ok(message)
            }
            Ok(ClientEvent::ServerError(message)) => {
                bail!("server rejected the message: {message}")
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                bail!("event stream closed before the message was confirmed")
            }
        }
    }
}

fn print_message(message: &ChatMessage) {
    let id = message
        .server_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "pending".into());
    println!(
        "[{}] #{id} {} -> {}: {}",
        message.timestamp_iso8601(),
        message.from_username,
        message.to_username,
        message.text
    );
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
