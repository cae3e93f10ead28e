//! Backend transport CLI - inspect configuration, issue requests and
//! listen on the push channel.
//!
//! This is the main binary entry point. See the `backend_transport`
//! library for the core functionality.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backend_transport::logging::RemoteMonitoring;
use backend_transport::proxy::{configured_proxy, ProxyCredentials};
use backend_transport::push::PushChannelEvent;
use backend_transport::secrets::{default_secret_store, SecretStore};
use backend_transport::{
    AccessToken, Config, Credential, PushConnectionState, PushConsumer, SerialQueue,
    TransportRequest, TransportResponse, TransportSession,
};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Environment variable holding the access token for `listen`.
const ACCESS_TOKEN_VAR: &str = "TRANSPORT_ACCESS_TOKEN";

/// Environment variable holding the password for `proxy-credentials store`.
const PROXY_PASSWORD_VAR: &str = "TRANSPORT_PROXY_PASSWORD";

/// How long `listen` waits for the socket to close on ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// CLI
#[derive(Parser)]
#[command(name = "transport")]
#[command(version)]
#[command(about = "Backend transport: bounded requests, pinned TLS and push events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
    /// Send a GET request through the dispatcher
    Get {
        /// Path relative to the backend URL
        path: String,
    },
    /// Open the push channel and print every payload until ctrl-c
    Listen {
        /// Client identifier registered with the backend
        #[arg(long)]
        client: String,
    },
    /// Manage stored proxy credentials
    #[command(subcommand)]
    ProxyCredentials(ProxyCommand),
}

#[derive(Subcommand)]
enum ProxyCommand {
    /// Store credentials (password read from TRANSPORT_PROXY_PASSWORD)
    Store {
        /// Proxy user name
        #[arg(long)]
        username: String,
    },
    /// Show stored credentials
    Show,
    /// Remove stored credentials
    Clear,
}

/// Prints payloads as JSON lines.
struct StdoutConsumer;

impl PushConsumer for StdoutConsumer {
    fn did_receive(&self, payload: serde_json::Value) {
        println!("{payload}");
    }

    fn did_open(&self) {
        eprintln!("Push channel open.");
    }

    fn did_close(&self, error: Option<&backend_transport::TransportError>) {
        match error {
            Some(e) => eprintln!("Push channel closed: {e}"),
            None => eprintln!("Push channel closed."),
        }
    }
}

/// Load the config and resolve the HTTP proxy before any runtime starts;
/// keyring access blocks.
fn load_with_proxy() -> Result<(Config, Option<reqwest::Proxy>)> {
    let config = Config::load()?;
    let proxy = match config.proxy.as_ref() {
        Some(settings) => configured_proxy(Some(settings), &default_secret_store()?)?,
        None => None,
    };
    Ok((config, proxy))
}

fn new_session(config: Config, proxy: Option<reqwest::Proxy>) -> Result<TransportSession> {
    let monitoring = RemoteMonitoring::local_only(config.monitoring_level);
    TransportSession::new(config, proxy, monitoring)
}

async fn run_get(config: Config, proxy: Option<reqwest::Proxy>, path: String) -> Result<()> {
    let session = new_session(config, proxy)?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    session
        .dispatcher()
        .enqueue(move || {
            Some(TransportRequest::get(path).on_complete(move |response| {
                let _ = tx.send(response);
            }))
        })
        .into_result()?;

    match rx.await.context("request was dropped")? {
        TransportResponse::Completed { status, body } => {
            println!("{status}");
            if let Some(body) = body {
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
        }
        TransportResponse::Failed(reason) => anyhow::bail!("Request failed: {reason}"),
        TransportResponse::Cancelled => anyhow::bail!("Request cancelled"),
    }
    Ok(())
}

async fn run_listen(
    config: Config,
    proxy: Option<reqwest::Proxy>,
    client: String,
    token: String,
) -> Result<()> {
    let session = new_session(config, proxy)?;
    let push = session.push().clone();

    let _events = push.on_event(|event| match event {
        PushChannelEvent::Opened => log::info!("Push channel opened"),
        PushChannelEvent::Closed { error: Some(e) } => log::warn!("Push channel closed: {e}"),
        PushChannelEvent::Closed { error: None } => log::info!("Push channel closed"),
    });

    session.set_credential(Some(Credential::new(AccessToken::bearer(token), client)));
    push.set_consumer(Some((Arc::new(StdoutConsumer), SerialQueue::spawn("stdout"))));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    eprintln!("Shutting down...");

    push.close_and_remove_consumer();
    if push.state() != PushConnectionState::Idle {
        let _ = tokio::time::timeout(
            SHUTDOWN_GRACE,
            push.wait_for_state(PushConnectionState::Closed),
        )
        .await;
    }
    Ok(())
}

fn run_proxy_command(command: ProxyCommand) -> Result<()> {
    let config = Config::load()?;
    let proxy = config
        .proxy
        .context("No proxy configured (set \"proxy\" in config.json or TRANSPORT_PROXY)")?;
    let store: Arc<dyn SecretStore> = default_secret_store()?;

    match command {
        ProxyCommand::Store { username } => {
            let password = std::env::var(PROXY_PASSWORD_VAR)
                .with_context(|| format!("{PROXY_PASSWORD_VAR} is not set"))?;
            ProxyCredentials::new(proxy, username, password).persist(store.as_ref())?;
            println!("Proxy credentials saved.");
        }
        ProxyCommand::Show => match ProxyCredentials::retrieve(&proxy, store.as_ref()) {
            Some(credentials) => println!(
                "{}:{} user {} (password set)",
                proxy.host, proxy.port, credentials.username
            ),
            None => println!("No credentials stored for {}.", proxy.host),
        },
        ProxyCommand::Clear => {
            ProxyCredentials::remove(&proxy, store.as_ref())?;
            println!("Proxy credentials removed.");
        }
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    log::debug!("Run mode: {}", backend_transport::env::RunMode::current());

    match cli.command {
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Get { path } => {
            let (config, proxy) = load_with_proxy()?;
            runtime()?.block_on(run_get(config, proxy, path))?;
        }
        Commands::Listen { client } => {
            let token = std::env::var(ACCESS_TOKEN_VAR)
                .with_context(|| format!("{ACCESS_TOKEN_VAR} is not set"))?;
            let (config, proxy) = load_with_proxy()?;
            runtime()?.block_on(run_listen(config, proxy, client, token))?;
        }
        Commands::ProxyCredentials(command) => run_proxy_command(command)?,
    }

    Ok(())
}
