//! CogniVerse operator CLI
//!
//! Talks to a real backend: session management, simulation lifecycle and
//! permission checks. Tokens persist in the data directory between runs.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cogniverse_core::auth::current_user;
use cogniverse_core::{
    ApiClient, ClientConfig, MemoryTokenStore, PollEvent, SimulationPoller, SimulationSession,
    SledTokenStore, StopReason, TokenStore,
};
use cogniverse_env::{ReqwestTransport, TokioContext};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type Client = ApiClient<ReqwestTransport>;

#[derive(Parser, Debug)]
#[command(name = "cogniverse")]
#[command(about = "Operator CLI for the CogniVerse simulation platform")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config and COGNIVERSE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory for the token store (tokens are kept in memory when unset)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session tokens
    Login {
        #[arg(short, long)]
        username: String,

        /// Password (falls back to COGNIVERSE_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out and forget the stored tokens
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Create a simulation and watch it until it stops
    Create {
        /// Scenario description
        #[arg(short, long)]
        scenario: String,

        /// Agent id or name from your agent list (repeatable, max 5)
        #[arg(short, long = "agent")]
        agents: Vec<String>,

        /// JSON file holding an array of agent records
        #[arg(long)]
        agents_file: Option<PathBuf>,

        /// Return right after creation
        #[arg(long)]
        no_watch: bool,
    },

    /// Poll a simulation and print its events until it stops
    Watch { id: String },

    /// Advance a simulation by some steps, then watch it
    Advance {
        id: String,

        #[arg(short, long, default_value = "1")]
        steps: u32,

        #[arg(long)]
        no_watch: bool,
    },

    /// Trigger a fate twist, then watch the simulation
    Fate {
        id: String,

        /// Twist to inject; the backend picks one when omitted
        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(long)]
        no_watch: bool,
    },

    /// Show the caller's permission level for a module
    Permission { module: String },
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    }
    .with_env_overrides();

    if let Some(url) = &cli.api_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    Ok(config.validate()?)
}

fn open_token_store(config: &ClientConfig) -> Result<Arc<dyn TokenStore>> {
    match config.token_store_path() {
        Some(path) => {
            let store = SledTokenStore::open(&path)
                .with_context(|| format!("opening token store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No data directory configured; the session will not outlive this run");
            Ok(Arc::new(MemoryTokenStore::new()))
        }
    }
}

/// Resolves `--agent` selectors against the caller's agents.
async fn select_agents(client: &Client, selectors: &[String]) -> Result<Vec<Value>> {
    let response = client.get_agents().await?;
    let available: Vec<Value> = match response {
        Value::Array(items) => items,
        other => other
            .get("agents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    };

    selectors
        .iter()
        .map(|selector| {
            available
                .iter()
                .find(|agent| agent_matches(agent, selector))
                .cloned()
                .with_context(|| format!("no agent matches '{}'", selector))
        })
        .collect()
}

fn agent_matches(agent: &Value, selector: &str) -> bool {
    let id_matches = ["agentid", "id"].iter().any(|key| match agent.get(*key) {
        Some(Value::Number(n)) => n.to_string() == selector,
        Some(Value::String(s)) => s == selector,
        _ => false,
    });
    let name_matches = ["agentname", "name"].iter().any(|key| {
        agent
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|name| name.trim().eq_ignore_ascii_case(selector.trim()))
    });
    id_matches || name_matches
}

/// Polls until the loop stops, printing events as they arrive.
async fn watch(poller: &SimulationPoller<TokioContext, Client>, id: &str) -> Result<()> {
    let events = poller.subscribe();
    poller.start(id);
    print_until_stopped(poller, events).await
}

async fn print_until_stopped(
    poller: &SimulationPoller<TokioContext, Client>,
    mut events: UnboundedReceiver<PollEvent>,
) -> Result<()> {
    info!("watching simulation (Ctrl-C to stop)");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PollEvent::NewEvents { events, .. }) => {
                    for event in events {
                        println!("[{}] {}", event.actor, event.text);
                    }
                }
                Some(PollEvent::StatusChanged { status, .. }) => println!("-- status: {}", status),
                Some(PollEvent::TickFailed { error, consecutive, .. }) => {
                    warn!(consecutive, "poll failed: {}", error);
                }
                Some(PollEvent::Stopped { reason, .. }) => {
                    return match reason {
                        StopReason::Terminal(status) => {
                            println!("-- simulation {}", status);
                            Ok(())
                        }
                        StopReason::Cancelled => Ok(()),
                        StopReason::TooManyFailures => bail!("polling gave up after repeated failures"),
                    };
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                poller.stop();
                println!("-- stopped watching");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    debug!(?config, "resolved configuration");

    let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
    let tokens = open_token_store(&config)?;
    let client = Arc::new(ApiClient::new(transport, config.base_url.clone(), Arc::clone(&tokens)));
    let poller = SimulationPoller::new(TokioContext::shared(), Arc::clone(&client), config.poller_config());

    match cli.command {
        Command::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => std::env::var("COGNIVERSE_PASSWORD")
                    .context("pass --password or set COGNIVERSE_PASSWORD")?,
            };
            client.login(&username, &password).await?;
            println!("Logged in as {}", username);
        }

        Command::Logout => {
            if let Err(e) = client.logout().await {
                warn!("logout request failed, local tokens cleared anyway: {}", e);
            }
            println!("Logged out");
        }

        Command::Whoami => {
            let Some(claims) = current_user(tokens.as_ref()) else {
                bail!("not logged in");
            };
            if claims.is_expired_at(SystemTime::now()) {
                println!("Access token expired; it will be refreshed on the next request");
            }
            let verified = client.verify_token().await?;
            println!(
                "user_id: {}\nrole: {}",
                claims.user_id().unwrap_or_else(|| "unknown".to_string()),
                claims.role.as_deref().unwrap_or("unknown")
            );
            println!("{}", serde_json::to_string_pretty(&verified)?);
        }

        Command::Create {
            scenario,
            agents,
            agents_file,
            no_watch,
        } => {
            let mut records = match agents_file {
                Some(path) => {
                    let source = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<Vec<Value>>(&source)
                        .with_context(|| format!("{} is not a JSON array", path.display()))?
                }
                None => Vec::new(),
            };
            if !agents.is_empty() {
                records.extend(select_agents(&client, &agents).await?);
            }

            let session = SimulationSession::new(
                TokioContext::shared(),
                Arc::clone(&client),
                config.poller_config(),
            );
            let events = session.poller().subscribe();
            let simulation = session.create(&scenario, &records).await?;
            println!("Created simulation {}", simulation.id.unwrap_or_default());
            if no_watch {
                session.poller().stop();
            } else {
                print_until_stopped(session.poller(), events).await?;
            }
        }

        Command::Watch { id } => watch(&poller, &id).await?,

        Command::Advance { id, steps, no_watch } => {
            client.advance_simulation(&id, steps).await?;
            println!("Advanced {} by {} step(s)", id, steps);
            if !no_watch {
                watch(&poller, &id).await?;
            }
        }

        Command::Fate { id, prompt, no_watch } => {
            let prompt = prompt.as_deref().map(str::trim).filter(|p| !p.is_empty());
            client.trigger_fate(&id, prompt).await?;
            println!("Fate triggered for {}", id);
            if !no_watch {
                watch(&poller, &id).await?;
            }
        }

        Command::Permission { module } => {
            let permission = client.permission(&module).await;
            println!(
                "{}: {} (read: {}, write: {})",
                permission.module,
                permission.level,
                permission.can_read(),
                permission.can_write()
            );
        }
    }

    Ok(())
}
