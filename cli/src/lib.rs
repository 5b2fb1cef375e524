//! `delivery` command-line front end over `delivery-core`.

mod build_cmd;
mod config;
mod fetch_cmd;
mod input;
mod parse_cmd;
mod session_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use delivery_core::ConfigSnapshot;
use delivery_core::DeliveryClient;
use delivery_core::JsonFileDataStore;
use delivery_core::ReqwestNetworking;
use delivery_core::StateStore;
use delivery_core::SystemClock;
use delivery_core::services::DeviceContext;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub use build_cmd::BuildArgs;
pub use config::HOME_ENV;
pub use config::delivery_home;
pub use config::parse_config;
pub use fetch_cmd::FetchArgs;
pub use input::RequestInput;
pub use parse_cmd::ParseArgs;
pub use session_cmd::SessionCli;

const STATE_FILE: &str = "state.json";

/// Builds, sends and inspects personalization delivery requests.
#[derive(Debug, Parser)]
#[command(name = "delivery", version)]
pub struct Cli {
    /// TOML configuration with `target.*` / `global.privacy` keys.
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// JSON file holding the persisted identity and session state.
    #[arg(long = "state", value_name = "PATH", global = true)]
    pub state: Option<PathBuf>,

    /// Log at debug level regardless of RUST_LOG.
    #[arg(long = "verbose", short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the request payload for a JSON request description.
    Build(BuildArgs),
    /// Summarise a delivery response.
    Parse(ParseArgs),
    /// Prefetch mboxes over HTTP and print what was cached.
    Prefetch(FetchArgs),
    /// Resolve mbox content over HTTP, prefetching first when asked to.
    Execute(FetchArgs),
    /// Inspect or change the persisted visitor session.
    Session(SessionCli),
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);
    let context = CommandContext::load(cli.config, cli.state)?;
    match cli.command {
        Command::Build(args) => build_cmd::run(&context, args),
        Command::Parse(args) => parse_cmd::run(args),
        Command::Prefetch(args) => fetch_cmd::prefetch(&context, args).await,
        Command::Execute(args) => fetch_cmd::execute(&context, args).await,
        Command::Session(cli) => session_cmd::run(&context, cli),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to serialise output")?;
    println!("{rendered}");
    Ok(())
}

/// Resolved configuration and state location shared by every command.
pub(crate) struct CommandContext {
    config: ConfigSnapshot,
    state_path: PathBuf,
}

impl CommandContext {
    fn load(config: Option<PathBuf>, state: Option<PathBuf>) -> Result<Self> {
        let config = config::load_config(config.as_deref())?;
        let state_path = match state {
            Some(path) => path,
            None => delivery_home()?.join(STATE_FILE),
        };
        debug!("Using state file {}", state_path.display());
        Ok(Self { config, state_path })
    }

    /// A client over the persisted state with the loaded configuration applied.
    pub(crate) fn client(&self, device: DeviceContext) -> Result<DeliveryClient> {
        let store = JsonFileDataStore::open(&self.state_path)?;
        let state = StateStore::new(Arc::new(store), Arc::new(SystemClock));
        let mut client = DeliveryClient::new(state, Arc::new(ReqwestNetworking::new()), device);
        client.update_config(self.config.clone());
        Ok(client)
    }
}
