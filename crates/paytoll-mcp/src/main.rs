#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

mod chains;
mod client;
mod config;
mod errors;
mod executor;
mod paths;
mod registry;
mod retry;
mod rpc;
mod schema;
mod secrets;
mod wallet;
mod wallet_fields;

use crate::chains::evm::EvmSender;
use crate::chains::ChainTable;
use crate::client::{ExactEvmPayer, PaymentSigner, PaytollClient};
use crate::config::{ConfigOverrides, PaytollConfig};
use crate::errors::PaytollError;
use crate::executor::TxExecutor;
use crate::registry::InvocationContext;
use crate::rpc::mcp_server::{ServerState, ServiceInfo};
use crate::secrets::{Platform, SecretSources, SystemRunner};
use crate::wallet::WalletIdentity;

#[derive(Parser, Debug)]
#[command(name = "paytoll-mcp", version)]
struct Cli {
    /// Base URL of the pay-per-call API (overrides config and `PAYTOLL_API_URL`).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Refuse to start without a wallet instead of falling back to the free tier.
    #[arg(long, global = true)]
    require_wallet: bool,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the MCP server over stdin/stdout (default).
    Serve,
    /// Fetch metadata and print the tool list the server would register.
    Tools,
    /// Print resolved config/data/log paths as JSON.
    Paths,
}

fn init_logging(paths: &paths::PaytollPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("paytoll-mcp.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // stdout carries MCP frames; logs never go there.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// `.env` is loaded before path discovery so it can set the dir overrides; the outcome is
/// logged once the subscriber exists.
fn report_dotenv(loaded: Result<std::path::PathBuf, dotenvy::Error>) {
    match loaded {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }
}

fn resolve_wallet(cfg: &PaytollConfig) -> Result<Option<WalletIdentity>, PaytollError> {
    let env = |k: &str| std::env::var(k).ok();
    let sources = SecretSources {
        platform: Platform::current(),
        env: &env,
        runner: &SystemRunner,
    };
    let Some(secret) = secrets::resolve(&cfg.secret, &sources)? else {
        if cfg.require_wallet {
            return Err(PaytollError::Config(format!(
                "a wallet is required but no secret was found (set {} or configure a secret source)",
                cfg.secret.env_var
            )));
        }
        return Ok(None);
    };
    WalletIdentity::from_secret(&secret).map(Some)
}

fn build_client(cfg: &PaytollConfig, wallet: Option<&WalletIdentity>) -> eyre::Result<PaytollClient> {
    let payer = wallet
        .cloned()
        .map(|w| Arc::new(ExactEvmPayer::new(w)) as Arc<dyn PaymentSigner>);
    let client = PaytollClient::new(&cfg.api_url, payer)?;
    if client.is_paid() {
        tracing::info!(api_url = %client.api_url(), "paid mode: 402 challenges will be signed");
    } else {
        tracing::info!(api_url = %client.api_url(), "free tier mode: no wallet configured");
    }
    Ok(client)
}

async fn serve(cfg: PaytollConfig) -> eyre::Result<()> {
    let wallet = resolve_wallet(&cfg)?;
    let client = build_client(&cfg, wallet.as_ref())?;
    let (meta, registry) = registry::register_all(&client, wallet.as_ref())
        .await
        .context("register tools")?;
    if let Some(x402) = &meta.x402 {
        tracing::info!(
            scheme = %x402.scheme,
            networks = ?x402.networks,
            facilitator = %x402.facilitator,
            "payment scheme"
        );
    }

    let chains = ChainTable::new(&cfg.rpc);
    tracing::info!(chains = ?chains.ids().collect::<Vec<_>>(), "transaction execution chains");
    let executor = TxExecutor::new(
        Arc::new(EvmSender::new()?),
        chains,
        cfg.confirmation_timeout(),
    );

    let info = ServiceInfo::new(
        &meta.service,
        client.api_url(),
        wallet.as_ref().map(|w| w.address().to_string()),
        cfg.free_tier_daily_calls,
        registry.len(),
    );
    let state = Arc::new(ServerState {
        registry,
        ctx: InvocationContext {
            client,
            executor,
            wallet,
        },
        info,
    });
    rpc::mcp_server::run(state).await
}

async fn print_tools(cfg: &PaytollConfig) -> eyre::Result<()> {
    use std::io::Write as _;
    let wallet = resolve_wallet(cfg)?;
    let client = build_client(cfg, wallet.as_ref())?;
    let (_, registry) = registry::register_all(&client, wallet.as_ref())
        .await
        .context("register tools")?;
    let s = serde_json::to_string_pretty(&registry.list_tools_result())
        .context("serialize tools")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write tools")?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let dotenv = dotenvy::dotenv();
    let paths = paths::PaytollPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);
    report_dotenv(dotenv);

    let overrides = ConfigOverrides {
        api_url: cli.api_url,
        require_wallet: cli.require_wallet,
    };

    match cli.cmd.unwrap_or(Command::Serve) {
        Command::Serve => {
            let cfg = PaytollConfig::load(&paths, &overrides)?;
            serve(cfg).await.context("mcp server failed")
        }
        Command::Tools => {
            let cfg = PaytollConfig::load(&paths, &overrides)?;
            print_tools(&cfg).await.context("list tools failed")
        }
        Command::Paths => {
            use std::io::Write as _;
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "config_file": paths.config_file(),
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
    }
}
