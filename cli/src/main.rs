//! Veil wallet command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use veil_store::Db;
use veil_store_lmdb::LmdbBackend;
use veil_types::records::{RefreshGroupRecord, ReserveRecord, WithdrawalGroupRecord};
use veil_types::{Amount, WalletParams};
use veil_wallet_core::client::ExchangeApi;
use veil_wallet_core::{BankClient, ExchangeClient, Wallet, WalletConfig};

#[derive(Parser)]
#[command(name = "veil", about = "Veil anonymous cash wallet")]
struct Cli {
    /// Path to the TOML configuration file. CLI flags and env vars
    /// override file settings.
    #[arg(long, default_value = "veil-wallet.toml", env = "VEIL_CONFIG")]
    config: PathBuf,

    /// Exchange base URL, e.g. "https://exchange.example.com/".
    #[arg(long, env = "VEIL_EXCHANGE_URL")]
    exchange_url: Option<String>,

    /// Currency, e.g. "EUR".
    #[arg(long, env = "VEIL_CURRENCY")]
    currency: Option<String>,

    /// LMDB database directory.
    #[arg(long, env = "VEIL_DB_PATH")]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Start a withdrawal: create a reserve and print funding details.
    Withdraw {
        /// Amount to withdraw, e.g. "EUR:10".
        #[arg(long)]
        amount: Amount,

        /// Bank withdrawal-operation status URL for bank-integrated
        /// withdrawals. Without it the reserve must be funded by a
        /// manual wire transfer.
        #[arg(long)]
        bank_status_url: Option<String>,
    },

    /// Print the spendable and pending balance.
    Balance,

    /// List pending operations and their retry state.
    Status,

    /// Drive pending operations until interrupted.
    Run {
        /// Pause between scheduler passes, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<WalletConfig> {
    let mut config = if cli.config.exists() {
        let cfg = WalletConfig::load(&cli.config)?;
        tracing::info!("Loaded config from {}", cli.config.display());
        cfg
    } else {
        let Some(exchange_url) = cli.exchange_url.clone() else {
            anyhow::bail!(
                "no config file at {} and no --exchange-url given",
                cli.config.display()
            );
        };
        let Some(currency) = cli.currency.clone() else {
            anyhow::bail!("--currency is required without a config file");
        };
        WalletConfig {
            exchange_base_url: exchange_url,
            currency,
            db_path: PathBuf::from("veil-wallet.db"),
            bank_base_url: None,
        }
    };
    if let Some(url) = &cli.exchange_url {
        config.exchange_base_url = url.clone();
    }
    if let Some(currency) = &cli.currency {
        config.currency = currency.clone();
    }
    if let Some(path) = &cli.db_path {
        config.db_path = path.clone();
    }
    Ok(config)
}

fn open_wallet(config: &WalletConfig) -> anyhow::Result<Wallet<ExchangeClient, BankClient>> {
    let backend = LmdbBackend::open(&config.db_path, &veil_store::schema())?;
    let db = Arc::new(Db::new(Box::new(backend)));
    let exchange = ExchangeClient::new(config.exchange_base_url.clone())?;
    let bank = BankClient::new()?;
    Ok(Wallet::new(
        db,
        exchange,
        bank,
        config.exchange_base_url.clone(),
        config.currency.clone(),
        WalletParams::defaults(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    veil_utils::init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let wallet = open_wallet(&config)?;

    match cli.command {
        Command::Withdraw {
            amount,
            bank_status_url,
        } => {
            wallet.update_keys().await?;
            let manual = bank_status_url.is_none();
            let reserve_pub = wallet.create_reserve(amount.clone(), bank_status_url)?;
            tracing::info!(%reserve_pub, %amount, "reserve created");
            println!("Reserve created: {reserve_pub}");
            if manual {
                let exchange = ExchangeClient::new(config.exchange_base_url.clone())?;
                let wire = exchange.get_wire().await?;
                println!("Fund it with a wire transfer of {amount} to one of:");
                for uri in &wire.payto_uris {
                    println!("  {uri}");
                }
                println!("Use the reserve key as the transfer subject.");
            }
            println!("Then run `veil run` to complete the withdrawal.");
        }

        Command::Balance => {
            let balance = wallet.get_balance()?;
            println!("Available:        {}", balance.available);
            println!("Pending incoming: {}", balance.pending_incoming);
        }

        Command::Status => {
            let read = wallet.db().read()?;
            for r in read.iter::<ReserveRecord>()? {
                if !r.status.is_pending() {
                    continue;
                }
                println!(
                    "reserve {} {:?} retries={} last_error={}",
                    r.reserve_pub,
                    r.status,
                    r.retry_info.retry_counter,
                    r.last_error.as_deref().unwrap_or("-"),
                );
            }
            for g in read.iter::<WithdrawalGroupRecord>()? {
                if g.timestamp_finish.is_some() {
                    continue;
                }
                println!(
                    "withdrawal-group {} retries={} last_error={}",
                    g.withdrawal_group_id,
                    g.retry_info.retry_counter,
                    g.last_error.as_deref().unwrap_or("-"),
                );
            }
            for g in read.iter::<RefreshGroupRecord>()? {
                if g.timestamp_finished.is_some() {
                    continue;
                }
                println!(
                    "refresh-group {} retries={} last_error={}",
                    g.refresh_group_id,
                    g.retry_info.retry_counter,
                    g.last_error.as_deref().unwrap_or("-"),
                );
            }
        }

        Command::Run { interval_ms } => {
            tracing::info!(
                exchange = %config.exchange_base_url,
                currency = %config.currency,
                "starting pending-operation runner",
            );
            wallet.update_keys().await?;
            loop {
                let report = wallet.process_pending().await?;
                if report.processed > 0 {
                    tracing::info!(
                        processed = report.processed,
                        failed = report.failed,
                        "pending pass",
                    );
                }
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown signal received");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                }
            }
        }
    }

    Ok(())
}
