use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::debug;
use trc_db::{PgStore, TransactionStore};
use trc_schemas::{micros_to_f64, Scenario, TransactionRecord};

#[derive(Parser)]
#[command(name = "trc")]
#[command(about = "Transaction reconciliation operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Counts of finalized transactions by outcome
    Summary,

    /// Most recent finalized transactions, newest first
    List {
        /// Only this scenario (e.g. AMOUNT_MISMATCH)
        #[arg(long, value_parser = parse_scenario)]
        scenario: Option<Scenario>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Full record for one transaction id
    Show { transaction_id: String },

    /// Per-minute finalize counts over a trailing window
    Volume {
        #[arg(long, default_value_t = 10)]
        minutes: u32,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

fn parse_scenario(s: &str) -> Result<Scenario, String> {
    Scenario::parse(&s.trim().to_ascii_uppercase()).ok_or_else(|| {
        let known: Vec<&str> = Scenario::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown scenario '{s}' (expected one of: {})", known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = trc_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = trc_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_transactions_table={}",
                        s.ok, s.has_transactions_table
                    );
                }
                DbCmd::Migrate => {
                    trc_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
            pool.close().await;
        }

        Commands::Summary => {
            let store = open_store().await?;
            let s = store.summary().await.context("summary query failed")?;
            println!(
                "total={} matched={} pending={} mismatch={}",
                s.total, s.matched, s.pending, s.mismatch
            );
            store.close().await;
        }

        Commands::List { scenario, limit } => {
            let store = open_store().await?;
            let rows = store
                .list(scenario, limit.max(1))
                .await
                .context("list query failed")?;
            for r in &rows {
                println!("{}", list_line(r));
            }
            debug!(rows = rows.len(), "list done");
            store.close().await;
        }

        Commands::Show { transaction_id } => {
            let store = open_store().await?;
            let rec = store
                .find(&transaction_id)
                .await
                .with_context(|| format!("show {transaction_id}"))?;
            println!("{}", serde_json::to_string_pretty(&rec)?);
            store.close().await;
        }

        Commands::Volume { minutes } => {
            let store = open_store().await?;
            let window = chrono::Duration::minutes(i64::from(minutes.max(1)));
            let buckets = store
                .volume_by_minute(window, Utc::now())
                .await
                .context("volume query failed")?;
            for b in buckets {
                println!("{} {}", b.time, b.count);
            }
            store.close().await;
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = trc_config::load_layered_yaml(&path_refs)?;
            // Reject documents the daemon would refuse to start with.
            loaded.engine()?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

async fn open_store() -> Result<PgStore> {
    let pool = trc_db::connect_from_env().await?;
    Ok(PgStore::new(pool))
}

fn list_line(r: &TransactionRecord) -> String {
    format!(
        "{} {} {} {:.2} {}",
        r.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
        r.transaction_id,
        r.scenario,
        micros_to_f64(r.amount_micros),
        r.final_status,
    )
}
