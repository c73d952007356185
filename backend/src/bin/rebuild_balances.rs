//! Replays the ledger and corrects balance rows that drifted from it

use std::sync::Arc;

use clap::Parser;
use farm_inventory::{connect_pool, services::ReconciliationService, store::PgLedgerStore, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "rebuild-balances", version, about = "Rebuild inventory balances from the ledger")]
struct Cli {
    /// Only rebuild balances of this product
    #[arg(long)]
    product: Option<Uuid>,

    /// Report what would change without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rebuild_balances=info,farm_inventory=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let db_pool = connect_pool(&config.database).await?;
    let service = ReconciliationService::new(Arc::new(PgLedgerStore::new(db_pool)));
    let report = service.rebuild(cli.product, cli.dry_run).await?;

    println!(
        "Replayed {} entries over {} balances",
        report.entries_replayed, report.balances_checked
    );
    for drift in &report.entry_drifts {
        println!(
            "entry {} (#{}) {}: balance_after {} but replay gives {}",
            drift.entry_id,
            drift.sequence,
            drift.scope.label(),
            drift.recorded,
            drift.replayed
        );
    }
    for correction in &report.balance_corrections {
        println!(
            "balance {} {} product {}: {} -> {}",
            correction.balance_id,
            correction.scope.label(),
            correction.product_id,
            correction.recorded,
            correction.replayed
        );
    }

    if report.is_consistent() {
        println!("Ledger and balances agree");
    } else if cli.dry_run {
        println!("Dry run, no changes written");
    } else if report.applied {
        println!("{} balances corrected", report.balance_corrections.len());
    }

    Ok(())
}
