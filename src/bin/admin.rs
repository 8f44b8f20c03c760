use std::collections::VecDeque;
use std::sync::Arc;

use warranty_core::config::{Config, StorageBackend};
use warranty_core::domain::{
    Collection, CounterField, DocumentFilter, DocumentKey, EntityKind, SequenceName,
};
use warranty_core::flows::TaskService;
use warranty_core::infra::{
    AggregateCounterCascade, DocumentStore, PgDocumentStore, SequenceAllocator,
    SqliteDocumentStore,
};
use warranty_core::telemetry::{init_telemetry, TelemetryConfig};

fn print_help() {
    eprintln!(
        "\
warranty-admin

USAGE:
  warranty-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  sequence-head                   Print the current value of a sequence
  reconcile-complaint             Re-derive a complaint's status from its counters
  audit-counters                  Compare company counters with live child counts

COMMON OPTIONS:
  --database-url <url>            (defaults to env DATABASE_URL)

sequence-head OPTIONS:
  --name <SEQUENCE>               (required) e.g. STORE, TASK

reconcile-complaint OPTIONS:
  --complaint-id <id>             (required)

audit-counters OPTIONS:
  --company-id <id>               (required)
"
    );
}

enum Command {
    Migrate,
    SequenceHead { name: String },
    ReconcileComplaint { complaint_id: String },
    AuditCounters { company_id: String },
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn require(value: Option<String>, flag: &str) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("{flag} is required"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let _ = init_telemetry(&TelemetryConfig::from_env());

    let mut config = Config::from_env();
    let mut name: Option<String> = None;
    let mut complaint_id: Option<String> = None;
    let mut company_id: Option<String> = None;

    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "--database-url" => config.database_url = take_value(&mut args, "--database-url")?,
            "--name" => name = Some(take_value(&mut args, "--name")?),
            "--complaint-id" => complaint_id = Some(take_value(&mut args, "--complaint-id")?),
            "--company-id" => company_id = Some(take_value(&mut args, "--company-id")?),
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    let command = match command.as_str() {
        "migrate" => Command::Migrate,
        "sequence-head" => Command::SequenceHead {
            name: require(name, "--name")?,
        },
        "reconcile-complaint" => Command::ReconcileComplaint {
            complaint_id: require(complaint_id, "--complaint-id")?,
        },
        "audit-counters" => Command::AuditCounters {
            company_id: require(company_id, "--company-id")?,
        },
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}");
        }
    };

    match config.backend()? {
        StorageBackend::Postgres => {
            let store = PgDocumentStore::connect(&config).await?;
            if matches!(command, Command::Migrate) || config.migrate_on_startup {
                store.initialize().await?;
            }
            execute(Arc::new(store), &config, command).await
        }
        StorageBackend::Sqlite => {
            let store = SqliteDocumentStore::connect(&config).await?;
            if matches!(command, Command::Migrate) || config.migrate_on_startup {
                store.initialize().await?;
            }
            execute(Arc::new(store), &config, command).await
        }
    }
}

async fn execute<S: DocumentStore>(
    store: Arc<S>,
    config: &Config,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Migrate => {
            println!("ok: migrations applied");
        }
        Command::SequenceHead { name } => {
            let allocator = SequenceAllocator::new(store);
            let head = allocator.head(&SequenceName::from(name.as_str())).await?;
            println!("{name} {head}");
        }
        Command::ReconcileComplaint { complaint_id } => {
            let tasks = TaskService::new(store, config.retry_config());
            let status = tasks.reconcile_complaint(&complaint_id).await?;
            println!("{complaint_id} {status}");
        }
        Command::AuditCounters { company_id } => {
            let cascade = AggregateCounterCascade::new(store, config.retry_config());
            let company = DocumentKey::company(company_id.as_str());
            let mut drifted = 0;

            for (counter, kind) in [
                (CounterField::Stores, EntityKind::Store),
                (CounterField::ServiceCenters, EntityKind::ServiceCenter),
                (CounterField::Products, EntityKind::Model),
            ] {
                let filter = DocumentFilter::new()
                    .eq("company_id", company_id.as_str())
                    .active();
                let drift = cascade
                    .verify_counter(&company, counter, kind.collection(), &filter)
                    .await?;
                let marker = if drift.is_consistent() { "ok" } else { "DRIFT" };
                println!(
                    "{marker} {counter}: stored={} derived={}",
                    drift.stored, drift.derived
                );
                if !drift.is_consistent() {
                    drifted += 1;
                }
            }

            if drifted > 0 {
                anyhow::bail!(
                    "{drifted} counter(s) on {}/{company_id} drifted",
                    Collection::Companies
                );
            }
        }
    }
    Ok(())
}
