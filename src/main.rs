use std::env;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use bank_recon::Reconciler;
use bank_recon::csv::{read_commands, read_records, write_balances};
use bank_recon::notify::TracingNotifier;
use bank_recon::store::{InMemoryLedger, LedgerStore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [records_path, commands_path] = args.as_slice() else {
        eprintln!("usage: bank-recon <records.csv> <commands.csv>");
        return ExitCode::from(2);
    };

    for path in [records_path, commands_path] {
        if !path.ends_with(".csv") {
            warn!(path, "input file seems to not be a csv file");
        }
    }

    let records: Vec<_> = match read_records(Path::new(records_path)) {
        Ok(rows) => rows
            .filter_map(|row| row.map_err(|e| warn!("{e}")).ok())
            .collect(),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let commands = match read_commands(Path::new(commands_path)) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(InMemoryLedger::new());
    if let Err(e) = store.load(&records) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    let reconciler = Reconciler::new(store.clone(), Arc::new(TracingNotifier));

    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(cmd) => {
                    if cmd_sender.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    reconciler.run(ReceiverStream::new(cmd_receiver)).await;

    // sweep the ledger as the commands left it, not the rows as first read
    let transfers = match store.transfers().await {
        Ok(transfers) => transfers,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let report = reconciler.sweep(transfers).await;
    info!(
        confirmed = report.confirmed,
        repaired = report.repaired.len(),
        "sweep finished"
    );
    for (transfer_id, e) in &report.failed {
        warn!(transfer_id = %transfer_id, "sweep could not credit: {e}");
    }

    match reconciler.flagged().await {
        Ok(rows) => {
            for row in rows {
                warn!(
                    wallet_tx = row.id,
                    user_id = %row.user_id,
                    reason = row.needs_reconciliation.as_deref().unwrap_or_default(),
                    "wallet row needs operator reconciliation"
                );
            }
        }
        Err(e) => warn!("could not list flagged wallet rows: {e}"),
    }

    if let Err(e) = write_balances(io::stdout().lock(), store.balances()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
