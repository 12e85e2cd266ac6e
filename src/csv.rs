use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::Amount;
use crate::engine::ReconcileCommand;
use crate::model::{Actor, LedgerSource, TransferRecord, UserId};
use crate::status::{MalformedStatus, SemanticStatus, normalize};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unknown ledger source '{source_name}'")]
    UnknownSource { line: usize, source_name: String },

    #[error("line {line}: amount {amount} is not positive")]
    NonPositiveAmount { line: usize, amount: Amount },

    #[error("line {line}: amount {amount} is out of range")]
    AmountOutOfRange { line: usize, amount: f64 },

    #[error("line {line}: {source}")]
    Status {
        line: usize,
        source: MalformedStatus,
    },

    #[error("line {line}: unknown actor '{actor}'")]
    UnknownActor { line: usize, actor: String },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    id: String,
    source: String,
    user: UserId,
    reference: String,
    amount: f64,
    status: String,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommandRow {
    transfer: String,
    status: String,
    actor: String,
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    user: UserId,
    balance: String,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

fn parse_source(line: usize, raw: &str) -> Result<LedgerSource, CsvError> {
    match raw.to_lowercase().as_str() {
        "transfer" | "transfer-ledger" => Ok(LedgerSource::TransferLedger),
        "wallet" | "wallet-ledger" => Ok(LedgerSource::WalletLedger),
        _ => Err(CsvError::UnknownSource {
            line,
            source_name: raw.to_string(),
        }),
    }
}

/// `admin`, `admin:<name>`, `system` or `user:<id>`.
fn parse_actor(line: usize, raw: &str) -> Result<Actor, CsvError> {
    match raw.split_once(':') {
        None if raw == "admin" => Ok(Actor::Admin(raw.to_string())),
        None if raw == "system" => Ok(Actor::System),
        Some(("admin", name)) if !name.is_empty() => Ok(Actor::Admin(name.to_string())),
        Some(("user", id)) if !id.is_empty() => Ok(Actor::User(id.to_string())),
        _ => Err(CsvError::UnknownActor {
            line,
            actor: raw.to_string(),
        }),
    }
}

/// Read ledger rows from a csv file.
///
/// Unrecognized statuses are logged and read as `Pending`.
///
/// The returned iterator owns the open file and does not borrow `path`.
pub fn read_records(
    path: &Path,
) -> Result<impl Iterator<Item = Result<TransferRecord, CsvError>> + use<>, CsvError> {
    let reader = open(path)?;

    Ok(reader
        .into_deserialize::<RecordRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let source = parse_source(line, &row.source)?;

            let amount = Amount::from_float(row.amount).ok_or(CsvError::AmountOutOfRange {
                line,
                amount: row.amount,
            })?;
            if !amount.is_positive() {
                return Err(CsvError::NonPositiveAmount { line, amount });
            }

            let normalized = normalize(&row.status);
            if let Some(e) = &normalized.unrecognized {
                warn!(line, transfer_id = %row.id, "{e}, reading as pending");
            }

            let status = normalized.status;
            Ok(TransferRecord {
                id: row.id,
                reference: row.reference,
                amount,
                user_id: row.user,
                status,
                processed: status.marks_processed(),
                processed_at: None,
                notes: String::new(),
                source,
                created_at: row.created_at,
            })
        }))
}

/// Read reconciliation commands from a csv file.
pub fn read_commands(
    path: &Path,
) -> Result<impl Iterator<Item = Result<ReconcileCommand, CsvError>> + use<>, CsvError> {
    let reader = open(path)?;

    Ok(reader
        .into_deserialize::<CommandRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let target = row
                .status
                .parse::<SemanticStatus>()
                .map_err(|source| CsvError::Status { line, source })?;
            let actor = parse_actor(line, &row.actor)?;
            Ok(ReconcileCommand {
                transfer_id: row.transfer,
                target,
                actor,
            })
        }))
}

/// Write wallet balances in csv format
pub fn write_balances(
    out: impl io::Write,
    balances: impl IntoIterator<Item = (UserId, Amount)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for (user, balance) in balances {
        writer.serialize(BalanceRow {
            user,
            balance: balance.to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const RECORD_HEADER: &str = "id,source,user,reference,amount,status,created_at\n";

    #[test]
    fn read_transfer_record() {
        let file = write_csv(&format!(
            "{RECORD_HEADER}t1,transfer,alice,DEP-442,500.5,reçu,2026-03-01T10:00:00Z\n"
        ));
        let results: Vec<_> = read_records(file.path()).unwrap().collect();
        assert_eq!(results.len(), 1);

        let record = results.into_iter().next().unwrap().unwrap();
        assert_eq!(record.id, "t1");
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.amount, Amount::from_minor(50_050));
        assert_eq!(record.status, SemanticStatus::FundsConfirmed);
        assert!(record.processed);
        assert_eq!(record.source, LedgerSource::TransferLedger);
        assert!(record.created_at.is_some());
    }

    #[test]
    fn read_wallet_record_without_date() {
        let file = write_csv(&format!("{RECORD_HEADER}w1, wallet, bob, , 20, pending,\n"));
        let record = read_records(file.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.source, LedgerSource::WalletLedger);
        assert_eq!(record.reference, "");
        assert!(record.created_at.is_none());
    }

    #[test]
    fn unknown_status_reads_as_pending() {
        let file = write_csv(&format!("{RECORD_HEADER}t1,transfer,alice,DEP-1,10,banana,\n"));
        let record = read_records(file.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SemanticStatus::Pending);
    }

    #[test]
    fn record_errors_carry_line_numbers() {
        let file = write_csv(&format!(
            "{RECORD_HEADER}t1,elsewhere,alice,DEP-1,10,pending,\nt2,transfer,alice,DEP-2,-5,pending,\nt3,transfer,alice,DEP-3,abc,pending,\n"
        ));
        let results: Vec<_> = read_records(file.path()).unwrap().collect();
        assert!(matches!(
            results[0],
            Err(CsvError::UnknownSource { line: 2, .. })
        ));
        assert!(matches!(
            results[1],
            Err(CsvError::NonPositiveAmount { line: 3, .. })
        ));
        assert!(matches!(results[2], Err(CsvError::Parse { line: 4, .. })));
    }

    #[test]
    fn unrepresentable_amounts_are_refused() {
        let file = write_csv(&format!(
            "{RECORD_HEADER}t1,transfer,alice,DEP-1,inf,pending,\nt2,transfer,alice,DEP-2,1e17,pending,\n"
        ));
        let results: Vec<_> = read_records(file.path()).unwrap().collect();
        assert!(matches!(
            results[0],
            Err(CsvError::AmountOutOfRange { line: 2, .. })
        ));
        assert!(matches!(
            results[1],
            Err(CsvError::AmountOutOfRange { line: 3, .. })
        ));
    }

    #[test]
    fn readers_do_not_borrow_the_path() {
        let file = write_csv("transfer,status,actor\nt1,received,system\n");
        let commands = {
            let path = file.path().to_path_buf();
            read_commands(&path).unwrap()
        };
        let handle = std::thread::spawn(move || commands.count());
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            read_records(Path::new("/nonexistent/records.csv")),
            Err(CsvError::Open { .. })
        ));
    }

    #[test]
    fn read_commands_parses_actors() {
        let file = write_csv(
            "transfer,status,actor\nt1,received,system\nt1,pending,admin:ops\nt2,rejected,user:alice\nt3,pending,admin\n",
        );
        let commands: Vec<_> = read_commands(file.path())
            .unwrap()
            .map(Result::unwrap)
            .collect();

        assert_eq!(commands[0].target, SemanticStatus::FundsConfirmed);
        assert_eq!(commands[0].actor, Actor::System);
        assert_eq!(commands[1].actor, Actor::Admin("ops".to_string()));
        assert_eq!(commands[2].actor, Actor::User("alice".to_string()));
        assert_eq!(commands[3].actor, Actor::Admin("admin".to_string()));
    }

    #[test]
    fn commands_refuse_unknown_status_and_actor() {
        let file = write_csv("transfer,status,actor\nt1,banana,system\nt1,received,robot\n");
        let results: Vec<_> = read_commands(file.path()).unwrap().collect();
        assert!(matches!(results[0], Err(CsvError::Status { line: 2, .. })));
        assert!(matches!(
            results[1],
            Err(CsvError::UnknownActor { line: 3, .. })
        ));
    }

    #[test]
    fn write_balances_formats_amounts() {
        let mut out = Vec::new();
        write_balances(
            &mut out,
            vec![
                ("alice".to_string(), Amount::from_minor(50_000)),
                ("bob".to_string(), Amount::from_minor(5)),
            ],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "user,balance\nalice,500.00\nbob,0.05\n"
        );
    }
}
