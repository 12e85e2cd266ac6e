//! Collapse duplicate deposit records into one canonical record per transfer.
//!
//! The same bank transfer can show up several times: once per ledger, twice
//! in the same ledger with different ids, or with diverging statuses. Records
//! are grouped by normalized reference and amount, and the best-ranked record
//! of each group survives.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::TransferRecord;

/// Lower-case, drop whitespace and anything outside `[a-z0-9_-]`.
pub fn normalized_reference(reference: &str) -> String {
    reference
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

pub fn group_key(record: &TransferRecord) -> String {
    format!("{}-{}", normalized_reference(&record.reference), record.amount)
}

fn created_at(record: &TransferRecord) -> DateTime<Utc> {
    record.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Total order: best record first.
fn rank(a: &TransferRecord, b: &TransferRecord) -> Ordering {
    b.status
        .priority()
        .cmp(&a.status.priority())
        .then_with(|| created_at(b).cmp(&created_at(a)))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.source.as_str().cmp(b.source.as_str()))
}

/// Keep one canonical record per `(reference, amount)` group.
///
/// Records of a different user that collide on the same key are re-admitted,
/// one per user, so an unrelated transfer is not silently dropped.
/// The result does not depend on input order and is stable under re-application.
pub fn deduplicate(records: Vec<TransferRecord>) -> Vec<TransferRecord> {
    let mut groups: HashMap<String, Vec<TransferRecord>> = HashMap::new();
    for record in records {
        groups.entry(group_key(&record)).or_default().push(record);
    }

    let mut survivors = Vec::with_capacity(groups.len());
    let mut dropped = Vec::new();
    let mut claimed: HashSet<(String, String)> = HashSet::new();

    for (key, mut group) in groups {
        group.sort_by(rank);
        let mut rest = group.into_iter();
        if let Some(head) = rest.next() {
            claimed.insert((head.user_id.clone(), key.clone()));
            survivors.push(head);
        }
        dropped.extend(rest.map(|record| (key.clone(), record)));
    }

    dropped.sort_by(|(_, a), (_, b)| rank(a, b));
    for (key, record) in dropped {
        if claimed.insert((record.user_id.clone(), key)) {
            debug!(
                transfer_id = %record.id,
                user_id = %record.user_id,
                "re-admitting colliding transfer of another user"
            );
            survivors.push(record);
        }
    }

    survivors.sort_by(|a, b| {
        created_at(b)
            .cmp(&created_at(a))
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.source.as_str().cmp(b.source.as_str()))
    });
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::LedgerSource;
    use crate::status::SemanticStatus;
    use chrono::TimeZone;

    fn record(
        id: &str,
        user: &str,
        reference: &str,
        amount: i64,
        status: SemanticStatus,
        day: Option<u32>,
    ) -> TransferRecord {
        let mut r = TransferRecord::new(id, user, reference, Amount::from_minor(amount));
        r.status = status;
        r.created_at = day.map(|d| Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap());
        r
    }

    fn ids(records: &[TransferRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn normalized_reference_strips_noise() {
        assert_eq!(normalized_reference("  DEP 442 / Bank!"), "dep442bank");
        assert_eq!(normalized_reference("Dep_01-A"), "dep_01-a");
        assert_eq!(normalized_reference(""), "");
        assert_eq!(normalized_reference("Réf-1"), "rf-1");
    }

    #[test]
    fn funds_confirmed_beats_older_pending() {
        let records = vec![
            record("a", "u1", "DEP-1", 500, SemanticStatus::Pending, Some(1)),
            record("b", "u1", "dep-1", 500, SemanticStatus::FundsConfirmed, Some(2)),
        ];
        assert_eq!(ids(&deduplicate(records)), vec!["b"]);
    }

    #[test]
    fn funds_confirmed_beats_newer_pending() {
        let records = vec![
            record("a", "u1", "DEP-1", 500, SemanticStatus::FundsConfirmed, Some(1)),
            record("b", "u1", "DEP-1", 500, SemanticStatus::Pending, Some(9)),
        ];
        assert_eq!(ids(&deduplicate(records)), vec!["a"]);
    }

    #[test]
    fn more_recent_wins_between_equal_statuses() {
        let records = vec![
            record("old", "u1", "DEP-1", 500, SemanticStatus::FundsConfirmed, Some(1)),
            record("new", "u1", "DEP-1", 500, SemanticStatus::FundsConfirmed, Some(5)),
        ];
        assert_eq!(ids(&deduplicate(records)), vec!["new"]);
    }

    #[test]
    fn missing_created_at_sorts_last() {
        let records = vec![
            record("undated", "u1", "DEP-1", 500, SemanticStatus::Pending, None),
            record("dated", "u1", "DEP-1", 500, SemanticStatus::Pending, Some(1)),
        ];
        assert_eq!(ids(&deduplicate(records)), vec!["dated"]);
    }

    #[test]
    fn different_amounts_are_different_transfers() {
        let records = vec![
            record("a", "u1", "DEP-1", 500, SemanticStatus::Pending, Some(1)),
            record("b", "u1", "DEP-1", 501, SemanticStatus::Pending, Some(2)),
        ];
        assert_eq!(deduplicate(records).len(), 2);
    }

    #[test]
    fn same_transfer_in_both_ledgers_collapses() {
        let mut wallet = record("w-7", "u1", "DEP-1", 500, SemanticStatus::FundsConfirmed, Some(2));
        wallet.source = LedgerSource::WalletLedger;
        let transfer = record("t-7", "u1", "DEP-1", 500, SemanticStatus::Pending, Some(1));
        let out = deduplicate(vec![transfer, wallet]);
        assert_eq!(ids(&out), vec!["w-7"]);
        assert_eq!(out[0].source, LedgerSource::WalletLedger);
    }

    #[test]
    fn colliding_transfer_of_another_user_is_readmitted() {
        let records = vec![
            record("a", "u1", "DEP-1", 500, SemanticStatus::FundsConfirmed, Some(2)),
            record("b", "u2", "DEP-1", 500, SemanticStatus::Pending, Some(1)),
            record("c", "u2", "DEP-1", 500, SemanticStatus::Pending, Some(3)),
        ];
        let out = deduplicate(records);
        let mut kept = ids(&out);
        kept.sort();
        assert_eq!(kept, vec!["a", "c"]);
    }

    #[test]
    fn empty_references_group_by_amount() {
        let records = vec![
            record("a", "u1", "", 500, SemanticStatus::Pending, Some(1)),
            record("b", "u1", "  ", 500, SemanticStatus::Pending, Some(2)),
            record("c", "u1", "", 700, SemanticStatus::Pending, Some(3)),
        ];
        let out = deduplicate(records);
        let mut kept = ids(&out);
        kept.sort();
        assert_eq!(kept, vec!["b", "c"]);
    }

    fn sample() -> Vec<TransferRecord> {
        vec![
            record("1", "u1", "DEP-1", 500, SemanticStatus::Pending, Some(1)),
            record("2", "u1", "dep 1", 500, SemanticStatus::FundsConfirmed, Some(2)),
            record("3", "u2", "DEP-1", 500, SemanticStatus::Rejected, Some(3)),
            record("4", "u1", "DEP-2", 100, SemanticStatus::Cancelled, None),
            record("5", "u1", "DEP-2", 100, SemanticStatus::Cancelled, None),
            record("6", "u3", "", 900, SemanticStatus::Pending, Some(4)),
            record("7", "u2", "DEP-1", 500, SemanticStatus::Pending, Some(5)),
        ]
    }

    #[test]
    fn deduplicate_is_idempotent() {
        let once = deduplicate(sample());
        let twice = deduplicate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn deduplicate_is_order_independent() {
        let expected = deduplicate(sample());
        let mut input = sample();
        for shift in 1..input.len() {
            input.rotate_left(shift);
            assert_eq!(ids(&deduplicate(input.clone())), ids(&expected));
        }
        input.reverse();
        assert_eq!(ids(&deduplicate(input)), ids(&expected));
    }

    #[test]
    fn equal_rank_resolves_by_id() {
        let out = deduplicate(sample());
        assert!(ids(&out).contains(&"4"));
        assert!(!ids(&out).contains(&"5"));
    }

    #[test]
    fn empty_input() {
        assert!(deduplicate(Vec::new()).is_empty());
    }
}
