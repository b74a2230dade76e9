use std::collections::BTreeMap;

use crate::config::{LedgerConfig, SearchConfig, ToleranceConfig};
use crate::evidence::{canon_or_raw, EvidencePool};
use crate::model::{
    ConsumptionTag, LedgerEntry, LedgerMatch, LedgerMatchKind, LedgerRow, MonthlyPortion,
};
use crate::subset_sum;

// ---------------------------------------------------------------------------
// Entry construction
// ---------------------------------------------------------------------------

/// Parse a numeric-as-text amount that may carry thousands separators
/// (`"1,234,567"`) or a zero fraction (`"1234567.0"`).
fn parse_amount(raw: &str) -> Option<i64> {
    let s: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if s.is_empty() {
        return Some(0);
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.fract() == 0.0 && f.abs() < 9e15 {
            return Some(f as i64);
        }
    }
    None
}

/// Normalize raw ledger rows into entries. Counterparty ids get the
/// canonical integer-then-string form; entries with a zero debit amount
/// are excluded before matching.
pub fn build_entries(rows: &[LedgerRow]) -> (Vec<LedgerEntry>, Vec<String>) {
    let mut warnings = Vec::new();
    let mut entries = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let Some(debit_minor) = parse_amount(&row.debit) else {
            warnings.push(format!(
                "ledger row {i} (voucher '{}'): cannot parse debit amount '{}', row dropped",
                row.voucher_no, row.debit
            ));
            continue;
        };
        if debit_minor == 0 {
            continue;
        }
        let credit_minor = match parse_amount(&row.credit) {
            Some(n) => n,
            None => {
                warnings.push(format!(
                    "ledger row {i} (voucher '{}'): cannot parse credit amount '{}', treated as 0",
                    row.voucher_no, row.credit
                ));
                0
            }
        };
        entries.push(LedgerEntry {
            account_date: row.account_date,
            voucher_no: row.voucher_no.clone(),
            counterparty_id: canon_or_raw(&row.counterparty_id),
            debit_minor,
            credit_minor,
            consumption: None,
            kind: None,
        });
    }

    (entries, warnings)
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LedgerOutcome {
    pub matched_evidence: usize,
    pub combined_matches: usize,
    pub split_payments: usize,
    pub nodes_visited: u64,
    pub nodes_pruned: u64,
    pub cap_hits: usize,
    pub warnings: Vec<String>,
}

/// Second reconciliation pass: confirm payment of every already-consumed
/// evidence record against the accounting ledger.
///
/// Target amount is the record's supply + tax. Candidate entries share
/// the record's counterparty business id and fall inside the accounting
/// window [first day of the record's scope month, last day of scope
/// month + `window_months`]. A single exact entry wins outright; failing
/// that, the subset-sum search runs over the date-sorted candidates.
pub fn reconcile(
    pool: &mut EvidencePool,
    entries: &mut [LedgerEntry],
    tolerance: &ToleranceConfig,
    search: &SearchConfig,
    ledger: &LedgerConfig,
) -> LedgerOutcome {
    let mut outcome = LedgerOutcome::default();
    let tol = tolerance.amount_minor;

    for record in pool.records.iter_mut() {
        let Some(tag) = record.consumption.clone() else { continue };
        if record.ledger.is_some() {
            continue;
        }
        let Some(scope) = record.scope() else { continue };

        let target = record.supply_minor + record.tax_minor;
        let lower = scope.first_day();
        let upper = scope.last_day_after(ledger.window_months);

        let mut cands: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_free())
            .filter(|(_, e)| e.counterparty_id == record.business_id)
            .filter(|(_, e)| e.account_date >= lower && e.account_date <= upper)
            .map(|(i, _)| i)
            .collect();
        if cands.is_empty() {
            continue;
        }
        cands.sort_by_key(|&i| (entries[i].account_date, i));

        // Tier 1: single entry equal to the payable amount.
        let exact = cands
            .iter()
            .copied()
            .find(|&i| (entries[i].debit_minor - target).abs() <= tol);
        if let Some(idx) = exact {
            let entry = &mut entries[idx];
            entry.consumption = Some(ConsumptionTag { key: tag.to_string(), seq: 1 });
            entry.kind = Some(LedgerMatchKind::ExactPayment);
            record.ledger = Some(LedgerMatch {
                kind: LedgerMatchKind::ExactPayment,
                debit_minor: entry.debit_minor,
                voucher_no: entry.voucher_no.clone(),
                account_date: entry.account_date,
                needs_confirmation: false,
                monthly: Vec::new(),
            });
            outcome.matched_evidence += 1;
            continue;
        }

        // Tier 2: combination of entries summing to the payable amount.
        let amounts: Vec<i64> = cands.iter().map(|&i| entries[i].debit_minor).collect();
        let result = subset_sum::search(&amounts, target, tol, search.max_nodes);
        outcome.nodes_visited += result.nodes_visited;
        outcome.nodes_pruned += result.nodes_pruned;
        if result.cap_hit {
            outcome.cap_hits += 1;
            outcome.warnings.push(format!(
                "evidence {tag}: ledger subset-sum abandoned after {} nodes ({} candidates)",
                result.nodes_visited,
                cands.len()
            ));
            continue;
        }
        let Some(positions) = result.found else { continue };
        let selected: Vec<usize> = positions.into_iter().map(|p| cands[p]).collect();

        let mut monthly: BTreeMap<String, i64> = BTreeMap::new();
        for &i in &selected {
            let month = entries[i].account_date.format("%Y-%m").to_string();
            *monthly.entry(month).or_insert(0) += entries[i].debit_minor;
        }
        let needs_confirmation = monthly.len() > 1;

        let debit_total: i64 = selected.iter().map(|&i| entries[i].debit_minor).sum();
        let voucher_no = entries[selected[0]].voucher_no.clone();
        let account_date = selected
            .iter()
            .map(|&i| entries[i].account_date)
            .max()
            .expect("non-empty selection");

        for (seq, &i) in selected.iter().enumerate() {
            let entry = &mut entries[i];
            entry.consumption = Some(ConsumptionTag { key: tag.to_string(), seq: seq + 1 });
            entry.kind = Some(LedgerMatchKind::CombinedPayment);
        }
        record.ledger = Some(LedgerMatch {
            kind: LedgerMatchKind::CombinedPayment,
            debit_minor: debit_total,
            voucher_no,
            account_date,
            needs_confirmation,
            monthly: if needs_confirmation {
                monthly
                    .into_iter()
                    .map(|(month, amount_minor)| MonthlyPortion { month, amount_minor })
                    .collect()
            } else {
                Vec::new()
            },
        });
        outcome.matched_evidence += 1;
        outcome.combined_matches += 1;
        if needs_confirmation {
            outcome.split_payments += 1;
        }
    }

    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::model::{EvidenceRecord, InvoiceClass, MatchTier};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn consumed_ev(business: &str, write: &str, supply: i64, tax: i64) -> EvidenceRecord {
        EvidenceRecord {
            partner_id: "100".into(),
            partner_name: "Partner 100".into(),
            business_id: business.into(),
            write_date: Some(date(write)),
            issue_date: Some(date(write)),
            invoice_class: InvoiceClass::TaxInvoice,
            supply_minor: supply,
            tax_minor: tax,
            approval_id: "AP1".into(),
            consumption: Some(ConsumptionTag { key: "202401100taxable".into(), seq: 1 }),
            tier: Some(MatchTier::Exact),
            unresolved: false,
            ledger: None,
        }
    }

    fn row(account: &str, voucher: &str, counterparty: &str, debit: &str) -> LedgerRow {
        LedgerRow {
            account_date: date(account),
            voucher_no: voucher.into(),
            counterparty_id: counterparty.into(),
            debit: debit.into(),
            credit: "0".into(),
        }
    }

    fn configs() -> (ToleranceConfig, SearchConfig, LedgerConfig) {
        (
            ToleranceConfig { amount_minor: 0 },
            SearchConfig { max_nodes: 100_000 },
            LedgerConfig { window_months: 2 },
        )
    }

    #[test]
    fn build_entries_parses_and_filters() {
        let rows = vec![
            row("2024-01-15", "V1", "1234567890", "1,100,000"),
            row("2024-01-16", "V2", "1234567890", "0"),
            row("2024-01-17", "V3", "1234567890", "not-a-number"),
            row("2024-01-18", "V4", "1234567890", "250000.0"),
        ];
        let (entries, warnings) = build_entries(&rows);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].debit_minor, 1_100_000);
        assert_eq!(entries[1].debit_minor, 250_000);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("V3"));
    }

    #[test]
    fn exact_payment_one_to_one() {
        let mut pool = EvidencePool {
            records: vec![consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000)],
        };
        let (mut entries, _) = build_entries(&[
            row("2024-02-05", "V1", "1234567890", "1,100,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);

        assert_eq!(outcome.matched_evidence, 1);
        assert_eq!(outcome.combined_matches, 0);
        let m = pool.records[0].ledger.as_ref().unwrap();
        assert_eq!(m.kind, LedgerMatchKind::ExactPayment);
        assert_eq!(m.debit_minor, 1_100_000);
        assert!(!m.needs_confirmation);
        assert_eq!(
            entries[0].consumption.as_ref().unwrap().to_string(),
            "202401100taxable-1-1"
        );
    }

    #[test]
    fn combined_payment_same_month() {
        let mut pool = EvidencePool {
            records: vec![consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000)],
        };
        let (mut entries, _) = build_entries(&[
            row("2024-01-20", "V1", "1234567890", "600,000"),
            row("2024-01-25", "V2", "1234567890", "500,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);

        assert_eq!(outcome.combined_matches, 1);
        assert_eq!(outcome.split_payments, 0);
        let m = pool.records[0].ledger.as_ref().unwrap();
        assert_eq!(m.kind, LedgerMatchKind::CombinedPayment);
        assert_eq!(m.debit_minor, 1_100_000);
        assert_eq!(m.voucher_no, "V1");
        assert_eq!(m.account_date, date("2024-01-25"));
        assert!(!m.needs_confirmation);
        assert!(m.monthly.is_empty());
    }

    #[test]
    fn split_payment_flags_confirmation_with_breakdown() {
        let mut pool = EvidencePool {
            records: vec![consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000)],
        };
        let (mut entries, _) = build_entries(&[
            row("2024-01-20", "V1", "1234567890", "600,000"),
            row("2024-02-15", "V2", "1234567890", "500,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);

        assert_eq!(outcome.split_payments, 1);
        let m = pool.records[0].ledger.as_ref().unwrap();
        assert!(m.needs_confirmation);
        assert_eq!(m.monthly.len(), 2);
        assert_eq!(m.monthly[0].month, "2024-01");
        assert_eq!(m.monthly[0].amount_minor, 600_000);
        assert_eq!(m.monthly[1].month, "2024-02");
        assert_eq!(m.monthly[1].amount_minor, 500_000);
    }

    #[test]
    fn window_excludes_late_entries() {
        // Scope January + 2 months → window ends 2024-03-31.
        let mut pool = EvidencePool {
            records: vec![consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000)],
        };
        let (mut entries, _) = build_entries(&[
            row("2024-04-01", "V1", "1234567890", "1,100,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);
        assert_eq!(outcome.matched_evidence, 0);
        assert!(pool.records[0].ledger.is_none());
        assert!(entries[0].is_free());
    }

    #[test]
    fn counterparty_must_match_exactly() {
        let mut pool = EvidencePool {
            records: vec![consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000)],
        };
        let (mut entries, _) = build_entries(&[
            row("2024-01-20", "V1", "9999999999", "1,100,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);
        assert_eq!(outcome.matched_evidence, 0);
    }

    #[test]
    fn free_evidence_is_skipped() {
        let mut record = consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000);
        record.consumption = None;
        record.tier = None;
        let mut pool = EvidencePool { records: vec![record] };
        let (mut entries, _) = build_entries(&[
            row("2024-01-20", "V1", "1234567890", "1,100,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);
        assert_eq!(outcome.matched_evidence, 0);
        assert!(entries[0].is_free());
    }

    #[test]
    fn entries_consumed_exclusively() {
        // Two consumed evidence records, one candidate entry that pays the
        // first; the second must not reuse it.
        let mut pool = EvidencePool {
            records: vec![
                consumed_ev("1234567890", "2024-01-10", 1_000_000, 100_000),
                consumed_ev("1234567890", "2024-01-15", 1_000_000, 100_000),
            ],
        };
        let (mut entries, _) = build_entries(&[
            row("2024-01-20", "V1", "1234567890", "1,100,000"),
        ]);
        let (tol, search, ledger) = configs();
        let outcome = reconcile(&mut pool, &mut entries, &tol, &search, &ledger);
        assert_eq!(outcome.matched_evidence, 1);
        assert!(pool.records[0].ledger.is_some());
        assert!(pool.records[1].ledger.is_none());
    }
}
