use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::{ToleranceConfig, ValidationConfig};
use crate::evidence::EvidencePool;
use crate::model::{LedgerEntry, MatchTier, Obligation, Period};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Warning,
    Failed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_obligations: usize,
    pub matched_obligations: usize,
    pub unmatched_obligations: usize,
    pub match_rate_percent: f64,
    pub tier_counts: BTreeMap<String, usize>,
    pub unresolved_evidence: usize,
    pub ledger_confirmed_evidence: usize,
    pub ledger_unconfirmed_evidence: usize,
    pub split_payments: usize,
}

/// The sole channel for surfacing recoverable conditions: ordered error,
/// warning, and info lists plus a statistics block. The engine never
/// raises past its boundary for anything recorded here.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub status: ReportStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    pub statistics: Statistics,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a finished run and assemble the diagnostic report.
/// `stage_warnings` are the recoverable conditions collected by earlier
/// stages; they land at the head of the warning list in stage order.
pub fn validate(
    obligations: &[Obligation],
    pool: &EvidencePool,
    entries: &[LedgerEntry],
    source_partners: &BTreeSet<String>,
    as_of: NaiveDate,
    tolerance: &ToleranceConfig,
    config: &ValidationConfig,
    stage_warnings: Vec<String>,
) -> DiagnosticReport {
    let mut errors = Vec::new();
    let mut warnings = stage_warnings;
    let mut info = Vec::new();
    let tol = tolerance.amount_minor;

    // Match-rate statistics.
    let total = obligations.len();
    let matched = obligations.iter().filter(|o| o.is_matched()).count();
    let match_rate_percent = if total > 0 {
        (matched as f64 / total as f64 * 10_000.0).round() / 100.0
    } else {
        0.0
    };
    let mut tier_counts: BTreeMap<String, usize> = BTreeMap::new();
    for ob in obligations {
        if let Some(tier) = ob.tier {
            *tier_counts.entry(tier.to_string()).or_insert(0) += 1;
        }
    }
    info.push(format!("match rate {match_rate_percent:.2}% ({matched}/{total})"));

    // Amount consistency per tier. Exact tiers must land on the target;
    // sequential and partial tiers are expected to drift.
    for ob in obligations {
        let (Some(tier), Some(m)) = (ob.tier, ob.matched.as_ref()) else { continue };
        let delta = m.supply_minor - ob.target_minor;
        match tier {
            MatchTier::Exact | MatchTier::ExactRelaxed => {
                if delta.abs() > tol {
                    errors.push(format!(
                        "obligation {}: exact-tier match differs from target \
                         (target {}, matched {})",
                        ob.key, ob.target_minor, m.supply_minor
                    ));
                }
            }
            MatchTier::Sequential | MatchTier::SequentialRelaxed => {
                if delta.abs() > tol {
                    warnings.push(format!(
                        "obligation {}: sequential match differs from target \
                         (target {}, matched {})",
                        ob.key, ob.target_minor, m.supply_minor
                    ));
                }
            }
            MatchTier::Partial | MatchTier::PartialManual => {
                if m.supply_minor < ob.target_minor {
                    warnings.push(format!(
                        "obligation {}: partial match below target \
                         (target {}, matched {})",
                        ob.key, ob.target_minor, m.supply_minor
                    ));
                }
            }
        }
    }

    // Duplicate evidence usage: the same approval id consumed by more
    // than one obligation group.
    let mut usage: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for record in &pool.records {
        if let Some(tag) = &record.consumption {
            usage
                .entry(record.approval_id.as_str())
                .or_default()
                .insert(tag.key.as_str());
        }
    }
    for (approval, keys) in usage {
        if keys.len() > 1 {
            warnings.push(format!(
                "approval id '{approval}' consumed by {} obligation groups",
                keys.len()
            ));
        }
    }

    // Date sanity: future-dated evidence and period drift.
    for record in &pool.records {
        if let Some(write) = record.write_date {
            if write > as_of {
                warnings.push(format!(
                    "evidence approval '{}': future write date {write}",
                    record.approval_id
                ));
            }
        }
    }
    for ob in obligations {
        let Some(m) = ob.matched.as_ref() else { continue };
        let Some(write) = m.write_date else { continue };
        let drift = Period::from_date(write).months_between(&ob.period);
        if drift.unsigned_abs() > config.period_drift_months {
            warnings.push(format!(
                "obligation {}: matched evidence written {} months from period {}",
                ob.key, drift, ob.period
            ));
        }
    }

    // Partners present in the source input but absent from the final set.
    let final_partners: BTreeSet<&str> =
        obligations.iter().map(|o| o.partner_id.as_str()).collect();
    let missing: Vec<&str> = source_partners
        .iter()
        .map(|p| p.as_str())
        .filter(|p| !final_partners.contains(p))
        .collect();
    if !missing.is_empty() {
        let sample: Vec<&str> = missing.iter().copied().take(5).collect();
        warnings.push(format!(
            "{} partner(s) from the source input are absent from the final set: {}",
            missing.len(),
            sample.join(", ")
        ));
    }

    // Ledger confirmation coverage.
    let ledger_confirmed = pool
        .records
        .iter()
        .filter(|r| r.ledger.is_some())
        .count();
    let ledger_unconfirmed = pool
        .records
        .iter()
        .filter(|r| r.consumption.is_some() && r.ledger.is_none() && r.scope().is_some())
        .count();
    if ledger_unconfirmed > 0 {
        warnings.push(format!(
            "{ledger_unconfirmed} consumed evidence record(s) have no confirmed ledger payment"
        ));
    }
    let split_payments = pool
        .records
        .iter()
        .filter(|r| r.ledger.as_ref().is_some_and(|l| l.needs_confirmation))
        .count();
    if split_payments > 0 {
        warnings.push(format!(
            "{split_payments} split payment(s) span multiple months and need confirmation"
        ));
    }
    let free_entries = entries.iter().filter(|e| e.is_free()).count();
    if free_entries > 0 {
        info.push(format!("{free_entries} ledger entries left unconsumed"));
    }

    let unresolved = pool.records.iter().filter(|r| r.unresolved).count();
    if unresolved > 0 {
        info.push(format!("{unresolved} evidence record(s) unresolved, needs manual confirmation"));
    }

    let status = if !errors.is_empty() {
        ReportStatus::Failed
    } else if !warnings.is_empty() {
        ReportStatus::Warning
    } else {
        ReportStatus::Success
    };

    DiagnosticReport {
        status,
        errors,
        warnings,
        info,
        statistics: Statistics {
            total_obligations: total,
            matched_obligations: matched,
            unmatched_obligations: total - matched,
            match_rate_percent,
            tier_counts,
            unresolved_evidence: unresolved,
            ledger_confirmed_evidence: ledger_confirmed,
            ledger_unconfirmed_evidence: ledger_unconfirmed,
            split_payments,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
