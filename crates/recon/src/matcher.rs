use std::collections::BTreeMap;

use crate::config::{SearchConfig, ToleranceConfig};
use crate::evidence::EvidencePool;
use crate::model::{ConsumptionTag, MatchTier, MatchedEvidence, Obligation};
use crate::subset_sum;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CascadeOutcome {
    /// Matched obligation count per tier label.
    pub tier_counts: BTreeMap<String, usize>,
    /// Free, non-zero evidence records swept as unresolved.
    pub unresolved: usize,
    pub nodes_visited: u64,
    pub nodes_pruned: u64,
    pub cap_hits: usize,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// Run the full strategy cascade over the obligation set and evidence
/// pool. Strategies execute in strict precedence order; each sees only
/// obligations still unmatched and evidence still free, scoped to the
/// obligation's (partner, year, month).
pub fn run_cascade(
    obligations: &mut [Obligation],
    pool: &mut EvidencePool,
    tolerance: &ToleranceConfig,
    search: &SearchConfig,
) -> CascadeOutcome {
    let mut outcome = CascadeOutcome::default();
    let tol = tolerance.amount_minor;

    exact_tier(obligations, pool, tol, MatchTier::Exact, &mut outcome);
    exact_tier(obligations, pool, tol, MatchTier::ExactRelaxed, &mut outcome);
    sequential_tier(obligations, pool, tol, search, MatchTier::Sequential, &mut outcome);
    sequential_tier(obligations, pool, tol, search, MatchTier::SequentialRelaxed, &mut outcome);
    partial_tier(obligations, pool, tol, &mut outcome);
    partial_manual_tier(obligations, pool, &mut outcome);
    outcome.unresolved = residual_sweep(pool);

    outcome
}

// ---------------------------------------------------------------------------
// Candidate ordering
// ---------------------------------------------------------------------------

/// Deterministic tie-break for "first candidate in pool order": ascending
/// write date, then pool index. Scoped candidates always carry a write
/// date.
fn sort_by_write_date(indices: &mut [usize], pool: &EvidencePool) {
    indices.sort_by_key(|&i| (pool.records[i].write_date, i));
}

/// Partial tiers order by issue date; records without one sort last.
fn sort_by_issue_date(indices: &mut [usize], pool: &EvidencePool) {
    indices.sort_by_key(|&i| {
        let r = &pool.records[i];
        (r.issue_date.is_none(), r.issue_date, i)
    });
}

// ---------------------------------------------------------------------------
// Consumption
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum DatePick {
    Earliest,
    Latest,
}

/// Consume a selected group for an obligation: tag every member with
/// `{key}-{seq}`, label the tier, and aggregate evidence fields onto the
/// obligation (dates per tier rule, amounts summed, ids from the first
/// selected member).
fn consume_group(
    ob: &mut Obligation,
    pool: &mut EvidencePool,
    selected: &[usize],
    tier: MatchTier,
    pick: DatePick,
) {
    let write_dates = selected.iter().filter_map(|&i| pool.records[i].write_date);
    let issue_dates = selected.iter().filter_map(|&i| pool.records[i].issue_date);
    let (write_date, issue_date) = match pick {
        DatePick::Earliest => (write_dates.min(), issue_dates.min()),
        DatePick::Latest => (write_dates.max(), issue_dates.max()),
    };

    let first = &pool.records[selected[0]];
    let matched = MatchedEvidence {
        write_date,
        issue_date,
        supply_minor: selected.iter().map(|&i| pool.records[i].supply_minor).sum(),
        tax_minor: selected.iter().map(|&i| pool.records[i].tax_minor).sum(),
        approval_id: first.approval_id.clone(),
        business_id: first.business_id.clone(),
        member_count: selected.len(),
    };

    for (seq, &idx) in selected.iter().enumerate() {
        pool.consume(idx, ConsumptionTag { key: ob.key.clone(), seq: seq + 1 }, tier);
    }
    ob.tier = Some(tier);
    ob.matched = Some(matched);
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Tier 1/2: single candidate whose supply equals the target within
/// tolerance. The relaxed pass drops the invoice-class constraint.
fn exact_tier(
    obligations: &mut [Obligation],
    pool: &mut EvidencePool,
    tol: i64,
    tier: MatchTier,
    outcome: &mut CascadeOutcome,
) {
    let relaxed = tier == MatchTier::ExactRelaxed;
    for ob in obligations.iter_mut().filter(|o| !o.is_matched()) {
        let class = (!relaxed).then(|| ob.tax_class.required_invoice_class());
        let mut cands = pool.candidates(&ob.partner_id, ob.period, class);
        sort_by_write_date(&mut cands, pool);

        let hit = cands
            .into_iter()
            .find(|&i| (pool.records[i].supply_minor - ob.target_minor).abs() <= tol);
        if let Some(idx) = hit {
            consume_group(ob, pool, &[idx], tier, DatePick::Earliest);
            *outcome.tier_counts.entry(tier.to_string()).or_insert(0) += 1;
        }
    }
}

/// Tier 3/4: FIFO accumulation in write-date order; when the running sum
/// never lands on the target, fall back to the exhaustive subset-sum
/// search over the same candidates.
fn sequential_tier(
    obligations: &mut [Obligation],
    pool: &mut EvidencePool,
    tol: i64,
    search: &SearchConfig,
    tier: MatchTier,
    outcome: &mut CascadeOutcome,
) {
    let relaxed = tier == MatchTier::SequentialRelaxed;
    for ob in obligations.iter_mut().filter(|o| !o.is_matched()) {
        let class = (!relaxed).then(|| ob.tax_class.required_invoice_class());
        let mut cands = pool.candidates(&ob.partner_id, ob.period, class);
        if cands.is_empty() {
            continue;
        }
        sort_by_write_date(&mut cands, pool);

        let mut sum: i64 = 0;
        let mut fifo: Option<usize> = None;
        for (pos, &idx) in cands.iter().enumerate() {
            sum += pool.records[idx].supply_minor;
            if (sum - ob.target_minor).abs() <= tol {
                fifo = Some(pos);
                break;
            }
        }

        if let Some(pos) = fifo {
            let selected = cands[..=pos].to_vec();
            consume_group(ob, pool, &selected, tier, DatePick::Earliest);
            *outcome.tier_counts.entry(tier.to_string()).or_insert(0) += 1;
            continue;
        }

        // Ordered accumulation failed; exhaustive subset-sum over the
        // same date-sorted candidates.
        let amounts: Vec<i64> = cands.iter().map(|&i| pool.records[i].supply_minor).collect();
        let result = subset_sum::search(&amounts, ob.target_minor, tol, search.max_nodes);
        outcome.nodes_visited += result.nodes_visited;
        outcome.nodes_pruned += result.nodes_pruned;
        if result.cap_hit {
            outcome.cap_hits += 1;
            outcome.warnings.push(format!(
                "obligation {}: subset-sum search abandoned after {} nodes ({} candidates)",
                ob.key,
                result.nodes_visited,
                cands.len()
            ));
            continue;
        }
        if let Some(positions) = result.found {
            let selected: Vec<usize> = positions.into_iter().map(|p| cands[p]).collect();
            consume_group(ob, pool, &selected, tier, DatePick::Earliest);
            *outcome.tier_counts.entry(tier.to_string()).or_insert(0) += 1;
        }
    }
}

/// Tier 5: a single candidate strictly larger than the target, earliest
/// issue date first. The overage is recorded on the obligation, not
/// flagged as an error.
fn partial_tier(
    obligations: &mut [Obligation],
    pool: &mut EvidencePool,
    _tol: i64,
    outcome: &mut CascadeOutcome,
) {
    for ob in obligations.iter_mut().filter(|o| !o.is_matched()) {
        let class = Some(ob.tax_class.required_invoice_class());
        let mut cands: Vec<usize> = pool
            .candidates(&ob.partner_id, ob.period, class)
            .into_iter()
            .filter(|&i| pool.records[i].supply_minor > ob.target_minor)
            .collect();
        if cands.is_empty() {
            continue;
        }
        sort_by_issue_date(&mut cands, pool);

        consume_group(ob, pool, &cands[..1], MatchTier::Partial, DatePick::Earliest);
        *outcome.tier_counts.entry(MatchTier::Partial.to_string()).or_insert(0) += 1;
    }
}

/// Tier 6: manual-review accumulation. Candidates at or below the target
/// in issue-date order, accumulated until the sum first exceeds the
/// target; exactness is not required.
fn partial_manual_tier(
    obligations: &mut [Obligation],
    pool: &mut EvidencePool,
    outcome: &mut CascadeOutcome,
) {
    for ob in obligations.iter_mut().filter(|o| !o.is_matched()) {
        let class = Some(ob.tax_class.required_invoice_class());
        let mut cands: Vec<usize> = pool
            .candidates(&ob.partner_id, ob.period, class)
            .into_iter()
            .filter(|&i| pool.records[i].supply_minor <= ob.target_minor)
            .collect();
        if cands.is_empty() {
            continue;
        }
        sort_by_issue_date(&mut cands, pool);

        let mut sum: i64 = 0;
        let mut selected = Vec::new();
        for &idx in &cands {
            sum += pool.records[idx].supply_minor;
            selected.push(idx);
            if sum > ob.target_minor {
                break;
            }
        }
        if sum > ob.target_minor && !selected.is_empty() {
            consume_group(ob, pool, &selected, MatchTier::PartialManual, DatePick::Latest);
            *outcome
                .tier_counts
                .entry(MatchTier::PartialManual.to_string())
                .or_insert(0) += 1;
        }
    }
}

/// Tier 7: any record still free with a non-zero supply amount is tagged
/// unresolved for manual confirmation. No obligation reference.
fn residual_sweep(pool: &mut EvidencePool) -> usize {
    let mut count = 0;
    for record in pool.records.iter_mut() {
        if record.is_free() && record.supply_minor != 0 {
            record.unresolved = true;
            count += 1;
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
