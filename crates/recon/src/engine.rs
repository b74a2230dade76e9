use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::aggregate::{build_obligations, canonical_code};
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::evidence::build_pool;
use crate::ledger::{build_entries, reconcile};
use crate::matcher::run_cascade;
use crate::model::{ReconInput, ReconMeta, ReconResult};
use crate::validate::validate;

/// Run one full reconciliation batch: aggregate → evidence build →
/// matching cascade → ledger reconciliation → validation.
///
/// Single-threaded and deterministic; the engine owns all consumption
/// state for the duration of the run and is not reentrant. Fatal errors
/// abort between stages only; recoverable conditions flow into the
/// diagnostic report.
///
/// `as_of` anchors the future-dated-evidence check; callers pass the
/// current date, tests pass a fixed one.
pub fn run(
    config: &ReconConfig,
    input: &ReconInput,
    as_of: NaiveDate,
) -> Result<ReconResult, ReconError> {
    let mut stage_warnings = Vec::new();

    // Stage 1: obligations.
    let (mut obligations, warnings) = build_obligations(&input.line_items, &input.catalog)?;
    stage_warnings.extend(warnings);

    // Partners seen in the raw input, for missing-partner detection.
    let source_partners: BTreeSet<String> = input
        .line_items
        .iter()
        .filter_map(|item| canonical_code(&item.partner_id))
        .collect();

    // Stage 2: evidence pool.
    let (mut pool, warnings) =
        build_pool(&input.primary_evidence, &input.secondary_evidence, &obligations)?;
    stage_warnings.extend(warnings);

    // Stage 3: matching cascade.
    let cascade = run_cascade(&mut obligations, &mut pool, &config.tolerance, &config.search);
    stage_warnings.extend(cascade.warnings);

    // Stage 4: ledger reconciliation.
    let (mut entries, warnings) = build_entries(&input.ledger);
    stage_warnings.extend(warnings);
    let ledger = reconcile(
        &mut pool,
        &mut entries,
        &config.tolerance,
        &config.search,
        &config.ledger,
    );
    stage_warnings.extend(ledger.warnings);

    // Stage 5: payment projections.
    for ob in obligations.iter_mut() {
        ob.expected_payment_minor = ob
            .matched
            .as_ref()
            .map(|m| m.supply_minor + m.tax_minor)
            .unwrap_or(0);
    }

    // Stage 6: validation, the single aggregation point for everything
    // recoverable.
    let report = validate(
        &obligations,
        &pool,
        &entries,
        &source_partners,
        as_of,
        &config.tolerance,
        &config.validation,
        stage_warnings,
    );

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            as_of,
        },
        obligations,
        evidence: pool.records,
        ledger: entries,
        report,
    })
}
