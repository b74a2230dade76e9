use std::collections::{BTreeMap, BTreeSet};

use crate::error::ReconError;
use crate::model::{CatalogPair, LineItem, Obligation, Period, TaxClass};

/// Coerce a partner/reference identifier to canonical integer-then-string
/// form. Upstream sources mix numeric and text representations of the
/// same code (`1234`, `1234.0`, `" 1234"`); all collapse to `"1234"`.
pub fn canonical_code(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n.to_string());
    }
    // numeric exports often arrive as floats with a zero fraction
    if let Ok(f) = s.parse::<f64>() {
        if f.fract() == 0.0 && f.abs() < 9e15 {
            return Some((f as i64).to_string());
        }
    }
    None
}

/// VAT gross-up for taxable targets, in integer minor units.
pub fn gross_up(target_minor: i64, tax_class: TaxClass) -> i64 {
    match tax_class {
        TaxClass::Taxable => target_minor + target_minor / 10,
        TaxClass::ZeroRated | TaxClass::Exempt => target_minor,
    }
}

/// Turn raw purchase line items into per-(period, partner, tax class)
/// obligations, keeping only rows whose (partner, reference) pair exists
/// in the catalog. Rows whose reference is absent are silently dropped,
/// an intentional filter rather than an error. Zero-amount obligations are
/// dropped before matching.
pub fn build_obligations(
    line_items: &[LineItem],
    catalog: &[CatalogPair],
) -> Result<(Vec<Obligation>, Vec<String>), ReconError> {
    if line_items.is_empty() {
        return Err(ReconError::EmptyInput { source: "line_items" });
    }
    if catalog.is_empty() {
        return Err(ReconError::EmptyInput { source: "catalog" });
    }

    let mut warnings = Vec::new();

    // Catalog pairs, coerced and deduplicated.
    let mut eligible: BTreeSet<(String, String)> = BTreeSet::new();
    for (i, pair) in catalog.iter().enumerate() {
        let (Some(partner), Some(reference)) = (
            canonical_code(&pair.partner_id),
            canonical_code(&pair.reference_code),
        ) else {
            warnings.push(format!(
                "catalog row {i}: cannot coerce ids ('{}', '{}'), row dropped",
                pair.partner_id, pair.reference_code
            ));
            continue;
        };
        eligible.insert((partner, reference));
    }
    if eligible.is_empty() {
        return Err(ReconError::EmptyInput { source: "catalog" });
    }

    // First grouping: (partner, period, reference, tax class) → summed amount.
    // BTreeMap keys give a deterministic, input-order-independent result;
    // the first-seen partner name per group is kept from input order.
    type FineKey = (String, Period, String, TaxClass);
    let mut grouped: BTreeMap<FineKey, (i64, String)> = BTreeMap::new();
    for (i, item) in line_items.iter().enumerate() {
        let Some(period) = Period::parse(&item.period) else {
            warnings.push(format!(
                "line item {i}: cannot parse period '{}', row dropped",
                item.period
            ));
            continue;
        };
        let (Some(partner), Some(reference)) = (
            canonical_code(&item.partner_id),
            canonical_code(&item.reference_code),
        ) else {
            warnings.push(format!(
                "line item {i}: cannot coerce ids ('{}', '{}'), row dropped",
                item.partner_id, item.reference_code
            ));
            continue;
        };
        let entry = grouped
            .entry((partner, period, reference, item.tax_class))
            .or_insert((0, item.partner_name.clone()));
        entry.0 += item.amount_minor;
    }

    // Inner join against the catalog, then re-aggregate per
    // (partner, period, tax class).
    type CoarseKey = (String, Period, TaxClass);
    let mut totals: BTreeMap<CoarseKey, (i64, String)> = BTreeMap::new();
    for ((partner, period, reference, tax_class), (amount, name)) in grouped {
        if !eligible.contains(&(partner.clone(), reference)) {
            continue;
        }
        let entry = totals
            .entry((partner, period, tax_class))
            .or_insert((0, name));
        entry.0 += amount;
    }
    if totals.is_empty() {
        return Err(ReconError::EmptyJoin { left: "line_items", right: "catalog" });
    }

    let obligations: Vec<Obligation> = totals
        .into_iter()
        .filter(|(_, (amount, _))| *amount != 0)
        .map(|((partner_id, period, tax_class), (target_minor, partner_name))| Obligation {
            key: format!("{period}{partner_id}{tax_class}"),
            period,
            partner_id,
            partner_name,
            tax_class,
            target_minor,
            tier: None,
            matched: None,
            expected_payment_minor: 0,
            final_payment_minor: gross_up(target_minor, tax_class),
        })
        .collect();

    if obligations.is_empty() {
        return Err(ReconError::EmptyInput { source: "obligations" });
    }

    Ok((obligations, warnings))
}
