use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::aggregate::canonical_code;
use crate::error::ReconError;
use crate::model::{
    ConsumptionTag, EvidenceRecord, InvoiceClass, MatchTier, Obligation, Period,
    PrimaryEvidenceRow, SecondaryEvidenceRow,
};

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Arena of evidence records addressed by stable index. Strategies query
/// candidate indices and mutate consumption state in place; indices never
/// move for the lifetime of a run.
#[derive(Debug)]
pub struct EvidencePool {
    pub records: Vec<EvidenceRecord>,
}

impl EvidencePool {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Free records in the given (partner, year, month) scope, optionally
    /// constrained to an invoice class. Returned in pool insertion order;
    /// tiers apply their own date sort on top.
    pub fn candidates(
        &self,
        partner_id: &str,
        scope: Period,
        class: Option<InvoiceClass>,
    ) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_free())
            .filter(|(_, r)| r.partner_id == partner_id)
            .filter(|(_, r)| r.scope() == Some(scope))
            .filter(|(_, r)| class.map_or(true, |c| r.invoice_class == c))
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark a record consumed. Consumption is monotonic: a consumed
    /// record is never re-tagged.
    pub fn consume(&mut self, idx: usize, tag: ConsumptionTag, tier: MatchTier) {
        let record = &mut self.records[idx];
        debug_assert!(record.is_free(), "evidence {idx} consumed twice");
        record.consumption = Some(tag);
        record.tier = Some(tier);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Evidence partner/business ids go through the same integer-then-string
/// coercion as obligations, but a non-numeric id is kept verbatim rather
/// than dropping the record.
pub(crate) fn canon_or_raw(raw: &str) -> String {
    canonical_code(raw).unwrap_or_else(|| raw.trim().to_string())
}

fn parse_date(raw: &str) -> Result<Option<NaiveDate>, ()> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Some).map_err(|_| ())
}

/// Merge the two evidence sources into one candidate pool.
///
/// The secondary source is authoritative for write/issue dates and the
/// counterparty business id; it is keyed by approval id, deduplicated
/// keep-first. Records for partners absent from the obligation set are
/// discarded up front.
pub fn build_pool(
    primary: &[PrimaryEvidenceRow],
    secondary: &[SecondaryEvidenceRow],
    obligations: &[Obligation],
) -> Result<(EvidencePool, Vec<String>), ReconError> {
    if primary.is_empty() {
        return Err(ReconError::EmptyInput { source: "primary_evidence" });
    }

    let mut warnings = Vec::new();

    // Lookup table from the secondary source, keep-first by approval id.
    let mut lookup: HashMap<&str, &SecondaryEvidenceRow> = HashMap::new();
    for row in secondary {
        let approval = row.approval_id.trim();
        if approval.is_empty() {
            continue;
        }
        if lookup.contains_key(approval) {
            warnings.push(format!(
                "secondary evidence: duplicate approval id '{approval}', keeping first occurrence"
            ));
            continue;
        }
        lookup.insert(approval, row);
    }

    let known_partners: BTreeSet<&str> =
        obligations.iter().map(|o| o.partner_id.as_str()).collect();

    let mut records = Vec::new();
    for (i, row) in primary.iter().enumerate() {
        let partner_id = canon_or_raw(&row.partner_id);
        if !known_partners.contains(partner_id.as_str()) {
            continue;
        }

        let approval_id = row.approval_id.trim().to_string();
        let matched = lookup.get(approval_id.as_str());

        // Authoritative write date from the secondary source, primary
        // fallback when the secondary row is absent or unparseable.
        let secondary_write = match matched.map(|m| parse_date(&m.write_date)) {
            Some(Ok(d)) => d,
            Some(Err(())) => {
                warnings.push(format!(
                    "evidence row {i} (approval '{approval_id}'): unparseable secondary write date"
                ));
                None
            }
            None => None,
        };
        let write_date = match secondary_write {
            Some(d) => Some(d),
            None => match parse_date(&row.write_date) {
                Ok(d) => d,
                Err(()) => {
                    warnings.push(format!(
                        "evidence row {i} (approval '{approval_id}'): unparseable write date \
                         '{}', excluded from date-scoped matching",
                        row.write_date
                    ));
                    None
                }
            },
        };

        let issue_date = match matched.map(|m| parse_date(&m.issue_date)) {
            Some(Ok(d)) => d,
            Some(Err(())) => {
                warnings.push(format!(
                    "evidence row {i} (approval '{approval_id}'): unparseable issue date"
                ));
                None
            }
            None => None,
        };

        let business_id = matched
            .map(|m| m.business_id.as_str())
            .unwrap_or(row.business_id.as_str())
            .replace('-', "");

        records.push(EvidenceRecord {
            partner_id,
            partner_name: row.partner_name.clone(),
            business_id,
            write_date,
            issue_date,
            invoice_class: row.invoice_class,
            supply_minor: row.supply_minor,
            tax_minor: row.tax_minor,
            approval_id,
            consumption: None,
            tier: None,
            unresolved: false,
            ledger: None,
        });
    }

    if records.is_empty() {
        return Err(ReconError::EmptyInput { source: "evidence" });
    }

    Ok((EvidencePool { records }, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaxClass;

    fn ob(partner: &str) -> Obligation {
        Obligation {
            period: Period { year: 2024, month: 1 },
            partner_id: partner.into(),
            partner_name: format!("Partner {partner}"),
            tax_class: TaxClass::Taxable,
            target_minor: 1_000_000,
            key: format!("202401{partner}taxable"),
            tier: None,
            matched: None,
            expected_payment_minor: 0,
            final_payment_minor: 1_100_000,
        }
    }

    fn primary(partner: &str, approval: &str, supply: i64) -> PrimaryEvidenceRow {
        PrimaryEvidenceRow {
            partner_id: partner.into(),
            partner_name: format!("Partner {partner}"),
            write_date: "2024-01-20".into(),
            invoice_class: InvoiceClass::TaxInvoice,
            business_id: "123-45-67890".into(),
            supply_minor: supply,
            tax_minor: supply / 10,
            approval_id: approval.into(),
        }
    }

    fn secondary(approval: &str, write: &str, issue: &str) -> SecondaryEvidenceRow {
        SecondaryEvidenceRow {
            approval_id: approval.into(),
            business_id: "123-45-67890".into(),
            write_date: write.into(),
            issue_date: issue.into(),
        }
    }

    #[test]
    fn secondary_dates_are_authoritative() {
        let obligations = vec![ob("100")];
        let prim = vec![primary("100", "A1", 500)];
        let sec = vec![secondary("A1", "2024-01-10", "2024-01-12")];
        let (pool, warnings) = build_pool(&prim, &sec, &obligations).unwrap();
        assert!(warnings.is_empty());
        let r = &pool.records[0];
        assert_eq!(r.write_date, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(r.issue_date, NaiveDate::from_ymd_opt(2024, 1, 12));
        assert_eq!(r.scope(), Some(Period { year: 2024, month: 1 }));
    }

    #[test]
    fn primary_write_date_fallback() {
        let obligations = vec![ob("100")];
        let prim = vec![primary("100", "A1", 500)];
        let (pool, _) = build_pool(&prim, &[], &obligations).unwrap();
        let r = &pool.records[0];
        assert_eq!(r.write_date, NaiveDate::from_ymd_opt(2024, 1, 20));
        assert_eq!(r.issue_date, None);
    }

    #[test]
    fn duplicate_approval_keeps_first() {
        let obligations = vec![ob("100")];
        let prim = vec![primary("100", "A1", 500)];
        let sec = vec![
            secondary("A1", "2024-01-10", "2024-01-11"),
            secondary("A1", "2024-01-25", "2024-01-26"),
        ];
        let (pool, warnings) = build_pool(&prim, &sec, &obligations).unwrap();
        assert_eq!(pool.records[0].write_date, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("duplicate approval id"));
    }

    #[test]
    fn unrelated_partner_discarded() {
        let obligations = vec![ob("100")];
        let prim = vec![primary("100", "A1", 500), primary("999", "A2", 700)];
        let (pool, _) = build_pool(&prim, &[], &obligations).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.records[0].approval_id, "A1");
    }

    #[test]
    fn business_id_separator_stripped() {
        let obligations = vec![ob("100")];
        let prim = vec![primary("100", "A1", 500)];
        let sec = vec![secondary("A1", "2024-01-10", "2024-01-11")];
        let (pool, _) = build_pool(&prim, &sec, &obligations).unwrap();
        assert_eq!(pool.records[0].business_id, "1234567890");
    }

    #[test]
    fn bad_date_leaves_record_unscoped() {
        let obligations = vec![ob("100")];
        let mut row = primary("100", "A1", 500);
        row.write_date = "not-a-date".into();
        let (pool, warnings) = build_pool(&[row], &[], &obligations).unwrap();
        assert_eq!(pool.records[0].write_date, None);
        assert_eq!(pool.records[0].scope(), None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn empty_primary_is_fatal() {
        let err = build_pool(&[], &[], &[ob("100")]).unwrap_err();
        assert!(matches!(err, ReconError::EmptyInput { source: "primary_evidence" }));
    }

    #[test]
    fn all_filtered_is_fatal() {
        let prim = vec![primary("999", "A1", 500)];
        let err = build_pool(&prim, &[], &[ob("100")]).unwrap_err();
        assert!(matches!(err, ReconError::EmptyInput { source: "evidence" }));
    }

    #[test]
    fn candidate_query_scopes_and_filters() {
        let obligations = vec![ob("100")];
        let mut feb = primary("100", "A2", 700);
        feb.write_date = "2024-02-05".into();
        let mut plain = primary("100", "A3", 900);
        plain.invoice_class = InvoiceClass::PlainInvoice;
        let prim = vec![primary("100", "A1", 500), feb, plain];
        let (pool, _) = build_pool(&prim, &[], &obligations).unwrap();

        let jan = Period { year: 2024, month: 1 };
        let tax_only = pool.candidates("100", jan, Some(InvoiceClass::TaxInvoice));
        assert_eq!(tax_only, vec![0]);
        let any_class = pool.candidates("100", jan, None);
        assert_eq!(any_class, vec![0, 2]);
    }
}
