use chrono::{Datelike, NaiveDate};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Periods
// ---------------------------------------------------------------------------

/// A settlement period (calendar month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    /// Parse a `YYYYMM` string (tolerates a trailing `.0` from numeric
    /// upstream exports).
    pub fn parse(raw: &str) -> Option<Period> {
        let s = raw.trim();
        let s = s.strip_suffix(".0").unwrap_or(s);
        if s.len() != 6 {
            return None;
        }
        let year: i32 = s[..4].parse().ok()?;
        let month: u32 = s[4..].parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Period { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Period {
        Period {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("valid period")
    }

    /// Last day of the month `n` months after this period.
    pub fn last_day_after(&self, n: u32) -> NaiveDate {
        let total = self.year * 12 + (self.month - 1) as i32 + n as i32 + 1;
        let (y, m) = (total.div_euclid(12), total.rem_euclid(12) as u32 + 1);
        NaiveDate::from_ymd_opt(y, m, 1)
            .expect("valid period")
            .pred_opt()
            .expect("not year zero")
    }

    /// Signed distance in whole months.
    pub fn months_between(&self, other: &Period) -> i32 {
        (self.year - other.year) * 12 + self.month as i32 - other.month as i32
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxClass {
    Taxable,
    ZeroRated,
    Exempt,
}

impl TaxClass {
    pub fn parse(raw: &str) -> Option<TaxClass> {
        match raw.trim() {
            "taxable" => Some(Self::Taxable),
            "zero_rated" => Some(Self::ZeroRated),
            "exempt" => Some(Self::Exempt),
            _ => None,
        }
    }

    /// The invoice class an obligation of this tax class must be
    /// substantiated by. Taxable and zero-rated purchases carry a tax
    /// invoice; exempt purchases carry a plain invoice.
    pub fn required_invoice_class(&self) -> InvoiceClass {
        match self {
            Self::Taxable | Self::ZeroRated => InvoiceClass::TaxInvoice,
            Self::Exempt => InvoiceClass::PlainInvoice,
        }
    }
}

impl std::fmt::Display for TaxClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Taxable => write!(f, "taxable"),
            Self::ZeroRated => write!(f, "zero_rated"),
            Self::Exempt => write!(f, "exempt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceClass {
    TaxInvoice,
    PlainInvoice,
}

impl InvoiceClass {
    pub fn parse(raw: &str) -> Option<InvoiceClass> {
        match raw.trim() {
            "tax_invoice" => Some(Self::TaxInvoice),
            "plain_invoice" => Some(Self::PlainInvoice),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaxInvoice => write!(f, "tax_invoice"),
            Self::PlainInvoice => write!(f, "plain_invoice"),
        }
    }
}

/// Cascade tier that produced a match. Declaration order is the
/// precedence order the engine runs them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    ExactRelaxed,
    Sequential,
    SequentialRelaxed,
    Partial,
    PartialManual,
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::ExactRelaxed => write!(f, "exact_relaxed"),
            Self::Sequential => write!(f, "sequential"),
            Self::SequentialRelaxed => write!(f, "sequential_relaxed"),
            Self::Partial => write!(f, "partial"),
            Self::PartialManual => write!(f, "partial_manual"),
        }
    }
}

// ---------------------------------------------------------------------------
// Input records (collaborator boundary)
// ---------------------------------------------------------------------------

/// A raw purchase line item as handed over by the ingestion collaborator.
#[derive(Debug, Clone)]
pub struct LineItem {
    pub period: String,
    pub partner_id: String,
    pub partner_name: String,
    pub reference_code: String,
    pub tax_class: TaxClass,
    pub amount_minor: i64,
}

/// An eligible (partner, reference) pair from the reference catalog.
#[derive(Debug, Clone)]
pub struct CatalogPair {
    pub partner_id: String,
    pub reference_code: String,
}

/// Primary evidence source row. Dates arrive as strings; parse failures
/// are recoverable and handled by the pool builder.
#[derive(Debug, Clone)]
pub struct PrimaryEvidenceRow {
    pub partner_id: String,
    pub partner_name: String,
    pub write_date: String,
    pub invoice_class: InvoiceClass,
    pub business_id: String,
    pub supply_minor: i64,
    pub tax_minor: i64,
    pub approval_id: String,
}

/// Secondary evidence source row, keyed by approval id. The collaborator
/// flattens the source's multi-level header before handing rows here.
#[derive(Debug, Clone)]
pub struct SecondaryEvidenceRow {
    pub approval_id: String,
    pub business_id: String,
    pub write_date: String,
    pub issue_date: String,
}

/// Accounting-ledger row. Debit/credit arrive numeric-as-text and may
/// carry thousands separators.
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub account_date: NaiveDate,
    pub voucher_no: String,
    pub counterparty_id: String,
    pub debit: String,
    pub credit: String,
}

/// Everything one batch run consumes.
pub struct ReconInput {
    pub line_items: Vec<LineItem>,
    pub catalog: Vec<CatalogPair>,
    pub primary_evidence: Vec<PrimaryEvidenceRow>,
    pub secondary_evidence: Vec<SecondaryEvidenceRow>,
    pub ledger: Vec<LedgerRow>,
}

// ---------------------------------------------------------------------------
// Obligations
// ---------------------------------------------------------------------------

/// Evidence aggregated onto a matched obligation.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedEvidence {
    pub write_date: Option<NaiveDate>,
    pub issue_date: Option<NaiveDate>,
    pub supply_minor: i64,
    pub tax_minor: i64,
    pub approval_id: String,
    pub business_id: String,
    pub member_count: usize,
}

/// An aggregated amount owed to a partner for one (period, tax class),
/// to be substantiated by evidence.
#[derive(Debug, Clone, Serialize)]
pub struct Obligation {
    pub period: Period,
    pub partner_id: String,
    pub partner_name: String,
    pub tax_class: TaxClass,
    pub target_minor: i64,
    /// Composite key `{period}{partner}{tax_class}`. Unique per batch.
    pub key: String,
    pub tier: Option<MatchTier>,
    pub matched: Option<MatchedEvidence>,
    /// Matched supply + tax (0 when unmatched).
    pub expected_payment_minor: i64,
    /// Target grossed up by VAT for taxable obligations.
    pub final_payment_minor: i64,
}

impl Obligation {
    pub fn is_matched(&self) -> bool {
        self.tier.is_some()
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Links a consumed record to the obligation (or evidence group, for
/// ledger entries) that consumed it. Renders as `{key}-{seq}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumptionTag {
    pub key: String,
    pub seq: usize,
}

impl std::fmt::Display for ConsumptionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.key, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMatchKind {
    /// Single ledger entry equal to supply + tax.
    ExactPayment,
    /// Subset of ledger entries summing to supply + tax.
    CombinedPayment,
}

impl std::fmt::Display for LedgerMatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactPayment => write!(f, "exact_payment"),
            Self::CombinedPayment => write!(f, "combined_payment"),
        }
    }
}

/// One calendar month's share of a split payment.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyPortion {
    /// `YYYY-MM`.
    pub month: String,
    pub amount_minor: i64,
}

/// Ledger-reconciliation outcome recorded on a consumed evidence record.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerMatch {
    pub kind: LedgerMatchKind,
    pub debit_minor: i64,
    pub voucher_no: String,
    pub account_date: NaiveDate,
    /// Set when the matched entries span more than one calendar month.
    pub needs_confirmation: bool,
    pub monthly: Vec<MonthlyPortion>,
}

/// An invoice-like record used to substantiate an obligation.
///
/// Consumed by at most one obligation, ever; once `consumption` is set
/// no later strategy may alter it.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecord {
    pub partner_id: String,
    pub partner_name: String,
    pub business_id: String,
    /// Authoritative write date (secondary source, primary fallback).
    /// `None` when neither source parsed; the record then has no
    /// (year, month) scope and only the residual sweep can see it.
    pub write_date: Option<NaiveDate>,
    pub issue_date: Option<NaiveDate>,
    pub invoice_class: InvoiceClass,
    pub supply_minor: i64,
    pub tax_minor: i64,
    pub approval_id: String,
    pub consumption: Option<ConsumptionTag>,
    pub tier: Option<MatchTier>,
    /// Set by the residual sweep for free, non-zero records.
    pub unresolved: bool,
    pub ledger: Option<LedgerMatch>,
}

impl EvidenceRecord {
    pub fn is_free(&self) -> bool {
        self.consumption.is_none()
    }

    pub fn scope(&self) -> Option<Period> {
        self.write_date.map(Period::from_date)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// An accounting-book entry matched against already-consumed evidence.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub account_date: NaiveDate,
    pub voucher_no: String,
    pub counterparty_id: String,
    pub debit_minor: i64,
    pub credit_minor: i64,
    /// Tag of the evidence group this entry pays, plus the entry's
    /// sequence inside the payment group.
    pub consumption: Option<ConsumptionTag>,
    pub kind: Option<LedgerMatchKind>,
}

impl LedgerEntry {
    pub fn is_free(&self) -> bool {
        self.consumption.is_none()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub as_of: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub obligations: Vec<Obligation>,
    pub evidence: Vec<EvidenceRecord>,
    pub ledger: Vec<LedgerEntry>,
    pub report: crate::validate::DiagnosticReport,
}

impl ReconResult {
    /// Evidence left for manual review by the residual sweep.
    pub fn unresolved_evidence(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.evidence.iter().filter(|r| r.unresolved)
    }

    /// Which ledger entries pay which evidence group: (entry tag, entry)
    /// for every consumed ledger entry.
    pub fn ledger_consumption(&self) -> impl Iterator<Item = (&ConsumptionTag, &LedgerEntry)> {
        self.ledger
            .iter()
            .filter_map(|e| e.consumption.as_ref().map(|tag| (tag, e)))
    }
}
