//! CSV loaders for the five tabular inputs. This is the ingestion
//! collaborator's boundary made concrete: fixed headers, strict parsing
//! for fields the engine cannot recover from, pass-through strings for
//! the ones it can.

use chrono::NaiveDate;

use vouch_recon::error::ReconError;
use vouch_recon::model::{
    CatalogPair, InvoiceClass, LedgerRow, LineItem, PrimaryEvidenceRow, SecondaryEvidenceRow,
    TaxClass,
};

struct Columns {
    source: String,
    headers: Vec<String>,
}

impl Columns {
    fn new(source: &str, reader: &mut csv::Reader<&[u8]>) -> Result<Self, ReconError> {
        let headers = reader
            .headers()
            .map_err(|e| ReconError::Io(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        Ok(Self { source: source.into(), headers })
    }

    fn idx(&self, name: &str) -> Result<usize, ReconError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ReconError::MissingColumn {
                source: self.source.clone(),
                column: name.into(),
            })
    }
}

fn row_err(source: &str, row: usize, msg: impl Into<String>) -> ReconError {
    ReconError::RowParse { source: source.into(), row, msg: msg.into() }
}

fn parse_i64(source: &str, row: usize, field: &str, raw: &str) -> Result<i64, ReconError> {
    raw.trim()
        .parse()
        .map_err(|_| row_err(source, row, format!("cannot parse {field} '{raw}'")))
}

pub fn load_line_items(csv_data: &str) -> Result<Vec<LineItem>, ReconError> {
    const SOURCE: &str = "line_items";
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());
    let col = Columns::new(SOURCE, &mut reader)?;
    let period = col.idx("period")?;
    let partner_id = col.idx("partner_id")?;
    let partner_name = col.idx("partner_name")?;
    let reference_code = col.idx("reference_code")?;
    let tax_class = col.idx("tax_class")?;
    let amount = col.idx("amount_minor")?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let get = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let tax_raw = get(tax_class);
        let tax = TaxClass::parse(&tax_raw)
            .ok_or_else(|| row_err(SOURCE, i, format!("unknown tax class '{tax_raw}'")))?;
        rows.push(LineItem {
            period: get(period),
            partner_id: get(partner_id),
            partner_name: get(partner_name),
            reference_code: get(reference_code),
            tax_class: tax,
            amount_minor: parse_i64(SOURCE, i, "amount_minor", &get(amount))?,
        });
    }
    Ok(rows)
}

pub fn load_catalog(csv_data: &str) -> Result<Vec<CatalogPair>, ReconError> {
    const SOURCE: &str = "catalog";
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());
    let col = Columns::new(SOURCE, &mut reader)?;
    let partner_id = col.idx("partner_id")?;
    let reference_code = col.idx("reference_code")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        rows.push(CatalogPair {
            partner_id: record.get(partner_id).unwrap_or("").to_string(),
            reference_code: record.get(reference_code).unwrap_or("").to_string(),
        });
    }
    Ok(rows)
}

pub fn load_primary_evidence(csv_data: &str) -> Result<Vec<PrimaryEvidenceRow>, ReconError> {
    const SOURCE: &str = "evidence";
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());
    let col = Columns::new(SOURCE, &mut reader)?;
    let partner_id = col.idx("partner_id")?;
    let partner_name = col.idx("partner_name")?;
    let write_date = col.idx("write_date")?;
    let invoice_class = col.idx("invoice_class")?;
    let business_id = col.idx("business_id")?;
    let supply = col.idx("supply_minor")?;
    let tax = col.idx("tax_minor")?;
    let approval_id = col.idx("approval_id")?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let get = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let class_raw = get(invoice_class);
        let class = InvoiceClass::parse(&class_raw)
            .ok_or_else(|| row_err(SOURCE, i, format!("unknown invoice class '{class_raw}'")))?;
        rows.push(PrimaryEvidenceRow {
            partner_id: get(partner_id),
            partner_name: get(partner_name),
            write_date: get(write_date),
            invoice_class: class,
            business_id: get(business_id),
            supply_minor: parse_i64(SOURCE, i, "supply_minor", &get(supply))?,
            tax_minor: parse_i64(SOURCE, i, "tax_minor", &get(tax))?,
            approval_id: get(approval_id),
        });
    }
    Ok(rows)
}

pub fn load_secondary_evidence(csv_data: &str) -> Result<Vec<SecondaryEvidenceRow>, ReconError> {
    const SOURCE: &str = "evidence_dates";
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());
    let col = Columns::new(SOURCE, &mut reader)?;
    let approval_id = col.idx("approval_id")?;
    let business_id = col.idx("business_id")?;
    let write_date = col.idx("write_date")?;
    let issue_date = col.idx("issue_date")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let get = |idx: usize| record.get(idx).unwrap_or("").to_string();
        rows.push(SecondaryEvidenceRow {
            approval_id: get(approval_id),
            business_id: get(business_id),
            write_date: get(write_date),
            issue_date: get(issue_date),
        });
    }
    Ok(rows)
}

pub fn load_ledger(csv_data: &str) -> Result<Vec<LedgerRow>, ReconError> {
    const SOURCE: &str = "ledger";
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());
    let col = Columns::new(SOURCE, &mut reader)?;
    let account_date = col.idx("account_date")?;
    let voucher_no = col.idx("voucher_no")?;
    let counterparty_id = col.idx("counterparty_id")?;
    let debit = col.idx("debit")?;
    let credit = col.idx("credit")?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let get = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let date_raw = get(account_date);
        let date = NaiveDate::parse_from_str(date_raw.trim(), "%Y-%m-%d")
            .map_err(|_| row_err(SOURCE, i, format!("cannot parse account date '{date_raw}'")))?;
        rows.push(LedgerRow {
            account_date: date,
            voucher_no: get(voucher_no),
            counterparty_id: get(counterparty_id),
            debit: get(debit),
            credit: get(credit),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_line_items_basic() {
        let csv = "\
period,partner_id,partner_name,reference_code,tax_class,amount_minor
202401,100,Acme Trading,7,taxable,1000000
202401,100,Acme Trading,8,exempt,-50000
";
        let rows = load_line_items(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].partner_id, "100");
        assert_eq!(rows[0].tax_class, TaxClass::Taxable);
        assert_eq!(rows[0].amount_minor, 1_000_000);
        assert_eq!(rows[1].amount_minor, -50_000);
    }

    #[test]
    fn load_line_items_rejects_bad_tax_class() {
        let csv = "\
period,partner_id,partner_name,reference_code,tax_class,amount_minor
202401,100,Acme,7,unknown,1000
";
        let err = load_line_items(csv).unwrap_err();
        assert!(err.to_string().contains("unknown tax class"));
    }

    #[test]
    fn missing_column_is_reported() {
        let csv = "period,partner_id\n202401,100\n";
        let err = load_line_items(csv).unwrap_err();
        assert!(err.to_string().contains("partner_name"));
    }

    #[test]
    fn load_primary_evidence_basic() {
        let csv = "\
partner_id,partner_name,write_date,invoice_class,business_id,supply_minor,tax_minor,approval_id
100,Acme Trading,2024-01-15,tax_invoice,123-45-67890,1000000,100000,AP-1
";
        let rows = load_primary_evidence(csv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_class, InvoiceClass::TaxInvoice);
        assert_eq!(rows[0].business_id, "123-45-67890");
    }

    #[test]
    fn load_ledger_keeps_amounts_as_text() {
        let csv = "\
account_date,voucher_no,counterparty_id,debit,credit
2024-02-05,V-1,1234567890,\"1,100,000\",0
";
        let rows = load_ledger(csv).unwrap();
        assert_eq!(rows.len(), 1);
        // thousands separators survive to the engine, which owns parsing
        assert_eq!(rows[0].debit, "1,100,000");
    }

    #[test]
    fn load_ledger_rejects_bad_date() {
        let csv = "\
account_date,voucher_no,counterparty_id,debit,credit
02/05/2024,V-1,1234567890,1000,0
";
        let err = load_ledger(csv).unwrap_err();
        assert!(err.to_string().contains("account date"));
    }

    #[test]
    fn load_secondary_evidence_basic() {
        let csv = "\
approval_id,business_id,write_date,issue_date
AP-1,123-45-67890,2024-01-10,2024-01-12
";
        let rows = load_secondary_evidence(csv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].approval_id, "AP-1");
    }
}
