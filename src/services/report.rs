use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use tracing::info;

use crate::error::ExportError;
use crate::models::{Currency, ReceiptRecord, SyncStatus};
use crate::utils::{format_money, parse_date};

/// List filters. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiptFilter {
    pub search: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency: Option<Currency>,
}

impl ReceiptFilter {
    pub fn is_active(&self) -> bool {
        self.search.as_deref().is_some_and(|s| !s.is_empty())
            || self.start_date.is_some()
            || self.end_date.is_some()
            || self.currency.is_some()
    }

    pub fn matches(&self, record: &ReceiptRecord) -> bool {
        if let Some(term) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let merchant = record.data.merchant_name.to_lowercase();
            if !merchant.contains(&term.to_lowercase()) {
                return false;
            }
        }

        if self.start_date.is_some() || self.end_date.is_some() {
            // An unreadable date can't satisfy a bound.
            let Some(date) = parse_date(&record.data.transaction_date) else {
                return false;
            };
            if self.start_date.is_some_and(|start| date < start) {
                return false;
            }
            if self.end_date.is_some_and(|end| date > end) {
                return false;
            }
        }

        self.currency.map_or(true, |c| record.data.currency == c)
    }

    pub fn apply<'a>(&self, records: &'a [ReceiptRecord]) -> Vec<&'a ReceiptRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitShare {
    pub currency: Currency,
    pub total: f64,
    pub per_person: f64,
}

/// Totals over the synced receipts that pass a filter.
#[derive(Debug, Clone)]
pub struct ExpenseSummary {
    pub filter: ReceiptFilter,
    pub synced: Vec<ReceiptRecord>,
    pub totals: BTreeMap<Currency, f64>,
    pub split_count: u32,
    /// Present when the totals reduce to a single currency.
    pub split: Option<SplitShare>,
}

impl ExpenseSummary {
    pub fn build(records: &[ReceiptRecord], filter: &ReceiptFilter, split_count: u32) -> Self {
        let synced: Vec<ReceiptRecord> = filter
            .apply(records)
            .into_iter()
            .filter(|r| r.status == SyncStatus::Synced)
            .cloned()
            .collect();

        let mut totals = BTreeMap::new();
        for record in &synced {
            *totals.entry(record.data.currency).or_insert(0.0) += record.data.total_amount;
        }

        let split_currency = match filter.currency {
            Some(currency) => Some(currency),
            None if totals.len() == 1 => totals.keys().next().copied(),
            None => None,
        };
        let split = split_currency.map(|currency| {
            let total = totals.get(&currency).copied().unwrap_or(0.0);
            let per_person = if split_count > 0 && total > 0.0 {
                total / f64::from(split_count)
            } else {
                0.0
            };
            SplitShare {
                currency,
                total,
                per_person,
            }
        });

        ExpenseSummary {
            filter: filter.clone(),
            synced,
            totals,
            split_count,
            split,
        }
    }

    pub fn document(&self, generated: NaiveDate) -> SummaryDocument<'_> {
        SummaryDocument {
            summary: self,
            generated,
        }
    }
}

/// Printable rendering of an [`ExpenseSummary`].
pub struct SummaryDocument<'a> {
    summary: &'a ExpenseSummary,
    generated: NaiveDate,
}

impl fmt::Display for SummaryDocument<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary;
        writeln!(f, "Expense Summary (Synced Only)")?;
        writeln!(f, "Generated: {}", self.generated.format("%Y-%m-%d"))?;
        writeln!(f)?;

        let filter = &summary.filter;
        if filter.is_active() {
            writeln!(f, "Filters")?;
            if let Some(term) = filter.search.as_deref().filter(|s| !s.is_empty()) {
                writeln!(f, "  Merchant contains: {}", term)?;
            }
            if let Some(start) = filter.start_date {
                writeln!(f, "  From: {}", start.format("%Y-%m-%d"))?;
            }
            if let Some(end) = filter.end_date {
                writeln!(f, "  To: {}", end.format("%Y-%m-%d"))?;
            }
            if let Some(currency) = filter.currency {
                writeln!(f, "  Currency: {}", currency)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Summary")?;
        writeln!(f, "  Total Synced Receipts: {}", summary.synced.len())?;
        writeln!(f, "  Total Expenses by Currency:")?;
        for (currency, total) in &summary.totals {
            writeln!(f, "    {}: {}", currency, format_money(*total, *currency))?;
        }
        if let Some(split) = summary.split.as_ref().filter(|_| summary.split_count > 1) {
            writeln!(f, "  Split Between: {} people", summary.split_count)?;
            writeln!(
                f,
                "  Amount Per Person: {}",
                format_money(split.per_person, split.currency)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Receipts")?;
        for record in &summary.synced {
            let data = &record.data;
            writeln!(f, "{}", "-".repeat(60))?;
            writeln!(f, "{}  ({})", data.merchant_name, data.transaction_date)?;
            writeln!(
                f,
                "  Total: {}  Tax: {}",
                format_money(data.total_amount, data.currency),
                format_money(data.tax_amount, data.currency)
            )?;
            for item in &data.line_items {
                writeln!(
                    f,
                    "    - {}  {}",
                    item.description,
                    format_money(item.amount, data.currency)
                )?;
            }
        }
        Ok(())
    }
}

pub fn default_export_name(date: NaiveDate) -> String {
    format!("expense_summary_{}.txt", date.format("%Y-%m-%d"))
}

/// Writes the summary to `path`. The document is staged in a sibling file
/// and renamed into place, so a failure never leaves a partial export.
pub fn export_summary(
    summary: &ExpenseSummary,
    path: &Path,
    generated: NaiveDate,
) -> Result<(), ExportError> {
    if summary.synced.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let staging = path.with_extension("partial");
    let contents = summary.document(generated).to_string();
    let written = std::fs::write(&staging, contents).and_then(|_| std::fs::rename(&staging, path));
    if let Err(err) = written {
        let _ = std::fs::remove_file(&staging);
        return Err(err.into());
    }

    info!(path = %path.display(), receipts = summary.synced.len(), "Exported expense summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EncodedImage, LineItem, ReceiptData};

    fn synced(
        id: i64,
        merchant: &str,
        date: &str,
        currency: Currency,
        total: f64,
    ) -> ReceiptRecord {
        ReceiptRecord::synced(
            id,
            ReceiptData {
                merchant_name: merchant.to_string(),
                transaction_date: date.to_string(),
                currency,
                total_amount: total,
                tax_amount: total / 10.0,
                line_items: vec![LineItem {
                    description: "Misc".to_string(),
                    amount: total,
                }],
            },
        )
    }

    fn pending(id: i64) -> ReceiptRecord {
        ReceiptRecord::pending(
            id,
            "Pending Sync".to_string(),
            "2024-01-10".to_string(),
            Currency::USD,
            EncodedImage {
                data: "AA==".to_string(),
                mime_type: "image/png".to_string(),
            },
        )
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample() -> Vec<ReceiptRecord> {
        vec![
            synced(1, "Fresh Market", "2024-01-05", Currency::USD, 40.0),
            synced(2, "fresh bakery", "2024-02-11", Currency::USD, 10.0),
            synced(3, "Dubai Mall", "2024-02-20", Currency::AED, 300.0),
            pending(4),
        ]
    }

    #[test]
    fn search_is_case_insensitive() {
        let filter = ReceiptFilter {
            search: Some("FRESH".to_string()),
            ..Default::default()
        };
        let ids: Vec<i64> = filter.apply(&sample()).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let filter = ReceiptFilter {
            start_date: Some(day("2024-02-11")),
            end_date: Some(day("2024-02-20")),
            ..Default::default()
        };
        let ids: Vec<i64> = filter.apply(&sample()).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn unparsable_date_fails_active_bounds() {
        let odd = synced(9, "Odd", "sometime", Currency::USD, 1.0);
        assert!(ReceiptFilter::default().matches(&odd));
        let bounded = ReceiptFilter {
            start_date: Some(day("2000-01-01")),
            ..Default::default()
        };
        assert!(!bounded.matches(&odd));
    }

    #[test]
    fn totals_cover_synced_records_only() {
        let summary = ExpenseSummary::build(&sample(), &ReceiptFilter::default(), 1);
        assert_eq!(summary.synced.len(), 3);
        assert_eq!(summary.totals.get(&Currency::USD), Some(&50.0));
        assert_eq!(summary.totals.get(&Currency::AED), Some(&300.0));
        assert!(summary.split.is_none());
    }

    #[test]
    fn single_currency_total_can_be_split() {
        let records = sample();
        let filter = ReceiptFilter {
            search: Some("fresh".to_string()),
            ..Default::default()
        };
        let summary = ExpenseSummary::build(&records, &filter, 4);
        assert_eq!(
            summary.split,
            Some(SplitShare {
                currency: Currency::USD,
                total: 50.0,
                per_person: 12.5
            })
        );
    }

    #[test]
    fn currency_filter_selects_split_currency() {
        let filter = ReceiptFilter {
            currency: Some(Currency::GBP),
            ..Default::default()
        };
        let summary = ExpenseSummary::build(&sample(), &filter, 3);
        let split = summary.split.unwrap();
        assert_eq!(split.currency, Currency::GBP);
        assert_eq!(split.total, 0.0);
        assert_eq!(split.per_person, 0.0);
    }

    #[test]
    fn document_lists_split_only_for_groups() {
        let filter = ReceiptFilter {
            currency: Some(Currency::USD),
            ..Default::default()
        };
        let alone = ExpenseSummary::build(&sample(), &filter, 1)
            .document(day("2024-03-01"))
            .to_string();
        assert!(alone.contains("Generated: 2024-03-01"));
        assert!(alone.contains("Currency: USD"));
        assert!(alone.contains("USD: $50.00"));
        assert!(!alone.contains("Split Between"));

        let shared = ExpenseSummary::build(&sample(), &filter, 2)
            .document(day("2024-03-01"))
            .to_string();
        assert!(shared.contains("Split Between: 2 people"));
        assert!(shared.contains("Amount Per Person: $25.00"));
        assert!(!shared.contains("Pending Sync"));
    }

    #[test]
    fn export_writes_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(default_export_name(day("2024-03-01")));
        let summary = ExpenseSummary::build(&sample(), &ReceiptFilter::default(), 1);

        export_summary(&summary, &path, day("2024-03-01")).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Dubai Mall"));
        assert!(written.contains("AED 300.00"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_export_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("summary.txt");
        let summary = ExpenseSummary::build(&sample(), &ReceiptFilter::default(), 1);

        assert!(matches!(
            export_summary(&summary, &path, day("2024-03-01")),
            Err(ExportError::Io(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn export_needs_synced_receipts() {
        let summary = ExpenseSummary::build(&[pending(1)], &ReceiptFilter::default(), 1);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            export_summary(&summary, &dir.path().join("x.txt"), day("2024-03-01")),
            Err(ExportError::NothingToExport)
        ));
    }
}
