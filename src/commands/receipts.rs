use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Args;
use std::path::PathBuf;

use crate::models::Currency;
use crate::services::report::{default_export_name, export_summary, ExpenseSummary, ReceiptFilter};
use crate::services::state::AppState;
use crate::utils::format_money;

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Case-insensitive merchant name search
    #[arg(long)]
    pub search: Option<String>,

    /// Earliest transaction date (inclusive)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub from: Option<NaiveDate>,

    /// Latest transaction date (inclusive)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub to: Option<NaiveDate>,

    /// Only receipts in this currency
    #[arg(long)]
    pub currency: Option<Currency>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> ReceiptFilter {
        ReceiptFilter {
            search: self.search.clone(),
            start_date: self.from,
            end_date: self.to,
            currency: self.currency,
        }
    }
}

pub fn list(state: &AppState, filter: &FilterArgs, split_count: u32) -> Result<()> {
    let records = state.store.records()?;
    let filter = filter.to_filter();
    let visible = filter.apply(&records);

    if visible.is_empty() {
        if filter.is_active() {
            println!("No receipts match the current filters");
        } else {
            println!("No receipts saved yet");
        }
        return Ok(());
    }

    for record in &visible {
        let data = &record.data;
        if record.is_pending() {
            println!(
                "#{:<14} {:<10}  {}  [pending sync]",
                record.id, data.transaction_date, data.merchant_name
            );
        } else {
            println!(
                "#{:<14} {:<10}  {}  {}",
                record.id,
                data.transaction_date,
                data.merchant_name,
                format_money(data.total_amount, data.currency)
            );
        }
    }

    let summary = ExpenseSummary::build(&records, &filter, split_count);
    if summary.totals.is_empty() {
        return Ok(());
    }
    println!();
    println!("Totals ({} synced):", summary.synced.len());
    for (currency, total) in &summary.totals {
        println!("  {}: {}", currency, format_money(*total, *currency));
    }
    match &summary.split {
        Some(split) if split_count > 1 => println!(
            "  Split between {}: {} each",
            split_count,
            format_money(split.per_person, split.currency)
        ),
        None if split_count > 1 => {
            println!("  Filter to a single currency to split the total")
        }
        _ => {}
    }
    Ok(())
}

pub fn delete(state: &AppState, id: i64) -> Result<()> {
    if state.store.delete(id)? {
        println!("Deleted receipt #{}", id);
    } else {
        println!("No receipt with id #{}", id);
    }
    Ok(())
}

pub fn export(
    state: &AppState,
    out: Option<PathBuf>,
    filter: &FilterArgs,
    split_count: u32,
) -> Result<()> {
    let today = Local::now().date_naive();
    let path = out.unwrap_or_else(|| PathBuf::from(default_export_name(today)));
    let records = state.store.records()?;
    let summary = ExpenseSummary::build(&records, &filter.to_filter(), split_count);

    export_summary(&summary, &path, today).context("Failed to export summary")?;
    println!("Exported {} receipt(s) to {}", summary.synced.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_args_map_onto_filter() {
        let args = FilterArgs {
            search: Some("cafe".to_string()),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            to: None,
            currency: Some(Currency::INR),
        };
        let filter = args.to_filter();
        assert!(filter.is_active());
        assert_eq!(filter.currency, Some(Currency::INR));
        assert!(!FilterArgs::default().to_filter().is_active());
    }
}
