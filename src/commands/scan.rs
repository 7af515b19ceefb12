use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::models::{Currency, ReceiptData};
use crate::services::ingest::{BulkProgress, IngestEvent, ScanOutcome, UploadFile};
use crate::services::state::AppState;
use crate::utils::{format_money, image_mime_for_path};

/// Expands directories one level deep to the image files they contain.
/// Explicit file arguments are kept as given.
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = walkdir::WalkDir::new(path)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .filter(|e| is_image(e.path()))
                .map(|e| e.path().to_path_buf())
                .collect::<Vec<_>>();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn is_image(path: &Path) -> bool {
    image_mime_for_path(path).is_some()
}

/// One image is scanned for review; several go through the bulk loop, which
/// reads each file in turn.
pub async fn scan(
    state: &AppState,
    paths: &[PathBuf],
    currency: Currency,
    save: bool,
) -> Result<()> {
    let mut files = collect_images(paths);
    match files.len() {
        0 => Err(anyhow!("No receipt images found (accepted: png, jpeg, webp)")),
        1 => {
            let file = UploadFile::from_path(&files.remove(0))?;
            scan_one(state, &file, currency, save).await
        }
        _ => scan_batch(state, files, currency).await,
    }
}

async fn scan_one(
    state: &AppState,
    file: &UploadFile,
    currency: Currency,
    save: bool,
) -> Result<()> {
    match state.ingestor.scan_single(file, currency).await {
        Ok(ScanOutcome::Extracted(data)) => {
            print_receipt(&data);
            if save {
                let record = state.ingestor.save_extracted(data)?;
                println!("Saved receipt #{}", record.id);
            } else {
                println!("Not saved (--no-save)");
            }
            Ok(())
        }
        Ok(ScanOutcome::Queued(record)) => {
            println!(
                "Receipt saved locally as #{}. It will sync when you're back online.",
                record.id
            );
            Ok(())
        }
        Err(err) => Err(anyhow!("Failed to analyze receipt. {}", err)),
    }
}

async fn scan_batch(state: &AppState, files: Vec<PathBuf>, currency: Currency) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<IngestEvent>();
    let printer = tokio::spawn(async move {
        let mut progress = BulkProgress::default();
        while let Some(event) = rx.recv().await {
            progress.apply(&event);
            match &event {
                IngestEvent::FileStarted { index, name } => {
                    println!("[{}/{}] Processing {}", index + 1, progress.total, name)
                }
                IngestEvent::FileSynced { id, .. } => println!("    saved as #{}", id),
                IngestEvent::FileQueued { id, .. } => println!("    saved offline as #{}", id),
                IngestEvent::FileFailed { error, .. } => println!("    failed: {}", error),
                IngestEvent::Started { .. } | IngestEvent::Finished => {}
            }
        }
    });

    let result = state.ingestor.ingest_batch(files, currency, Some(&tx)).await;
    drop(tx);
    printer.await?;

    println!(
        "Upload complete: {} successful, {} failed",
        result.successful(),
        result.error_count
    );
    Ok(())
}

fn print_receipt(data: &ReceiptData) {
    println!("{}  ({})", data.merchant_name, data.transaction_date);
    println!(
        "  Total: {}  Tax: {}",
        format_money(data.total_amount, data.currency),
        format_money(data.tax_amount, data.currency)
    );
    for item in &data.line_items {
        println!("    - {}  {}", item.description, format_money(item.amount, data.currency));
    }
}
