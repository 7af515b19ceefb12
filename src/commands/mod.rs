pub mod receipts;
pub mod scan;
pub mod settings;

use crate::services::sync::{SkipReason, SyncOutcome};

pub fn describe_sync(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Skipped(SkipReason::Offline) => {
            "Offline, pending receipts will sync later".to_string()
        }
        SyncOutcome::Skipped(SkipReason::NothingPending) => "Nothing to sync".to_string(),
        SyncOutcome::Skipped(SkipReason::AlreadyRunning) => {
            "A sync is already running".to_string()
        }
        SyncOutcome::Completed(report) if report.failed == 0 => {
            format!("Synced {} offline receipt(s)", report.synced)
        }
        SyncOutcome::Completed(report) => format!(
            "Synced {} offline receipt(s), {} still pending",
            report.synced, report.failed
        ),
    }
}
