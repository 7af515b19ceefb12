use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::error::{IngestError, StoreError};
use crate::models::{Currency, EncodedImage, ReceiptData, ReceiptRecord};
use crate::services::connectivity::Connectivity;
use crate::services::gemini::ReceiptExtractor;
use crate::services::store::ReceiptStore;
use crate::utils::{image_mime_for_path, is_supported_image_mime, today_iso};

const SINGLE_PLACEHOLDER: &str = "Pending Sync";

/// One selected file: raw bytes plus the mime type it was offered with.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        UploadFile {
            name: name.into(),
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mime_type = image_mime_for_path(path).unwrap_or("application/octet-stream");
        Ok(UploadFile::new(display_name(path), bytes, mime_type))
    }

    /// Base64-encodes the file for the extraction API.
    pub fn encode(&self) -> Result<EncodedImage, IngestError> {
        if !is_supported_image_mime(&self.mime_type) || self.bytes.is_empty() {
            return Err(IngestError::UnsupportedImage {
                name: self.name.clone(),
                mime_type: self.mime_type.clone(),
            });
        }
        Ok(EncodedImage {
            data: general_purpose::STANDARD.encode(&self.bytes),
            mime_type: self.mime_type.clone(),
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// A batch entry. Paths are read when their turn comes, so an unreadable
/// file fails on its own without stopping the batch.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Loaded(UploadFile),
    Path(PathBuf),
}

impl UploadSource {
    pub fn name(&self) -> String {
        match self {
            UploadSource::Loaded(file) => file.name.clone(),
            UploadSource::Path(path) => display_name(path),
        }
    }

    fn load(&self) -> Result<Cow<'_, UploadFile>, IngestError> {
        match self {
            UploadSource::Loaded(file) => Ok(Cow::Borrowed(file)),
            UploadSource::Path(path) => UploadFile::from_path(path).map(Cow::Owned),
        }
    }
}

impl From<UploadFile> for UploadSource {
    fn from(file: UploadFile) -> Self {
        UploadSource::Loaded(file)
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::Path(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    Started { total: usize },
    FileStarted { index: usize, name: String },
    FileSynced { index: usize, id: i64 },
    FileQueued { index: usize, id: i64 },
    FileFailed { index: usize, name: String, error: String },
    Finished,
}

/// Batch progress, folded from [`IngestEvent`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkProgress {
    pub total: usize,
    pub completed: usize,
    pub error_count: usize,
    pub current_file_name: String,
}

impl BulkProgress {
    pub fn apply(&mut self, event: &IngestEvent) {
        match event {
            IngestEvent::Started { total } => {
                *self = BulkProgress {
                    total: *total,
                    ..BulkProgress::default()
                };
            }
            IngestEvent::FileStarted { index, name } => {
                self.completed = *index;
                self.current_file_name = name.clone();
            }
            IngestEvent::FileSynced { index, .. } | IngestEvent::FileQueued { index, .. } => {
                self.completed = index + 1;
            }
            IngestEvent::FileFailed { index, .. } => {
                self.completed = index + 1;
                self.error_count += 1;
            }
            IngestEvent::Finished => {
                self.completed = self.total;
                self.current_file_name = "Finished".to_string();
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub fn successful(&self) -> usize {
        self.total - self.error_count
    }
}

/// Outcome of scanning one file interactively.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Extracted online; nothing is stored until [`Ingestor::save_extracted`].
    Extracted(ReceiptData),
    /// Stored offline as a pending record.
    Queued(ReceiptRecord),
}

enum Ingested {
    Synced(i64),
    Queued(i64),
}

struct Emitter<'a> {
    progress: BulkProgress,
    events: Option<&'a UnboundedSender<IngestEvent>>,
}

impl Emitter<'_> {
    fn emit(&mut self, event: IngestEvent) {
        self.progress.apply(&event);
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

pub struct Ingestor {
    store: Arc<ReceiptStore>,
    extractor: Arc<dyn ReceiptExtractor>,
    connectivity: Arc<Connectivity>,
}

impl Ingestor {
    pub fn new(
        store: Arc<ReceiptStore>,
        extractor: Arc<dyn ReceiptExtractor>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        Ingestor {
            store,
            extractor,
            connectivity,
        }
    }

    /// Processes `files` strictly in order, one at a time. A failing file is
    /// counted and skipped; the rest of the batch still runs. Progress events
    /// go to `events` as they happen and the folded totals are returned.
    pub async fn ingest_batch<S: Into<UploadSource>>(
        &self,
        files: Vec<S>,
        currency: Currency,
        events: Option<&UnboundedSender<IngestEvent>>,
    ) -> BulkProgress {
        let files: Vec<UploadSource> = files.into_iter().map(Into::into).collect();
        let mut emitter = Emitter {
            progress: BulkProgress::default(),
            events,
        };
        emitter.emit(IngestEvent::Started { total: files.len() });

        for (index, source) in files.iter().enumerate() {
            let name = source.name();
            emitter.emit(IngestEvent::FileStarted {
                index,
                name: name.clone(),
            });
            match self.ingest_one(source, index, currency).await {
                Ok(Ingested::Synced(id)) => emitter.emit(IngestEvent::FileSynced { index, id }),
                Ok(Ingested::Queued(id)) => emitter.emit(IngestEvent::FileQueued { index, id }),
                Err(err) => {
                    warn!(file = %name, error = %err, "Failed to process receipt");
                    emitter.emit(IngestEvent::FileFailed {
                        index,
                        name,
                        error: err.to_string(),
                    });
                }
            }
        }

        emitter.emit(IngestEvent::Finished);
        info!(
            total = emitter.progress.total,
            failed = emitter.progress.error_count,
            "Bulk upload finished"
        );
        emitter.progress
    }

    async fn ingest_one(
        &self,
        source: &UploadSource,
        index: usize,
        currency: Currency,
    ) -> Result<Ingested, IngestError> {
        let file = source.load()?;
        let image = file.encode()?;
        if self.connectivity.is_online() {
            let data = self.extractor.extract(&image, currency).await?;
            let id = self.store.allocate_id(index as i64)?;
            self.store.add(ReceiptRecord::synced(id, data))?;
            Ok(Ingested::Synced(id))
        } else {
            let id = self.store.allocate_id(index as i64)?;
            let record = ReceiptRecord::pending(
                id,
                bulk_placeholder_name(&file.name),
                today_iso(),
                currency,
                image,
            );
            self.store.add(record)?;
            Ok(Ingested::Queued(id))
        }
    }

    /// Scans a single file. Online, the extracted fields come back for review
    /// and an extraction failure is returned to the caller with nothing
    /// stored. Offline, a pending record is stored immediately.
    pub async fn scan_single(
        &self,
        file: &UploadFile,
        currency: Currency,
    ) -> Result<ScanOutcome, IngestError> {
        let image = file.encode()?;
        if self.connectivity.is_online() {
            let data = self.extractor.extract(&image, currency).await?;
            return Ok(ScanOutcome::Extracted(data));
        }

        let id = self.store.allocate_id(0)?;
        let record = ReceiptRecord::pending(
            id,
            SINGLE_PLACEHOLDER.to_string(),
            today_iso(),
            currency,
            image,
        );
        self.store.add(record.clone())?;
        info!(id, file = %file.name, "Receipt saved locally, will sync when back online");
        Ok(ScanOutcome::Queued(record))
    }

    pub fn save_extracted(&self, data: ReceiptData) -> Result<ReceiptRecord, StoreError> {
        let id = self.store.allocate_id(0)?;
        let record = ReceiptRecord::synced(id, data);
        self.store.add(record.clone())?;
        Ok(record)
    }
}

fn bulk_placeholder_name(file_name: &str) -> String {
    let short: String = file_name.chars().take(20).collect();
    format!("Pending: {}...", short)
}
