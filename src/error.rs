use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Receipt id {0} already exists")]
    DuplicateId(i64),

    #[error("Receipt store lock poisoned")]
    LockPoisoned,
}

/// Failure reported by the extraction client. The caller never gets a
/// partially extracted receipt alongside one of these.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Gemini API key missing (set GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("Failed to process receipt with Gemini API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to process receipt with Gemini API: status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to process receipt with Gemini API: empty response")]
    EmptyResponse,

    #[error("Failed to process receipt with Gemini API: invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Failed to process receipt with Gemini API: response does not match the receipt schema")]
    SchemaMismatch,

    #[error("Invalid extraction schema: {0}")]
    Schema(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported image type for {name}: {mime_type}")]
    UnsupportedImage { name: String, mime_type: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No synced receipts to export")]
    NothingToExport,

    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown currency code: {0} (expected one of USD, INR, GBP, AED)")]
pub struct UnknownCurrency(pub String);
