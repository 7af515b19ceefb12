use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownCurrency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    USD,
    INR,
    GBP,
    AED,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::USD, Currency::INR, Currency::GBP, Currency::AED];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::INR => "INR",
            Currency::GBP => "GBP",
            Currency::AED => "AED",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Currency::USD => "US Dollar",
            Currency::INR => "Indian Rupee",
            Currency::GBP => "British Pound",
            Currency::AED => "UAE Dirham",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| UnknownCurrency(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount: f64,
}

/// Structured fields of one receipt as returned by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptData {
    pub merchant_name: String,
    /// `YYYY-MM-DD`
    pub transaction_date: String,
    pub currency: Currency,
    pub total_amount: f64,
    pub tax_amount: f64,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    PendingSync,
}

/// Persisted receipt. Uses the field names the browser build kept under
/// `savedReceipts`, so those collections load. Amounts are `f64`: integer
/// amounts read back equal but are rewritten as floats (`12` becomes `12.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub id: i64,
    pub status: SyncStatus,
    #[serde(flatten)]
    pub data: ReceiptData,
    /// Base64 image payload, kept while the record waits for extraction.
    #[serde(rename = "imageData", default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ReceiptRecord {
    pub fn synced(id: i64, data: ReceiptData) -> Self {
        ReceiptRecord {
            id,
            status: SyncStatus::Synced,
            data,
            image_data: None,
            mime_type: None,
        }
    }

    pub fn pending(
        id: i64,
        merchant_name: String,
        transaction_date: String,
        currency: Currency,
        image: EncodedImage,
    ) -> Self {
        ReceiptRecord {
            id,
            status: SyncStatus::PendingSync,
            data: ReceiptData {
                merchant_name,
                transaction_date,
                currency,
                total_amount: 0.0,
                tax_amount: 0.0,
                line_items: Vec::new(),
            },
            image_data: Some(image.data),
            mime_type: Some(image.mime_type),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SyncStatus::PendingSync
    }

    /// Stored image of a pending record, if both halves of the payload are present.
    pub fn pending_image(&self) -> Option<EncodedImage> {
        match (&self.image_data, &self.mime_type) {
            (Some(data), Some(mime_type)) if self.is_pending() => Some(EncodedImage {
                data: data.clone(),
                mime_type: mime_type.clone(),
            }),
            _ => None,
        }
    }
}

/// Image in the encoding the extraction API accepts: base64 body plus mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub default_currency: Currency,
    pub gemini_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_currency: Currency::USD,
            gemini_model: "gemini-2.5-flash".to_string(),
        }
    }
}
