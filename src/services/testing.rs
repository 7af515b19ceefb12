use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::ExtractionError;
use crate::models::{Currency, EncodedImage, LineItem, ReceiptData};
use crate::services::gemini::ReceiptExtractor;

/// Extractor double keyed on the image body: bodies listed in `failing`
/// error out, everything else yields a receipt named after the body.
#[derive(Default)]
pub struct ScriptedExtractor {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
    count: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(bodies: &[&str]) -> Self {
        ScriptedExtractor {
            failing: bodies.iter().map(|b| b.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Every call waits for a permit on `gate` before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        ScriptedExtractor {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

pub fn receipt_for(body: &str, currency: Currency) -> ReceiptData {
    ReceiptData {
        merchant_name: format!("Merchant {}", body),
        transaction_date: "2024-06-01".to_string(),
        currency,
        total_amount: 20.0,
        tax_amount: 1.5,
        line_items: vec![LineItem {
            description: "Goods".to_string(),
            amount: 20.0,
        }],
    }
}

#[async_trait]
impl ReceiptExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        image: &EncodedImage,
        currency_hint: Currency,
    ) -> Result<ReceiptData, ExtractionError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(image.data.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.contains(&image.data) {
            return Err(ExtractionError::Api {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }
        Ok(receipt_for(&image.data, currency_hint))
    }
}

pub fn image(body: &str) -> EncodedImage {
    EncodedImage {
        data: body.to_string(),
        mime_type: "image/jpeg".to_string(),
    }
}
