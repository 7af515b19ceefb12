use std::time::Duration;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::models::{Currency, EncodedImage, LineItem, ReceiptData};
use crate::utils::normalize_date;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Turns a receipt image into structured fields.
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    async fn extract(
        &self,
        image: &EncodedImage,
        currency_hint: Currency,
    ) -> Result<ReceiptData, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        GeminiConfig {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Receipt as the model returned it, before currency validation.
#[derive(Debug, Deserialize)]
struct RawReceipt {
    merchant_name: String,
    transaction_date: String,
    currency: String,
    total_amount: f64,
    #[serde(default)]
    tax_amount: f64,
    #[serde(default)]
    line_items: Vec<LineItem>,
}

pub struct GeminiExtractor {
    config: GeminiConfig,
    client: reqwest::Client,
    schema: JSONSchema,
}

impl GeminiExtractor {
    pub fn new(config: GeminiConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(GeminiExtractor {
            config,
            client,
            schema: validation_schema()?,
        })
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String, ExtractionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ExtractionError::MissingApiKey)?;

        let request = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(),
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api { status, body });
        }

        let body: GenerateResponse = response.json().await?;
        first_text(body).ok_or(ExtractionError::EmptyResponse)
    }
}

#[async_trait]
impl ReceiptExtractor for GeminiExtractor {
    async fn extract(
        &self,
        image: &EncodedImage,
        currency_hint: Currency,
    ) -> Result<ReceiptData, ExtractionError> {
        let parts = vec![
            Part {
                inline_data: Some(InlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                }),
                text: None,
            },
            Part {
                inline_data: None,
                text: Some(extraction_prompt(currency_hint)),
            },
        ];

        let mut raw = self.generate(parts).await?;
        let mut value = parse_json(&raw)?;

        if !self.schema.is_valid(&value) {
            warn!("Extraction response failed schema validation, requesting repair");
            let fix_prompt = format!(
                "Fix this JSON so that it matches the receipt schema exactly. Output JSON only. JSON:\n{}",
                raw
            );
            raw = self
                .generate(vec![Part {
                    inline_data: None,
                    text: Some(fix_prompt),
                }])
                .await?;
            value = parse_json(&raw)?;
            if !self.schema.is_valid(&value) {
                return Err(ExtractionError::SchemaMismatch);
            }
        }

        let receipt: RawReceipt =
            serde_json::from_value(value).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;
        debug!(merchant = %receipt.merchant_name, "Extracted receipt");
        Ok(finalize_receipt(receipt, currency_hint))
    }
}

/// Validates the model's currency against the supported set, substituting
/// the caller's hint for anything else.
fn finalize_receipt(raw: RawReceipt, currency_hint: Currency) -> ReceiptData {
    let currency = raw.currency.parse::<Currency>().unwrap_or_else(|_| {
        warn!(
            returned = %raw.currency,
            hint = %currency_hint,
            "Unsupported currency from model, using hint"
        );
        currency_hint
    });
    ReceiptData {
        merchant_name: raw.merchant_name.trim().to_string(),
        transaction_date: normalize_date(&raw.transaction_date),
        currency,
        total_amount: raw.total_amount,
        tax_amount: raw.tax_amount,
        line_items: raw.line_items,
    }
}

fn first_text(body: GenerateResponse) -> Option<String> {
    body.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.text)
        .map(|text| strip_code_fence(text.trim()).to_string())
        .filter(|text| !text.is_empty())
}

fn strip_code_fence(text: &str) -> &str {
    text.strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text)
}

fn parse_json(raw: &str) -> Result<Value, ExtractionError> {
    serde_json::from_str::<Value>(raw).map_err(|e| ExtractionError::InvalidJson(e.to_string()))
}

fn extraction_prompt(currency_hint: Currency) -> String {
    format!(
        "Analyze this receipt image. The currency is likely {}, but confirm from the receipt and use the correct ISO 4217 code from the allowed list [USD, INR, GBP, AED]. Extract the merchant name, transaction date, currency, total amount, tax amount, and all line items. Ensure the date is in YYYY-MM-DD format. If a value is not found, use a sensible default (e.g., 0 for tax).",
        currency_hint
    )
}

/// Schema sent with the request to constrain the model's output.
fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "merchant_name": {"type": "STRING", "description": "The name of the merchant or store."},
            "transaction_date": {"type": "STRING", "description": "The date of the transaction in YYYY-MM-DD format."},
            "currency": {
                "type": "STRING",
                "description": "The ISO 4217 currency code of the transaction.",
                "enum": ["USD", "INR", "GBP", "AED"]
            },
            "total_amount": {"type": "NUMBER", "description": "The final total amount of the transaction."},
            "tax_amount": {"type": "NUMBER", "description": "The total tax amount. If not present, this should be 0."},
            "line_items": {
                "type": "ARRAY",
                "description": "A list of all items purchased.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "description": {"type": "STRING"},
                        "amount": {"type": "NUMBER"}
                    },
                    "required": ["description", "amount"]
                }
            }
        },
        "required": ["merchant_name", "transaction_date", "currency", "total_amount", "tax_amount", "line_items"]
    })
}

/// Local check of the returned JSON. Currency is left open here so an
/// out-of-list code can fall back to the hint instead of failing.
fn validation_schema() -> Result<JSONSchema, ExtractionError> {
    let schema = json!({
        "type": "object",
        "required": ["merchant_name", "transaction_date", "currency", "total_amount"],
        "properties": {
            "merchant_name": {"type": "string"},
            "transaction_date": {"type": "string"},
            "currency": {"type": "string"},
            "total_amount": {"type": "number"},
            "tax_amount": {"type": "number"},
            "line_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["description", "amount"],
                    "properties": {
                        "description": {"type": "string"},
                        "amount": {"type": "number"}
                    }
                }
            }
        }
    });

    JSONSchema::compile(&schema).map_err(|e| ExtractionError::Schema(e.to_string()))
}
