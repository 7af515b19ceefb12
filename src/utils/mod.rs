use chrono::{Local, NaiveDate, Utc};
use num_format::{Locale, ToFormattedString};
use std::path::Path;

use crate::models::Currency;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn today_iso() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Formats an amount the way an en-US locale renders the currency.
pub fn format_money(amount: f64, currency: Currency) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let body = format!("{}.{:02}", (cents / 100).to_formatted_string(&Locale::en), cents % 100);
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    match currency {
        Currency::USD => format!("{}${}", sign, body),
        Currency::INR => format!("{}₹{}", sign, body),
        Currency::GBP => format!("{}£{}", sign, body),
        Currency::AED => format!("{}AED {}", sign, body),
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Coerces common receipt date layouts to `YYYY-MM-DD`; anything else is
/// returned trimmed but otherwise untouched.
pub fn normalize_date(value: &str) -> String {
    let raw = value.trim();
    let formats = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d"];
    for fmt in formats.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw.to_string()
}

/// Mime type for the image formats the scanner accepts.
pub fn image_mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|ext| ext.to_str())?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn is_supported_image_mime(mime_type: &str) -> bool {
    matches!(mime_type, "image/png" | "image/jpeg" | "image/webp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_uses_en_us_grouping() {
        assert_eq!(format_money(1234.5, Currency::USD), "$1,234.50");
        assert_eq!(format_money(99.999, Currency::GBP), "£100.00");
        assert_eq!(format_money(1500000.0, Currency::INR), "₹1,500,000.00");
        assert_eq!(format_money(-3.2, Currency::AED), "-AED 3.20");
    }

    #[test]
    fn normalizes_alternative_date_layouts() {
        assert_eq!(normalize_date("02.03.2024"), "2024-03-02");
        assert_eq!(normalize_date("2024/03/02"), "2024-03-02");
        assert_eq!(normalize_date(" 2024-03-02 "), "2024-03-02");
        assert_eq!(normalize_date("last tuesday"), "last tuesday");
    }

    #[test]
    fn detects_image_mime_by_extension() {
        assert_eq!(image_mime_for_path(Path::new("a/b.JPG")), Some("image/jpeg"));
        assert_eq!(image_mime_for_path(Path::new("scan.webp")), Some("image/webp"));
        assert_eq!(image_mime_for_path(Path::new("invoice.pdf")), None);
        assert_eq!(image_mime_for_path(Path::new("noext")), None);
    }
}
