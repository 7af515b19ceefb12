use anyhow::{anyhow, Result};

use crate::db::Database;
use crate::models::Currency;

pub fn show(db: &Database) -> Result<()> {
    let settings = db.load_settings();
    println!(
        "default_currency = {} ({})",
        settings.default_currency,
        settings.default_currency.name()
    );
    println!("gemini_model = {}", settings.gemini_model);
    Ok(())
}

pub fn set(db: &Database, key: &str, value: &str) -> Result<()> {
    let value = value.trim();
    match key {
        "default_currency" => {
            let currency: Currency = value.parse()?;
            db.set_setting(key, currency.code())?;
        }
        "gemini_model" => {
            if value.is_empty() {
                return Err(anyhow!("gemini_model cannot be empty"));
            }
            db.set_setting(key, value)?;
        }
        _ => {
            return Err(anyhow!(
                "Unknown setting {} (expected default_currency or gemini_model)",
                key
            ))
        }
    }
    println!("{} = {}", key, value);
    Ok(())
}
