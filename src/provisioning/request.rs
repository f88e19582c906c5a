use std::collections::BTreeSet;

use base64::Engine;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::db::wallet::is_money_amount;
use crate::platform::Gender;

const MIN_AGE: u8 = 13;
const MAX_AGE: u8 = 65;
const MAX_DURATION_DAYS: u32 = 365;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetingOptions {
    pub min_age: Option<u8>,
    pub max_age: Option<u8>,
    #[serde(default)]
    pub genders: BTreeSet<Gender>,
    /// Two-letter country codes and/or free-text region or city names, in order.
    #[serde(default)]
    pub locations: Vec<String>,
}

/// New-creative payload. The image travels base64-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct CreativePayload {
    pub image: String,
    pub primary_text: String,
    pub headline: String,
}

/// Promotion request as submitted by the console. Every field is optional on
/// the wire so missing values surface as validation errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignRequest {
    pub page_id: Option<String>,
    pub post_id: Option<String>,
    pub creative: Option<CreativePayload>,
    pub budget: Option<Decimal>,
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub targeting: TargetingOptions,
}

#[derive(Debug, Clone)]
pub enum AdSource {
    /// Numeric post id, already stripped of any `<pageId>_` prefix.
    Post { post_id: String },
    Creative {
        image: Vec<u8>,
        primary_text: String,
        headline: String,
    },
}

#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub page_id: String,
    pub source: AdSource,
    pub budget: Decimal,
    pub duration_days: u32,
    pub targeting: TargetingOptions,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, String> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(format!("{field} is required")),
    }
}

/// Per-day spend for a total budget, rounded to cents.
pub fn daily_budget(budget: Decimal, duration_days: u32) -> Decimal {
    (budget / Decimal::from(duration_days.max(1)))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Reduces `<pageId>_<postId>` (or a bare id) to the trailing numeric post id.
pub fn normalize_post_id(raw: &str) -> Option<String> {
    let post = raw.trim().rsplit('_').next()?.trim();
    if post.is_empty() || !post.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(post.to_string())
}

impl CampaignRequest {
    pub fn validate(self) -> Result<ValidatedRequest, String> {
        let page_id = required(&self.page_id, "page_id")?.to_string();

        let source = match (&self.post_id, self.creative) {
            (Some(_), Some(_)) => {
                return Err("provide either post_id or creative, not both".to_string())
            }
            (Some(raw), None) => {
                let post_id = normalize_post_id(raw)
                    .ok_or_else(|| format!("post_id '{raw}' is not a valid post reference"))?;
                AdSource::Post { post_id }
            }
            (None, Some(creative)) => {
                let image = base64::engine::general_purpose::STANDARD
                    .decode(creative.image.trim())
                    .map_err(|err| format!("creative image is not valid base64: {err}"))?;
                if image.is_empty() {
                    return Err("creative image is empty".to_string());
                }
                let primary_text = creative.primary_text.trim().to_string();
                let headline = creative.headline.trim().to_string();
                if primary_text.is_empty() || headline.is_empty() {
                    return Err("creative primary_text and headline are required".to_string());
                }
                AdSource::Creative {
                    image,
                    primary_text,
                    headline,
                }
            }
            (None, None) => return Err("post_id or creative is required".to_string()),
        };

        let budget = self.budget.ok_or("budget is required")?;
        if budget <= Decimal::ZERO {
            return Err("budget must be greater than zero".to_string());
        }
        if !is_money_amount(budget) {
            return Err("budget must have at most two decimal places".to_string());
        }

        let duration_days = self.duration_days.ok_or("duration_days is required")?;
        if !(1..=MAX_DURATION_DAYS).contains(&duration_days) {
            return Err(format!(
                "duration_days must be between 1 and {MAX_DURATION_DAYS}"
            ));
        }
        if daily_budget(budget, duration_days) < Decimal::new(1, 2) {
            return Err("budget is too small for the requested duration".to_string());
        }

        let targeting = self.targeting;
        for age in [targeting.min_age, targeting.max_age].into_iter().flatten() {
            if !(MIN_AGE..=MAX_AGE).contains(&age) {
                return Err(format!("ages must be between {MIN_AGE} and {MAX_AGE}"));
            }
        }
        if let (Some(min), Some(max)) = (targeting.min_age, targeting.max_age) {
            if min > max {
                return Err("min_age must not exceed max_age".to_string());
            }
        }

        Ok(ValidatedRequest {
            page_id,
            source,
            budget,
            duration_days,
            targeting,
        })
    }
}
