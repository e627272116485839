//! Completeness and well-formedness scoring of extracted records.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use skuscout_core::{
    FieldFlag, RawRecord, SiteConfig, ValidatedRecord, FIELD_IMAGE_URLS, FIELD_NAME, FIELD_PRICE,
    FIELD_URL, FIELD_WEIGHT,
};

use crate::outcome::Rejected;

static WEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+(?:[.,]\d+)?\s*(?:kg|kilograms?|g|grams?|mg|lbs?|pounds?|oz|ounces?|fl\.?\s*oz|ml|l|liters?|litres?)\b")
        .expect("valid regex")
});
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d{1,2})?").expect("valid regex"));

/// Which fields a site must deliver and how much each one counts.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityProfile {
    required: Vec<String>,
    weights: BTreeMap<String, f64>,
    threshold: f64,
}

impl QualityProfile {
    /// `Name` is always required, whatever the site lists.
    #[must_use]
    pub fn new(required: Vec<String>, weights: BTreeMap<String, f64>, threshold: f64) -> Self {
        let mut required = required;
        if !required.iter().any(|f| f == FIELD_NAME) {
            required.insert(0, FIELD_NAME.to_string());
        }
        let mut seen = HashSet::new();
        required.retain(|f| seen.insert(f.clone()));
        Self {
            required,
            weights,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Profile from site config; the site threshold wins over `default_threshold`.
    #[must_use]
    pub fn for_site(site: &SiteConfig, default_threshold: f64) -> Self {
        Self::new(
            site.required_fields.clone(),
            site.field_weights.clone(),
            site.quality_threshold.unwrap_or(default_threshold),
        )
    }

    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Required fields plus any field with an explicit weight. Weight
    /// defaults to 1.
    fn expected(&self) -> Vec<(&str, f64)> {
        let mut fields: Vec<(&str, f64)> = self
            .required
            .iter()
            .map(|f| (f.as_str(), self.weights.get(f).copied().unwrap_or(1.0)))
            .collect();
        for (field, weight) in &self.weights {
            if !self.required.contains(field) {
                fields.push((field.as_str(), *weight));
            }
        }
        fields
    }
}

/// Result of validating one extracted record.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(ValidatedRecord),
    Rejected {
        reason: String,
        rejected: Rejected,
    },
}

/// Scores `record` against `profile`. A record is accepted only if every
/// required field is present and well-formed and the score reaches the
/// threshold.
#[must_use]
pub fn validate(profile: &QualityProfile, sku: &str, site_id: &str, record: RawRecord) -> Verdict {
    let expected = profile.expected();
    let mut flags = Vec::new();
    let mut total = 0.0;
    let mut earned = 0.0;

    for (field, weight) in &expected {
        total += weight;
        match field_problem(&record, field) {
            None => earned += weight,
            Some(flag) => flags.push(flag),
        }
    }

    let score = if total > 0.0 { earned / total } else { 1.0 };
    let failed_required: Vec<&FieldFlag> = flags
        .iter()
        .filter(|flag| profile.required.iter().any(|r| r == flag.field()))
        .collect();

    if !failed_required.is_empty() {
        let detail = failed_required
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Verdict::Rejected {
            reason: format!("required field check failed: {detail}"),
            rejected: Rejected {
                fields: record,
                quality_score: score,
            },
        };
    }

    if score < profile.threshold {
        return Verdict::Rejected {
            reason: format!(
                "quality score {score:.2} below threshold {:.2}",
                profile.threshold
            ),
            rejected: Rejected {
                fields: record,
                quality_score: score,
            },
        };
    }

    Verdict::Accepted(ValidatedRecord {
        sku: sku.to_string(),
        site_id: site_id.to_string(),
        fields: record,
        quality_score: score,
        flags,
        scraped_at: Utc::now(),
    })
}

fn field_problem(record: &RawRecord, field: &str) -> Option<FieldFlag> {
    let Some(value) = record.get(field) else {
        return Some(FieldFlag::Missing(field.to_string()));
    };
    if value.is_blank() {
        return Some(FieldFlag::Missing(field.to_string()));
    }

    let well_formed = match field {
        FIELD_IMAGE_URLS => record.list(field).iter().any(|u| is_http_url(u)),
        FIELD_URL => record.text(field).is_some_and(is_http_url),
        FIELD_WEIGHT => record.text(field).is_some_and(|w| WEIGHT_RE.is_match(w)),
        FIELD_PRICE => record.text(field).is_some_and(|p| PRICE_RE.is_match(p)),
        _ => true,
    };

    if well_formed {
        None
    } else {
        Some(FieldFlag::Invalid(field.to_string()))
    }
}

fn is_http_url(candidate: &str) -> bool {
    reqwest::Url::parse(candidate.trim())
        .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}
