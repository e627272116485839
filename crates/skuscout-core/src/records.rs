//! Product record types shared between the engine, adapters, and the output
//! sink.
//!
//! Field names follow the dataset contract (`"Name"`, `"Image URLs"`, ...)
//! rather than Rust naming so that adapters, quality profiles in
//! `sites.yaml`, and the serialized output all agree on one spelling.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub const FIELD_SKU: &str = "SKU";
pub const FIELD_NAME: &str = "Name";
pub const FIELD_BRAND: &str = "Brand";
pub const FIELD_WEIGHT: &str = "Weight";
pub const FIELD_IMAGE_URLS: &str = "Image URLs";
pub const FIELD_PRICE: &str = "Price";
pub const FIELD_CATEGORY: &str = "Category";
pub const FIELD_PRODUCT_TYPE: &str = "Product Type";
pub const FIELD_URL: &str = "URL";

/// Keys every output record carries, in this order, even when unknown.
const BASE_OUTPUT_FIELDS: [&str; 4] = [FIELD_NAME, FIELD_BRAND, FIELD_WEIGHT, FIELD_IMAGE_URLS];

/// One unit of work: a product identifier (SKU, ASIN or UPC) looked up on a
/// single target site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupRequest {
    pub identifier: String,
    pub site_id: String,
}

impl LookupRequest {
    #[must_use]
    pub fn new(identifier: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            site_id: site_id.into(),
        }
    }
}

/// A single extracted value: scalar text or an ordered list (image URLs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::List(_) => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items.as_slice()),
            FieldValue::Text(_) => None,
        }
    }

    /// `true` when the value carries no non-whitespace content.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

/// Fields an adapter extracted, keyed by dataset field name. Nothing is
/// required at this stage; the validator decides what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; blank values are skipped.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Inserts `value` unless it is blank. Returns `true` when stored.
    pub fn insert(&mut self, field: &str, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        if value.is_blank() {
            return false;
        }
        self.fields.insert(field.to_string(), value);
        true
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// List value for `field`; a scalar text value is viewed as a one-item list.
    #[must_use]
    pub fn list(&self, field: &str) -> Vec<&str> {
        match self.get(field) {
            Some(FieldValue::List(items)) => items.iter().map(String::as_str).collect(),
            Some(FieldValue::Text(s)) => vec![s.as_str()],
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            let key: String = k.into();
            record.insert(&key, v);
        }
        record
    }
}

/// Why a field lowered a record's quality score.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "problem", content = "field", rename_all = "snake_case")]
pub enum FieldFlag {
    Missing(String),
    Invalid(String),
}

impl FieldFlag {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            FieldFlag::Missing(f) | FieldFlag::Invalid(f) => f,
        }
    }
}

impl std::fmt::Display for FieldFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldFlag::Missing(field) => write!(f, "missing {field}"),
            FieldFlag::Invalid(field) => write!(f, "invalid {field}"),
        }
    }
}

/// A record that passed validation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub sku: String,
    pub site_id: String,
    pub fields: RawRecord,
    /// Weighted fraction of expected fields present and well-formed, in `[0, 1]`.
    pub quality_score: f64,
    pub flags: Vec<FieldFlag>,
    pub scraped_at: DateTime<Utc>,
}

/// Terminal classification written next to every output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Found,
    NotFound,
    Blocked,
    Transient,
    LowQuality,
    Fatal,
    CircuitOpen,
}

impl RecordStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Found => "found",
            RecordStatus::NotFound => "not_found",
            RecordStatus::Blocked => "blocked",
            RecordStatus::Transient => "transient",
            RecordStatus::LowQuality => "low_quality",
            RecordStatus::Fatal => "fatal",
            RecordStatus::CircuitOpen => "circuit_open",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row handed to the dataset sink. Failed lookups are still reported so
/// the sink can tell "not found", "blocked" and "low quality" apart.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub sku: String,
    pub status: RecordStatus,
    pub fields: RawRecord,
    pub quality_score: Option<f64>,
    pub failure_reason: Option<String>,
}

impl OutputRecord {
    #[must_use]
    pub fn found(record: &ValidatedRecord) -> Self {
        Self {
            sku: record.sku.clone(),
            status: RecordStatus::Found,
            fields: record.fields.clone(),
            quality_score: Some(record.quality_score),
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn failed(sku: &str, status: RecordStatus, reason: impl Into<String>) -> Self {
        Self {
            sku: sku.to_string(),
            status,
            fields: RawRecord::new(),
            quality_score: None,
            failure_reason: Some(reason.into()),
        }
    }

    /// Keeps the rejected fields and score so a low-quality row stays inspectable.
    #[must_use]
    pub fn with_partial(mut self, fields: RawRecord, quality_score: f64) -> Self {
        self.fields = fields;
        self.quality_score = Some(quality_score);
        self
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(FIELD_SKU, &self.sku)?;
        for field in BASE_OUTPUT_FIELDS {
            match self.fields.get(field) {
                Some(value) => map.serialize_entry(field, value)?,
                None if field == FIELD_IMAGE_URLS => {
                    map.serialize_entry(field, &Vec::<String>::new())?;
                }
                None => map.serialize_entry(field, &Option::<String>::None)?,
            }
        }
        for (field, value) in self.fields.iter() {
            if field == FIELD_SKU || BASE_OUTPUT_FIELDS.contains(&field) {
                continue;
            }
            map.serialize_entry(field, value)?;
        }
        map.serialize_entry("Status", &self.status)?;
        if let Some(score) = self.quality_score {
            map.serialize_entry("Quality Score", &score)?;
        }
        if let Some(reason) = &self.failure_reason {
            map.serialize_entry("Failure Reason", reason)?;
        }
        map.end()
    }
}
