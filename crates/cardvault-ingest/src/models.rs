//! Data model shared by the split and seed stages
//!
//! Field names on the wire follow the bulk catalog (`set`, `lang`,
//! `collector_number`, ...) for records and camelCase for the files this
//! pipeline produces (index, partition files, checkpoint, error log).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Image sizes tried in order when picking the asset for a record
pub const PREFERRED_IMAGE_SIZES: &[&str] = &["normal", "large", "png", "small"];

/// One catalog entry as emitted by the bulk producer
///
/// Every field the pipeline does not interpret is kept in `attributes`, so a
/// record written back out carries the full original payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "set", default)]
    pub set_code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<String>,

    #[serde(rename = "lang", default)]
    pub language: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub collector_number: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uris: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_faces: Option<Vec<CardFace>>,

    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// One logical face of a multi-faced record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardFace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uris: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl SourceRecord {
    /// Required fields that are empty on this record
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id");
        }
        if self.set_code.trim().is_empty() {
            missing.push("set");
        }
        if self.language.trim().is_empty() {
            missing.push("lang");
        }
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.collector_number.trim().is_empty() {
            missing.push("collector_number");
        }
        missing
    }

    /// Image URL to fetch for this record
    ///
    /// The record's own `image_uris` win; otherwise the first face that has
    /// one is used.
    pub fn preferred_image_url(&self) -> Option<&str> {
        if let Some(url) = self.image_uris.as_ref().and_then(pick_image) {
            return Some(url);
        }

        self.card_faces
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find_map(|face| face.image_uris.as_ref().and_then(pick_image))
    }
}

fn pick_image(uris: &BTreeMap<String, String>) -> Option<&str> {
    PREFERRED_IMAGE_SIZES
        .iter()
        .find_map(|size| uris.get(*size))
        .map(String::as_str)
}

/// `(group, language)` pair identifying one output partition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub group: String,
    pub language: String,
}

impl PartitionKey {
    pub fn new(group: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            language: language.into(),
        }
    }

    /// Derive the key from a record; `None` when either half is blank
    pub fn from_record(record: &SourceRecord) -> Option<Self> {
        let group = record.set_code.trim().to_lowercase();
        let language = record.language.trim().to_lowercase();

        if group.is_empty() || language.is_empty() {
            return None;
        }

        Some(Self { group, language })
    }

    /// Stable identifier used in checkpoints and error records ("lea/en")
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// File-system safe stem ("lea_en"), distinct for distinct keys
    pub fn file_stem(&self) -> String {
        format!("{}_{}", path_component(&self.group), path_component(&self.language))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.language)
    }
}

/// Escape a key component for use in paths and object keys
///
/// `[a-z0-9-]` is kept; every other byte becomes `~xx`. The output never
/// contains `_` or `/`, so joined components stay unambiguous.
pub fn path_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for byte in component.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("~{byte:02x}"));
        }
    }
    out
}

/// Per-group metadata gathered during the scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMetadata {
    pub name: String,
    pub release_date: Option<String>,
    pub set_type: Option<String>,
    pub language_counts: BTreeMap<String, u64>,
    /// Record count of the group's representative language
    pub total_cards: u64,
}

impl PartitionMetadata {
    /// Start metadata for a group from its first accepted record
    pub fn from_record(record: &SourceRecord) -> Self {
        Self {
            name: record
                .set_name
                .clone()
                .unwrap_or_else(|| record.set_code.clone()),
            release_date: record.released_at.clone(),
            set_type: record.set_type.clone(),
            language_counts: BTreeMap::new(),
            total_cards: 0,
        }
    }

    /// Count one record for `language` and return its new per-language count
    pub fn record(&mut self, language: &str) -> u64 {
        let count = self.language_counts.entry(language.to_string()).or_default();
        *count += 1;
        *count
    }

    /// Recompute `total_cards` from the representative language
    ///
    /// The representative is the language with the most records; ties go to
    /// the language listed first in `target_languages` (then alphabetical).
    pub fn refresh_total(&mut self, target_languages: &[String]) {
        let rank = |lang: &str| {
            target_languages
                .iter()
                .position(|t| t == lang)
                .unwrap_or(usize::MAX)
        };

        self.total_cards = self
            .language_counts
            .iter()
            .max_by(|(la, ca), (lb, cb)| {
                ca.cmp(cb)
                    .then_with(|| rank(lb.as_str()).cmp(&rank(la.as_str())))
                    .then_with(|| lb.cmp(la))
            })
            .map(|(_, count)| *count)
            .unwrap_or(0);
    }

    /// Sum across every language seen for the group
    pub fn all_languages_total(&self) -> u64 {
        self.language_counts.values().sum()
    }
}

/// Materialized, self-describing partition written once by the split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionFile {
    pub set_code: String,
    pub set_name: String,
    pub release_date: Option<String>,
    pub set_type: Option<String>,
    pub language: String,
    pub card_count: u64,
    pub cards: Vec<SourceRecord>,
}

/// Catalog of every partition file produced by one split run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub generated_at: DateTime<Utc>,
    pub source_file: String,
    pub target_languages: Vec<String>,
    pub total_sets: u64,
    pub total_files: u64,
    pub total_cards: u64,
    pub sets: BTreeMap<String, IndexSet>,
}

/// One group's entry in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSet {
    pub name: String,
    pub release_date: Option<String>,
    pub set_type: Option<String>,
    pub languages: BTreeMap<String, IndexLanguage>,
    pub total_cards: u64,
}

/// Location and size of one partition file, relative to the index directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexLanguage {
    pub card_count: u64,
    pub file_path: String,
}

/// Downstream row for a group (card set)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    pub code: String,
    pub name: String,
    pub release_date: Option<String>,
    pub set_type: Option<String>,
}

impl GroupRow {
    pub fn from_partition(file: &PartitionFile) -> Self {
        Self {
            code: file.set_code.clone(),
            name: file.set_name.clone(),
            release_date: file.release_date.clone(),
            set_type: file.set_type.clone(),
        }
    }
}

/// Downstream row for one record, upserted on `(set_code, collector_number, language)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRow {
    pub set_code: String,
    pub collector_number: String,
    pub language: String,
    pub external_id: String,
    pub name: String,
    pub rarity: Option<String>,
    pub attributes: serde_json::Value,
    pub image_url: Option<String>,
}

impl SinkRow {
    pub fn from_record(record: &SourceRecord, image_url: Option<String>) -> Self {
        Self {
            set_code: record.set_code.trim().to_lowercase(),
            collector_number: record.collector_number.trim().to_string(),
            language: record.language.trim().to_lowercase(),
            external_id: record.id.clone(),
            name: record.name.clone(),
            rarity: record.rarity.clone(),
            attributes: serde_json::Value::Object(record.attributes.clone()),
            image_url,
        }
    }

    /// Idempotency key
    pub fn key(&self) -> (String, String, String) {
        (
            self.set_code.clone(),
            self.collector_number.clone(),
            self.language.clone(),
        )
    }
}

/// One append-only entry in the seed error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub set_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, key: &PartitionKey, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.into(),
            set_code: key.group.clone(),
            card_number: None,
            language: Some(key.language.clone()),
            message: message.into(),
        }
    }

    pub fn with_card_number(mut self, number: impl Into<String>) -> Self {
        self.card_number = Some(number.into());
        self
    }
}
