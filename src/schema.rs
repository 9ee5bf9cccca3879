use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::normalize::normalize_date;

/// Canonical column order. `CanonicalRecord` fields follow it exactly.
pub const COLUMNS: [&str; 14] = [
    "registration_date",
    "data_source",
    "source_detail",
    "product_type",
    "top_level_product_type",
    "upper_product_type",
    "product_name",
    "origin_country",
    "notifying_country",
    "hazard_category",
    "hazard_item",
    "full_text",
    "analyzable",
    "interest_item",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataSource {
    Fda,
    Rasff,
    Mfds,
    ImpFood,
    Unknown,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Fda => "FDA",
            DataSource::Rasff => "RASFF",
            DataSource::Mfds => "MFDS",
            DataSource::ImpFood => "IMPFOOD",
            DataSource::Unknown => "UNKNOWN",
        }
    }

    /// Country that issues notices for this source, when fixed.
    pub fn notifying_country(&self) -> Option<&'static str> {
        match self {
            DataSource::Fda => Some("United States"),
            DataSource::Mfds | DataSource::ImpFood => Some("Korea, Republic of"),
            DataSource::Rasff | DataSource::Unknown => None,
        }
    }
}

impl FromStr for DataSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "FDA" | "FDA_IMPORT_ALERTS" => DataSource::Fda,
            "RASFF" | "EU_RASFF" => DataSource::Rasff,
            "MFDS" | "KR_MFDS" => DataSource::Mfds,
            "IMPFOOD" => DataSource::ImpFood,
            _ => DataSource::Unknown,
        })
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DataSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(DataSource::Unknown))
    }
}

/// The 14-column unified output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub registration_date: Option<NaiveDate>,
    pub data_source: DataSource,
    pub source_detail: String,
    pub product_type: Option<String>,
    pub top_level_product_type: Option<String>,
    pub upper_product_type: Option<String>,
    pub product_name: Option<String>,
    pub origin_country: Option<String>,
    pub notifying_country: Option<String>,
    pub hazard_category: Option<String>,
    pub hazard_item: Option<String>,
    pub full_text: Option<String>,
    pub analyzable: bool,
    pub interest_item: bool,
}

impl CanonicalRecord {
    pub fn key(&self) -> (DataSource, String) {
        (self.data_source.clone(), self.source_detail.clone())
    }
}

/// A loosely typed row as produced by any source adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord(pub BTreeMap<String, Value>);

impl PartialRecord {
    pub fn new() -> Self {
        PartialRecord::default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn set_opt(&mut self, column: &str, value: Option<impl Into<Value>>) -> &mut Self {
        let v = value.map(Into::into).unwrap_or(Value::Null);
        self.0.insert(column.to_string(), v);
        self
    }

    fn text(&self, column: &str) -> Option<String> {
        match self.0.get(column)? {
            Value::String(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn flag(&self, column: &str) -> bool {
        match self.0.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "y" | "yes" | "1")
            }
            _ => false,
        }
    }
}

impl From<&CanonicalRecord> for PartialRecord {
    fn from(r: &CanonicalRecord) -> Self {
        let mut p = PartialRecord::new();
        p.set_opt(
            "registration_date",
            r.registration_date.map(|d| d.format("%Y-%m-%d").to_string()),
        )
        .set("data_source", r.data_source.as_str())
        .set("source_detail", r.source_detail.as_str())
        .set_opt("product_type", r.product_type.clone())
        .set_opt("top_level_product_type", r.top_level_product_type.clone())
        .set_opt("upper_product_type", r.upper_product_type.clone())
        .set_opt("product_name", r.product_name.clone())
        .set_opt("origin_country", r.origin_country.clone())
        .set_opt("notifying_country", r.notifying_country.clone())
        .set_opt("hazard_category", r.hazard_category.clone())
        .set_opt("hazard_item", r.hazard_item.clone())
        .set_opt("full_text", r.full_text.clone())
        .set("analyzable", r.analyzable)
        .set("interest_item", r.interest_item);
        p
    }
}

/// Force a partial row onto the canonical columns.
///
/// Missing or blank strings become `None`, missing flags become `false`,
/// dates are re-normalized to ISO and unknown columns are dropped.
pub fn project(partial: &PartialRecord) -> CanonicalRecord {
    let registration_date = partial
        .text("registration_date")
        .and_then(|raw| normalize_date(&raw).ok());
    let data_source = partial
        .text("data_source")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DataSource::Unknown);

    CanonicalRecord {
        registration_date,
        data_source,
        source_detail: partial.text("source_detail").unwrap_or_default(),
        product_type: partial.text("product_type"),
        top_level_product_type: partial.text("top_level_product_type"),
        upper_product_type: partial.text("upper_product_type"),
        product_name: partial.text("product_name"),
        origin_country: partial.text("origin_country"),
        notifying_country: partial.text("notifying_country"),
        hazard_category: partial.text("hazard_category"),
        hazard_item: partial.text("hazard_item"),
        full_text: partial.text("full_text"),
        analyzable: partial.flag("analyzable"),
        interest_item: partial.flag("interest_item"),
    }
}
