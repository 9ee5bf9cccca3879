pub mod matcher;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ReferenceError;

pub use matcher::{Match, Matcher, Similarity};

pub const COUNTRY_FILE: &str = "country_master.json";
pub const HAZARD_FILE: &str = "hazard_code_master.json";
pub const PRODUCT_FILE: &str = "product_code_master.json";

const COUNTRY_ALIAS_COLUMNS: &[&str] = &["country_name_eng", "country_name_kor", "iso_2", "iso_3"];
const HAZARD_ALIAS_COLUMNS: &[&str] = &["KOR_NM", "ENG_NM", "ABRV", "NCKNM", "TESTITM_NM"];
const PRODUCT_ALIAS_COLUMNS: &[&str] = &["KOR_NM", "ENG_NM"];
/// Optional `|`-separated extra aliases, accepted by every table.
const EXTRA_ALIAS_COLUMN: &str = "ALIASES";

/// Lowercase, collapse whitespace, trim surrounding punctuation.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

pub trait Entity {
    fn canonical_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    pub name_eng: String,
    pub iso2: Option<String>,
    pub iso3: Option<String>,
    pub iso_numeric: Option<String>,
}

impl Entity for Country {
    fn canonical_name(&self) -> &str {
        &self.name_eng
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hazard {
    pub item: String,
    pub category: Option<String>,
    pub analyzable: bool,
    pub interest_item: bool,
}

impl Entity for Hazard {
    fn canonical_name(&self) -> &str {
        &self.item
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductType {
    pub name: String,
    pub top_level: Option<String>,
    pub upper: Option<String>,
}

impl Entity for ProductType {
    fn canonical_name(&self) -> &str {
        &self.name
    }
}

/// Read-only alias → entity lookup with a precomputed exact index.
#[derive(Debug, Clone)]
pub struct ReferenceTable<E> {
    entities: Vec<E>,
    aliases: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl<E> Default for ReferenceTable<E> {
    fn default() -> Self {
        ReferenceTable {
            entities: Vec::new(),
            aliases: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<E: Entity> ReferenceTable<E> {
    /// Build from `(entity, aliases)` rows. The canonical name is always an
    /// alias; when two entities share an alias the smaller canonical name owns it.
    pub fn new(rows: Vec<(E, Vec<String>)>) -> Self {
        let mut table: ReferenceTable<E> = ReferenceTable::default();
        for (entity, raw_aliases) in rows {
            let id = table.entities.len();
            let mut aliases: Vec<String> = std::iter::once(entity.canonical_name().to_string())
                .chain(raw_aliases)
                .map(|a| normalize_text(&a))
                .filter(|a| !a.is_empty())
                .collect();
            aliases.sort();
            aliases.dedup();

            for alias in &aliases {
                let taken = table.index.get(alias).is_some_and(|&owner| {
                    table.entities[owner].canonical_name() <= entity.canonical_name()
                });
                if !taken {
                    table.index.insert(alias.clone(), id);
                }
            }
            table.entities.push(entity);
            table.aliases.push(aliases);
        }
        table
    }

    pub fn exact(&self, normalized: &str) -> Option<&E> {
        self.index.get(normalized).map(|&i| &self.entities[i])
    }

    pub fn entries(&self) -> impl Iterator<Item = (&E, &[String])> {
        self.entities
            .iter()
            .zip(self.aliases.iter().map(|a| a.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ── Column-oriented loading ──

/// Column name → cell values, as exported from the reference spreadsheets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ColumnTable(BTreeMap<String, Vec<Value>>);

impl ColumnTable {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("reference table is not a column map")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {:?}", path))
    }

    fn row_count(&self, table: &'static str) -> Result<usize, ReferenceError> {
        let mut lens = self.0.values().map(Vec::len);
        let first = lens.next().unwrap_or(0);
        if lens.any(|l| l != first) {
            return Err(ReferenceError::Ragged { table });
        }
        Ok(first)
    }

    fn has(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    fn text(&self, column: &str, row: usize) -> Option<String> {
        match self.0.get(column)?.get(row)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn flag(&self, column: &str, row: usize) -> bool {
        match self.0.get(column).and_then(|c| c.get(row)) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_uppercase().as_str(), "Y" | "TRUE" | "1")
            }
            _ => false,
        }
    }

    fn aliases(&self, columns: &[&str], row: usize) -> Vec<String> {
        let mut out: Vec<String> = columns.iter().filter_map(|c| self.text(c, row)).collect();
        if let Some(extra) = self.text(EXTRA_ALIAS_COLUMN, row) {
            out.extend(extra.split('|').map(|a| a.trim().to_string()));
        }
        out
    }

    fn first_text(&self, columns: &[&str], row: usize) -> Option<String> {
        columns.iter().find_map(|c| self.text(c, row))
    }

    fn require_any(&self, table: &'static str, columns: &[&str]) -> Result<(), ReferenceError> {
        if columns.iter().any(|c| self.has(c)) {
            Ok(())
        } else {
            Err(ReferenceError::MissingColumn {
                table,
                column: columns.join("|"),
            })
        }
    }
}

pub fn country_table(cols: &ColumnTable) -> Result<ReferenceTable<Country>, ReferenceError> {
    cols.require_any("country", &["country_name_eng"])?;
    let rows = (0..cols.row_count("country")?)
        .filter_map(|r| {
            let country = Country {
                name_eng: cols.text("country_name_eng", r)?,
                iso2: cols.text("iso_2", r),
                iso3: cols.text("iso_3", r),
                iso_numeric: cols.text("iso_numeric", r),
            };
            Some((country, cols.aliases(COUNTRY_ALIAS_COLUMNS, r)))
        })
        .collect();
    Ok(ReferenceTable::new(rows))
}

pub fn hazard_table(cols: &ColumnTable) -> Result<ReferenceTable<Hazard>, ReferenceError> {
    cols.require_any("hazard", HAZARD_ALIAS_COLUMNS)?;
    let rows = (0..cols.row_count("hazard")?)
        .filter_map(|r| {
            let hazard = Hazard {
                item: cols.first_text(&["ENG_NM", "KOR_NM", "TESTITM_NM"], r)?,
                category: cols.text("M_KOR_NM", r),
                analyzable: cols.flag("ANALYZABLE", r),
                interest_item: cols.flag("INTEREST_ITEM", r),
            };
            Some((hazard, cols.aliases(HAZARD_ALIAS_COLUMNS, r)))
        })
        .collect();
    Ok(ReferenceTable::new(rows))
}

pub fn product_table(cols: &ColumnTable) -> Result<ReferenceTable<ProductType>, ReferenceError> {
    cols.require_any("product", PRODUCT_ALIAS_COLUMNS)?;
    let rows = (0..cols.row_count("product")?)
        .filter_map(|r| {
            let product = ProductType {
                name: cols.first_text(&["KOR_NM", "ENG_NM"], r)?,
                top_level: cols.first_text(&["HTRK_PRDLST_NM", "GR_NM"], r),
                upper: cols.first_text(&["HRRK_PRDLST_NM", "PRDLST_CL_NM"], r),
            };
            Some((product, cols.aliases(PRODUCT_ALIAS_COLUMNS, r)))
        })
        .collect();
    Ok(ReferenceTable::new(rows))
}

/// All lookup tables for one run. Shared read-only across parses.
#[derive(Debug, Clone, Default)]
pub struct References {
    pub countries: ReferenceTable<Country>,
    pub hazards: ReferenceTable<Hazard>,
    pub products: ReferenceTable<ProductType>,
}

impl References {
    /// Load whichever master files exist in `dir`; a missing file leaves that
    /// table empty so every lookup against it is unmatched.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut refs = References::default();

        if let Some(cols) = read_optional(&dir.join(COUNTRY_FILE))? {
            refs.countries = country_table(&cols)?;
        }
        if let Some(cols) = read_optional(&dir.join(HAZARD_FILE))? {
            refs.hazards = hazard_table(&cols)?;
        }
        if let Some(cols) = read_optional(&dir.join(PRODUCT_FILE))? {
            refs.products = product_table(&cols)?;
        }

        info!(
            countries = refs.countries.len(),
            hazards = refs.hazards.len(),
            products = refs.products.len(),
            "Loaded reference tables from {:?}",
            dir
        );
        Ok(refs)
    }
}

fn read_optional(path: &Path) -> Result<Option<ColumnTable>> {
    if !path.exists() {
        warn!("Reference table {:?} not found, lookups will be unmatched", path);
        return Ok(None);
    }
    ColumnTable::from_path(path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_countries() -> ColumnTable {
        ColumnTable::from_json(
            r#"{
                "country_name_eng": ["Korea, Republic of", "China", "United States", "Netherlands", "Korea, Democratic People's Republic of"],
                "country_name_kor": ["대한민국", "중국", "미국", "네덜란드", "북한"],
                "iso_2": ["KR", "CN", "US", "NL", "KP"],
                "iso_3": ["KOR", "CHN", "USA", "NLD", "PRK"],
                "iso_numeric": [410, 156, 840, 528, 408],
                "ALIASES": ["South Korea", null, "USA|U.S.A.", "Holland", "DPRK"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn normalizes_alias_text() {
        assert_eq!(normalize_text("  Aflatoxin   B1. "), "aflatoxin b1");
        assert_eq!(normalize_text("U.S.A."), "u.s.a");
    }

    #[test]
    fn country_columns() {
        let t = country_table(&sample_countries()).unwrap();
        assert_eq!(t.len(), 5);
        let kr = t.exact("kr").unwrap();
        assert_eq!(kr.name_eng, "Korea, Republic of");
        assert_eq!(kr.iso_numeric.as_deref(), Some("410"));
        assert_eq!(t.exact("중국").unwrap().name_eng, "China");
        assert_eq!(t.exact("holland").unwrap().iso3.as_deref(), Some("NLD"));
    }

    #[test]
    fn hazard_flags_and_category() {
        let cols = ColumnTable::from_json(
            r#"{
                "ENG_NM": ["Aflatoxin", "Salmonella"],
                "KOR_NM": ["아플라톡신", "살모넬라"],
                "M_KOR_NM": ["Mycotoxin", "Pathogen"],
                "ANALYZABLE": [true, "N"],
                "INTEREST_ITEM": ["Y", 0]
            }"#,
        )
        .unwrap();
        let t = hazard_table(&cols).unwrap();
        let a = t.exact("aflatoxin").unwrap();
        assert_eq!(a.category.as_deref(), Some("Mycotoxin"));
        assert!(a.analyzable && a.interest_item);
        let s = t.exact("살모넬라").unwrap();
        assert!(!s.analyzable && !s.interest_item);
    }

    #[test]
    fn product_hierarchy_fallbacks() {
        let cols = ColumnTable::from_json(
            r#"{
                "KOR_NM": ["새우", "쌀"],
                "ENG_NM": ["Shrimp", "Rice"],
                "HTRK_PRDLST_NM": ["수산물", null],
                "GR_NM": [null, "농산물"],
                "PRDLST_CL_NM": ["갑각류", "곡류"]
            }"#,
        )
        .unwrap();
        let t = product_table(&cols).unwrap();
        let shrimp = t.exact("shrimp").unwrap();
        assert_eq!(shrimp.top_level.as_deref(), Some("수산물"));
        assert_eq!(shrimp.upper.as_deref(), Some("갑각류"));
        assert_eq!(t.exact("rice").unwrap().top_level.as_deref(), Some("농산물"));
    }

    #[test]
    fn missing_and_ragged_columns() {
        let cols = ColumnTable::from_json(r#"{"iso_2": ["KR"]}"#).unwrap();
        assert!(matches!(
            country_table(&cols),
            Err(ReferenceError::MissingColumn { table: "country", .. })
        ));
        let cols = ColumnTable::from_json(r#"{"ENG_NM": ["A", "B"], "M_KOR_NM": ["x"]}"#).unwrap();
        assert!(matches!(hazard_table(&cols), Err(ReferenceError::Ragged { .. })));
    }

    #[test]
    fn shared_alias_goes_to_smaller_name() {
        let t = ReferenceTable::new(vec![
            (
                ProductType { name: "Zucchini".into(), top_level: None, upper: None },
                vec!["squash".into()],
            ),
            (
                ProductType { name: "Butternut".into(), top_level: None, upper: None },
                vec!["Squash".into()],
            ),
        ]);
        assert_eq!(t.exact("squash").unwrap().name, "Butternut");
    }

    #[test]
    fn missing_dir_gives_empty_tables() {
        let refs = References::load_dir(Path::new("/nonexistent/alert_hub")).unwrap();
        assert!(refs.countries.is_empty() && refs.hazards.is_empty() && refs.products.is_empty());
    }
}
