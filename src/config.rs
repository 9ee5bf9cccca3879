use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schema::DataSource;

pub const ENV_PREFIX: &str = "ALERT_HUB";
pub const DEFAULT_CONFIG_FILE: &str = "alert_hub.toml";
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Which anchor delimits records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Product codes start records; dates attach to the open record.
    #[default]
    Product,
    /// Legacy layout with no product markers; every date starts a record.
    Date,
}

/// The configuration surface seen by the parsing core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    pub mode: ParseMode,
    pub target_date: Option<NaiveDate>,
    pub match_threshold: f64,
    /// `None` picks the per-mode default: on for `Date`, off for `Product`.
    pub skip_first_date: Option<bool>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            mode: ParseMode::Product,
            target_date: None,
            match_threshold: DEFAULT_THRESHOLD,
            skip_first_date: None,
        }
    }
}

impl ParseConfig {
    pub fn skips_first_date(&self) -> bool {
        self.skip_first_date
            .unwrap_or(self.mode == ParseMode::Date)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.match_threshold) || self.match_threshold.is_nan() {
            return Err(ConfigError::Threshold(self.match_threshold));
        }
        Ok(())
    }
}

/// Raw anchor patterns for one source variant. Compiled into `AnchorRules`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub header_tags: Vec<String>,
    pub header_container_class: String,
    pub date_marker: String,
    pub date_pattern: String,
    pub product_pattern: String,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        AnchorConfig {
            header_tags: vec!["h4".to_string()],
            header_container_class: "center".to_string(),
            date_marker: "Date Published:".to_string(),
            date_pattern: r"\b\d{2}/\d{2}/\d{4}\b".to_string(),
            product_pattern: r"^\s*(\d{2}\s?[A-Z](?:\s?-){1,2}\s?\d{2})\b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScorerKind {
    Token,
    Edit,
    #[default]
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub parse: ParseConfig,
    pub anchors: AnchorConfig,
    pub data_source: DataSource,
    pub scorer: ScorerKind,
    pub workers: usize,
    pub fetch_concurrency: usize,
    pub db_path: PathBuf,
    pub reference_dir: PathBuf,
    pub index_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            parse: ParseConfig::default(),
            anchors: AnchorConfig::default(),
            data_source: DataSource::Fda,
            scorer: ScorerKind::Combined,
            workers: 4,
            fetch_concurrency: 10,
            db_path: PathBuf::from("data/alert_hub.sqlite"),
            reference_dir: PathBuf::from("data/reference"),
            index_url: "https://www.accessdata.fda.gov/cms_ia/ialist.html".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the config file (optional unless given explicitly), then
    /// `ALERT_HUB__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        let cfg: AppConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.parse.validate()?;
        Ok(cfg)
    }
}
