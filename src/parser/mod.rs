pub mod blocks;
pub mod classify;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ParseConfig, ParseMode};
use crate::document::Document;
use crate::error::{ConfigError, Diagnostic, ParseError, TableKind};
use crate::normalize::{normalize_date, resolve_country, split_product_fields};
use crate::reference::{Entity, Matcher, ReferenceTable, References};
use crate::schema::{project, CanonicalRecord, DataSource, PartialRecord};

use blocks::{accumulate, Policy, RawBlock};
use classify::{AnchorRules, ClassifiedNode};

/// Per-record quality flags. Reported alongside the row, never stored in it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordDiagnostics {
    pub date_parse_failed: bool,
    pub country_unmatched: bool,
    pub hazard_unmatched: bool,
    pub product_unmatched: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub record: CanonicalRecord,
    pub diagnostics: RecordDiagnostics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutput {
    pub source_id: String,
    pub records: Vec<ParsedRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    pub fn canonical(&self) -> Vec<CanonicalRecord> {
        self.records.iter().map(|r| r.record.clone()).collect()
    }
}

/// Everything needed to parse documents of one source. Immutable and shared
/// across worker threads.
#[derive(Debug)]
pub struct Parser {
    config: ParseConfig,
    policy: Policy,
    rules: AnchorRules,
    matcher: Matcher,
    references: Arc<References>,
    data_source: DataSource,
}

impl Parser {
    pub fn new(cfg: &AppConfig, references: Arc<References>) -> Result<Self, ConfigError> {
        cfg.parse.validate()?;
        Ok(Parser {
            config: cfg.parse.clone(),
            policy: Policy::from_config(&cfg.parse),
            rules: AnchorRules::compile(&cfg.anchors)?,
            matcher: Matcher::from_kind(cfg.scorer, cfg.parse.match_threshold),
            references,
            data_source: cfg.data_source.clone(),
        })
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    /// Parse one document into canonical records.
    ///
    /// Only a structurally unusable document is an `Err`; everything else is
    /// recovered and reported through the diagnostics.
    pub fn parse_document(&self, doc: &Document) -> Result<ParseOutput, ParseError> {
        if doc.is_empty() {
            return Err(ParseError::MalformedDocument {
                source_id: doc.source_id.clone(),
                reason: "document has no nodes".to_string(),
            });
        }

        let classified = self.rules.classify_all(&doc.nodes);
        let mut diagnostics = Vec::new();
        for node in classified.iter().filter(|n| n.ambiguous) {
            warn!(
                source = %doc.source_id,
                node = node.index,
                "node matches both product and date anchors, treating as product"
            );
            diagnostics.push(Diagnostic::ClassificationAmbiguity {
                node_index: node.index,
                text: doc.nodes[node.index].text.clone(),
            });
        }

        let accumulated = accumulate(self.policy, &classified);
        diagnostics.extend(accumulated.diagnostics);

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut records = Vec::with_capacity(accumulated.blocks.len());
        for block in &accumulated.blocks {
            let detail = self.source_detail(&doc.source_id, block, &classified);
            let n = seen.entry(detail.clone()).or_insert(0);
            *n += 1;
            let detail = if *n > 1 {
                format!("{}#{}", detail, n)
            } else {
                detail
            };

            let parsed = self.build_record(block, &classified, detail, &mut diagnostics);
            if let Some(target) = self.config.target_date {
                if parsed.record.registration_date != Some(target) {
                    continue;
                }
            }
            records.push(parsed);
        }

        debug!(
            source = %doc.source_id,
            nodes = doc.len(),
            blocks = accumulated.blocks.len(),
            records = records.len(),
            "Parsed document"
        );

        Ok(ParseOutput {
            source_id: doc.source_id.clone(),
            records,
            diagnostics,
        })
    }

    /// `{doc}/{country}/{product code}` or `{doc}/{country}/{raw date}`.
    fn source_detail(&self, source_id: &str, block: &RawBlock, classified: &[ClassifiedNode]) -> String {
        let country = resolve_country(block, classified).unwrap_or_else(|| "-".to_string());
        let anchor = match self.config.mode {
            ParseMode::Product => block.product_code.as_deref(),
            ParseMode::Date => block.raw_date_text.as_deref(),
        };
        format!("{}/{}/{}", source_id, country, anchor.unwrap_or("-"))
    }

    fn build_record(
        &self,
        block: &RawBlock,
        classified: &[ClassifiedNode],
        source_detail: String,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ParsedRecord {
        let mut flags = RecordDiagnostics::default();
        let refs = &*self.references;

        let registration_date: Option<NaiveDate> =
            block.raw_date_text.as_deref().and_then(|raw| match normalize_date(raw) {
                Ok(d) => Some(d),
                Err(e) => {
                    flags.date_parse_failed = true;
                    debug!(node = block.start_index, "{}", e);
                    diagnostics.push(Diagnostic::DateFormatError {
                        node_index: block.date_index.unwrap_or(block.start_index),
                        raw: raw.to_string(),
                    });
                    None
                }
            });

        let raw_country = resolve_country(block, classified);
        let country = self.lookup(raw_country.as_deref(), &refs.countries, TableKind::Country, diagnostics);
        flags.country_unmatched =
            raw_country.is_some() && country.is_none() && !refs.countries.is_empty();
        // Unmatched country text is kept as-is.
        let origin_country = country.map(|c| c.name_eng.clone()).or(raw_country);

        let (product_name, full_text) = split_product_fields(block);

        let hazard = self.lookup(full_text.as_deref(), &refs.hazards, TableKind::Hazard, diagnostics);
        flags.hazard_unmatched = full_text.is_some() && hazard.is_none() && !refs.hazards.is_empty();

        let product = self.lookup(product_name.as_deref(), &refs.products, TableKind::Product, diagnostics);
        flags.product_unmatched =
            product_name.is_some() && product.is_none() && !refs.products.is_empty();

        let mut partial = PartialRecord::new();
        partial
            .set_opt(
                "registration_date",
                registration_date.map(|d| d.format("%Y-%m-%d").to_string()),
            )
            .set("data_source", self.data_source.as_str())
            .set("source_detail", source_detail)
            .set_opt("product_type", block.product_code.clone())
            .set_opt("top_level_product_type", product.and_then(|p| p.top_level.clone()))
            .set_opt("upper_product_type", product.and_then(|p| p.upper.clone()))
            .set_opt("product_name", product_name)
            .set_opt("origin_country", origin_country)
            .set_opt("notifying_country", self.data_source.notifying_country())
            .set_opt("hazard_category", hazard.and_then(|h| h.category.clone()))
            .set_opt("hazard_item", hazard.map(|h| h.item.clone()))
            .set_opt("full_text", full_text)
            .set("analyzable", hazard.is_some_and(|h| h.analyzable))
            .set("interest_item", hazard.is_some_and(|h| h.interest_item));

        ParsedRecord {
            record: project(&partial),
            diagnostics: flags,
        }
    }

    /// Matched entity, or `None` with an `UnmatchedReference` diagnostic.
    /// Lookups against a table that was never loaded are silent.
    fn lookup<'t, E: Entity>(
        &self,
        raw: Option<&str>,
        table: &'t ReferenceTable<E>,
        kind: TableKind,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<&'t E> {
        let raw = raw?;
        let m = self.matcher.match_text(raw, table);
        if m.entity.is_none() && !table.is_empty() {
            info!(
                table = kind.as_str(),
                confidence = m.confidence,
                "no reference match for {:?}",
                raw
            );
            diagnostics.push(Diagnostic::UnmatchedReference {
                table: kind,
                raw: raw.to_string(),
                confidence: m.confidence,
            });
        }
        m.entity
    }
}
