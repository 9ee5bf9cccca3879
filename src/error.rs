use thiserror::Error;

/// Whole-document failure. Everything below document level is a [`Diagnostic`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed document {source_id}: {reason}")]
    MalformedDocument { source_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("match_threshold must be within 0..=1, got {0}")]
    Threshold(f64),
    #[error("invalid {name} pattern {pattern:?}: {source}")]
    Pattern {
        name: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("{table} table is missing required column {column}")]
    MissingColumn { table: &'static str, column: String },
    #[error("{table} table columns have unequal lengths")]
    Ragged { table: &'static str },
}

/// Which reference table an unmatched lookup was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Country,
    Hazard,
    Product,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Country => "country",
            TableKind::Hazard => "hazard",
            TableKind::Product => "product",
        }
    }
}

/// Recoverable per-node / per-block issue recorded during a parse.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Node matched both product and date patterns; product won.
    ClassificationAmbiguity { node_index: usize, text: String },
    DateFormatError { node_index: usize, raw: String },
    EmptyBlockDiscarded { node_index: usize },
    UnmatchedReference {
        table: TableKind,
        raw: String,
        confidence: f64,
    },
}
