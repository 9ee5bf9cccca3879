use std::collections::HashSet;

use crate::config::ScorerKind;

use super::{normalize_text, Entity, ReferenceTable};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "in", "is", "of", "on", "or", "the", "to", "with",
];

/// Similarity between a normalized source text and a normalized alias, in `[0, 1]`.
pub trait Similarity: Send + Sync {
    fn score(&self, text: &str, alias: &str) -> f64;
}

fn tokens(s: &str) -> HashSet<&str> {
    s.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .collect()
}

/// Overlap coefficient over content words, tempered by Jaccard so that of two
/// aliases fully contained in the text, the tighter one scores higher.
///
/// An alias found verbatim inside a long sentence still scores near 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlap;

impl Similarity for TokenOverlap {
    fn score(&self, text: &str, alias: &str) -> f64 {
        let a = tokens(text);
        let b = tokens(alias);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(&b).count() as f64;
        let overlap = shared / a.len().min(b.len()) as f64;
        let jaccard = shared / a.union(&b).count() as f64;
        0.9 * overlap + 0.1 * jaccard
    }
}

/// Normalized Levenshtein similarity over the whole strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditDistance;

impl Similarity for EditDistance {
    fn score(&self, text: &str, alias: &str) -> f64 {
        strsim::normalized_levenshtein(text, alias)
    }
}

/// Best of token overlap and edit distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Combined;

impl Similarity for Combined {
    fn score(&self, text: &str, alias: &str) -> f64 {
        TokenOverlap
            .score(text, alias)
            .max(EditDistance.score(text, alias))
    }
}

impl ScorerKind {
    pub fn scorer(self) -> Box<dyn Similarity> {
        match self {
            ScorerKind::Token => Box::new(TokenOverlap),
            ScorerKind::Edit => Box::new(EditDistance),
            ScorerKind::Combined => Box::new(Combined),
        }
    }
}

/// Outcome of one lookup. `confidence` is reported even when nothing matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'t, E> {
    pub entity: Option<&'t E>,
    pub confidence: f64,
}

impl<'t, E> Match<'t, E> {
    fn none(confidence: f64) -> Self {
        Match { entity: None, confidence }
    }
}

pub struct Matcher {
    scorer: Box<dyn Similarity>,
    threshold: f64,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Matcher {
    pub fn new(scorer: Box<dyn Similarity>, threshold: f64) -> Self {
        Matcher { scorer, threshold }
    }

    pub fn from_kind(kind: ScorerKind, threshold: f64) -> Self {
        Matcher::new(kind.scorer(), threshold)
    }

    /// Exact alias hit first; otherwise the best-scoring entity at or above the
    /// threshold. Equal scores resolve to the smallest canonical name.
    pub fn match_text<'t, E: Entity>(&self, text: &str, table: &'t ReferenceTable<E>) -> Match<'t, E> {
        let needle = normalize_text(text);
        if needle.is_empty() || table.is_empty() {
            return Match::none(0.0);
        }
        if let Some(entity) = table.exact(&needle) {
            return Match {
                entity: Some(entity),
                confidence: 1.0,
            };
        }

        let mut best: Option<(&'t E, f64)> = None;
        for (entity, aliases) in table.entries() {
            let score = aliases
                .iter()
                .map(|alias| self.scorer.score(&needle, alias))
                .fold(0.0_f64, f64::max);
            best = match best {
                Some((cur, s))
                    if s > score
                        || (s == score && cur.canonical_name() <= entity.canonical_name()) =>
                {
                    Some((cur, s))
                }
                _ => Some((entity, score)),
            };
        }

        match best {
            Some((entity, score)) if score >= self.threshold => Match {
                entity: Some(entity),
                confidence: score,
            },
            Some((_, score)) => Match::none(score),
            None => Match::none(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::tests::sample_countries;
    use crate::reference::{country_table, Hazard};

    fn hazards() -> ReferenceTable<Hazard> {
        let row = |item: &str, cat: &str, aliases: &[&str]| {
            (
                Hazard {
                    item: item.to_string(),
                    category: Some(cat.to_string()),
                    analyzable: true,
                    interest_item: false,
                },
                aliases.iter().map(|a| a.to_string()).collect(),
            )
        };
        ReferenceTable::new(vec![
            row("Aflatoxin", "Mycotoxin", &["aflatoxin", "aflatoxins"]),
            row("Salmonella", "Pathogen", &["salmonella spp"]),
            row("Listeria monocytogenes", "Pathogen", &["listeria"]),
        ])
    }

    fn matcher() -> Matcher {
        Matcher::from_kind(ScorerKind::Combined, 0.8)
    }

    #[test]
    fn exact_alias_is_full_confidence() {
        let t = country_table(&sample_countries()).unwrap();
        let m = matcher().match_text("  south   KOREA ", &t);
        assert_eq!(m.entity.unwrap().name_eng, "Korea, Republic of");
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn hazard_found_inside_sentence() {
        let t = hazards();
        let m = matcher().match_text("Detected 15ppm of Aflatoxin B1", &t);
        let h = m.entity.unwrap();
        assert_eq!(h.item, "Aflatoxin");
        assert_eq!(h.category.as_deref(), Some("Mycotoxin"));
        assert!(h.analyzable);
        assert!(m.confidence >= 0.8);
    }

    #[test]
    fn unknown_country_is_unmatched() {
        let t = country_table(&sample_countries()).unwrap();
        let m = matcher().match_text("Neverland", &t);
        assert!(m.entity.is_none());
        assert!(m.confidence < 0.8);
    }

    #[test]
    fn tighter_alias_beats_looser_one() {
        let t = country_table(&sample_countries()).unwrap();
        let m = Matcher::from_kind(ScorerKind::Token, 0.8).match_text("Korea", &t);
        assert_eq!(m.entity.unwrap().iso2.as_deref(), Some("KR"));
    }

    #[test]
    fn ties_go_to_smallest_name() {
        let t = hazards();
        let m = matcher().match_text("salmonella and listeria found in sample lot", &t);
        assert_eq!(m.entity.unwrap().item, "Listeria monocytogenes");
    }

    #[test]
    fn edit_distance_catches_typos() {
        let t = country_table(&sample_countries()).unwrap();
        let m = Matcher::from_kind(ScorerKind::Edit, 0.8).match_text("Nehterlands", &t);
        assert_eq!(m.entity.unwrap().name_eng, "Netherlands");
        assert!(m.confidence < 1.0);
    }

    #[test]
    fn threshold_bounds() {
        let t = hazards();
        let strict = Matcher::from_kind(ScorerKind::Combined, 1.0);
        assert!(strict.match_text("traces of aflatoxin", &t).entity.is_none());
        let lax = Matcher::from_kind(ScorerKind::Combined, 0.0);
        assert!(lax.match_text("zzz", &t).entity.is_some());
        assert!(matcher().match_text("", &t).entity.is_none());
    }
}
