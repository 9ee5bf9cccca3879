use regex::Regex;

use crate::config::AnchorConfig;
use crate::document::{collapse_whitespace, Node};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    CountryHeader,
    DateAnchor,
    ProductAnchor,
    ContentNode,
}

/// A node plus what the classifier pulled out of it.
///
/// `rest` is the node text with the anchor tokens (code, date, marker) removed;
/// for headers and plain content it is the whole text.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedNode {
    pub index: usize,
    pub kind: NodeKind,
    pub code: Option<String>,
    pub date_text: Option<String>,
    pub rest: String,
    /// Set when both product and date patterns matched.
    pub ambiguous: bool,
}

/// Compiled anchor patterns for one source variant.
#[derive(Debug, Clone)]
pub struct AnchorRules {
    header_tags: Vec<String>,
    header_container_class: String,
    date_marker: String,
    date_re: Regex,
    product_re: Regex,
}

impl AnchorRules {
    pub fn compile(cfg: &AnchorConfig) -> Result<Self, ConfigError> {
        let date_re = Regex::new(&cfg.date_pattern).map_err(|source| ConfigError::Pattern {
            name: "date",
            pattern: cfg.date_pattern.clone(),
            source,
        })?;
        let product_re =
            Regex::new(&cfg.product_pattern).map_err(|source| ConfigError::Pattern {
                name: "product",
                pattern: cfg.product_pattern.clone(),
                source,
            })?;
        Ok(AnchorRules {
            header_tags: cfg
                .header_tags
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            header_container_class: cfg.header_container_class.clone(),
            date_marker: cfg.date_marker.clone(),
            date_re,
            product_re,
        })
    }

    fn is_country_header(&self, node: &Node) -> bool {
        self.header_tags.iter().any(|t| *t == node.element.tag)
            && node
                .parent
                .as_ref()
                .is_some_and(|p| p.has_class(&self.header_container_class))
    }

    /// Matched product code, preferring capture group 1 when the pattern has one.
    fn product_code(&self, text: &str) -> Option<(String, std::ops::Range<usize>)> {
        let caps = self.product_re.captures(text)?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        Some((collapse_whitespace(m.as_str()), m.range()))
    }

    /// Date text plus the byte ranges to strip from the node text.
    fn date(&self, text: &str) -> Option<(String, Vec<std::ops::Range<usize>>)> {
        let marker = (!self.date_marker.is_empty())
            .then(|| text.find(&self.date_marker))
            .flatten()
            .map(|at| at..at + self.date_marker.len());

        if let Some(m) = self.date_re.find(text) {
            let mut spans: Vec<_> = marker.into_iter().collect();
            spans.push(m.range());
            return Some((m.as_str().to_string(), spans));
        }

        // Marker without a recognisable date: everything after the marker is the date.
        let marker = marker?;
        let raw = text[marker.end..].trim().to_string();
        Some((raw, vec![marker.start..text.len()]))
    }

    pub fn classify(&self, index: usize, node: &Node) -> ClassifiedNode {
        let text = node.text.as_str();

        if self.is_country_header(node) {
            return ClassifiedNode {
                index,
                kind: NodeKind::CountryHeader,
                code: None,
                date_text: None,
                rest: collapse_whitespace(text),
                ambiguous: false,
            };
        }

        let product = self.product_code(text);
        let date = self.date(text);

        match (product, date) {
            (Some((code, span)), date) => {
                let ambiguous = date.is_some();
                let mut spans = vec![span];
                let date_text = date.map(|(d, s)| {
                    spans.extend(s);
                    d
                });
                ClassifiedNode {
                    index,
                    kind: NodeKind::ProductAnchor,
                    code: Some(code),
                    date_text,
                    rest: strip_spans(text, spans),
                    ambiguous,
                    }
            }
            (None, Some((date_text, spans))) => ClassifiedNode {
                index,
                kind: NodeKind::DateAnchor,
                code: None,
                date_text: Some(date_text),
                rest: strip_spans(text, spans),
                ambiguous: false,
            },
            (None, None) => ClassifiedNode {
                index,
                kind: NodeKind::ContentNode,
                code: None,
                date_text: None,
                rest: collapse_whitespace(text),
                ambiguous: false,
            },
        }
    }

    pub fn classify_all(&self, nodes: &[Node]) -> Vec<ClassifiedNode> {
        nodes
            .iter()
            .enumerate()
            .map(|(i, n)| self.classify(i, n))
            .collect()
    }
}

/// Remove the given byte ranges and the punctuation left dangling around them.
fn strip_spans(text: &str, mut spans: Vec<std::ops::Range<usize>>) -> String {
    spans.sort_by_key(|r| r.start);
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for span in spans {
        if span.start > pos {
            out.push_str(&text[pos..span.start]);
            out.push(' ');
        }
        pos = pos.max(span.end);
    }
    if pos < text.len() {
        out.push_str(&text[pos..]);
    }
    collapse_whitespace(&out)
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | ',' | ';' | '.' | '|'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Element;

    fn rules() -> AnchorRules {
        AnchorRules::compile(&AnchorConfig::default()).unwrap()
    }

    fn header(text: &str) -> Node {
        Node::new(
            Element::new("h4", &[]),
            Some(Element::new("div", &["center"])),
            text,
        )
    }

    #[test]
    fn country_header_needs_center_container() {
        let r = rules();
        assert_eq!(r.classify(0, &header("Korea")).kind, NodeKind::CountryHeader);

        let bare = Node::new(Element::new("h4", &[]), None, "Korea");
        assert_eq!(r.classify(0, &bare).kind, NodeKind::ContentNode);
    }

    #[test]
    fn product_anchor_extracts_code() {
        let c = rules().classify(3, &Node::text("12A--34"));
        assert_eq!(c.kind, NodeKind::ProductAnchor);
        assert_eq!(c.code.as_deref(), Some("12A--34"));
        assert_eq!(c.rest, "");
        assert_eq!(c.index, 3);
    }

    #[test]
    fn spaced_product_code_keeps_trailing_name() {
        let c = rules().classify(0, &Node::text("16 R - - 01 Frozen Tuna"));
        assert_eq!(c.kind, NodeKind::ProductAnchor);
        assert_eq!(c.code.as_deref(), Some("16 R - - 01"));
        assert_eq!(c.rest, "Frozen Tuna");
    }

    #[test]
    fn date_marker_and_pattern() {
        let r = rules();
        let c = r.classify(0, &Node::text("Date Published: 05/20/2024"));
        assert_eq!(c.kind, NodeKind::DateAnchor);
        assert_eq!(c.date_text.as_deref(), Some("05/20/2024"));
        assert_eq!(c.rest, "");

        let c = r.classify(0, &Node::text("01/15/2024 Salmonella found"));
        assert_eq!(c.kind, NodeKind::DateAnchor);
        assert_eq!(c.rest, "Salmonella found");
    }

    #[test]
    fn marker_without_date_shape() {
        let c = rules().classify(0, &Node::text("Date Published: May 20, 2024"));
        assert_eq!(c.kind, NodeKind::DateAnchor);
        assert_eq!(c.date_text.as_deref(), Some("May 20, 2024"));
        assert_eq!(c.rest, "");
    }

    #[test]
    fn product_wins_over_date() {
        let c = rules().classify(0, &Node::text("12A--34 05/20/2024"));
        assert_eq!(c.kind, NodeKind::ProductAnchor);
        assert!(c.ambiguous);
        assert_eq!(c.code.as_deref(), Some("12A--34"));
        assert_eq!(c.date_text.as_deref(), Some("05/20/2024"));
        assert_eq!(c.rest, "");
    }

    #[test]
    fn plain_content() {
        let c = rules().classify(0, &Node::text("Salmonella   detected"));
        assert_eq!(c.kind, NodeKind::ContentNode);
        assert_eq!(c.rest, "Salmonella detected");
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let cfg = AnchorConfig {
            product_pattern: "(".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            AnchorRules::compile(&cfg),
            Err(ConfigError::Pattern { name: "product", .. })
        ));
    }
}
