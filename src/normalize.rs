use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use thiserror::Error;

use crate::parser::blocks::RawBlock;
use crate::parser::classify::{ClassifiedNode, NodeKind};

static DATE_CANDIDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d{4}-\d{2}-\d{2}(?:[ T]\d{2}:\d{2}:\d{2})?|\d{2}/\d{2}/\d{4}|\d{4}\.\d{2}\.\d{2}|\b\d{8}\b|[A-Z][a-z]+\.? \d{1,2}, \d{4}",
    )
    .unwrap()
});

const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%Y.%m.%d",
    "%Y%m%d",
    "%Y-%m-%d",
    "%B %d, %Y",
    "%b. %d, %Y",
];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognised date format: {0:?}")]
pub struct DateFormatError(pub String);

fn parse_exact(s: &str) -> Option<NaiveDate> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        })
}

/// Normalize any of the known date layouts to a calendar date.
///
/// The whole text is tried first, then the first date-shaped substring, so
/// `"Date: 05/20/2024 (rev.)"` still resolves.
pub fn normalize_date(raw: &str) -> Result<NaiveDate, DateFormatError> {
    let trimmed = raw.trim();
    if let Some(d) = parse_exact(trimmed) {
        return Ok(d);
    }
    DATE_CANDIDATE_RE
        .find_iter(trimmed)
        .find_map(|m| parse_exact(m.as_str()))
        .ok_or_else(|| DateFormatError(trimmed.to_string()))
}

/// Country for a block: its own header context, else the nearest
/// `CountryHeader` before the block's anchor. Other headings (page titles,
/// section names) never count as a country.
pub fn resolve_country(block: &RawBlock, classified: &[ClassifiedNode]) -> Option<String> {
    if let Some(c) = &block.country {
        return Some(c.clone());
    }
    let upto = block.start_index.min(classified.len());
    classified[..upto]
        .iter()
        .rev()
        .find(|n| n.kind == NodeKind::CountryHeader)
        .map(|n| n.rest.clone())
}

fn is_name_punct(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | ':' | ',' | ';' | '.' | '|' | '/')
}

/// Strip a leading product code and the punctuation around it.
pub fn clean_product_name(fragment: &str, code: Option<&str>) -> Option<String> {
    let mut s = fragment.trim();
    if let Some(code) = code {
        s = strip_code_prefix(s, code);
    }
    let cleaned = s.trim_matches(is_name_punct);
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Whitespace-insensitive prefix removal: `"12A - - 34 Shrimp"` loses `"12A--34"`.
fn strip_code_prefix<'a>(s: &'a str, code: &str) -> &'a str {
    let mut want = code.chars().filter(|c| !c.is_whitespace()).peekable();
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if want.peek().is_none() {
            break;
        }
        if c.is_whitespace() {
            end = i + c.len_utf8();
            continue;
        }
        if Some(&c) == want.peek() {
            want.next();
            end = i + c.len_utf8();
        } else {
            return s;
        }
    }
    if want.peek().is_none() {
        &s[end..]
    } else {
        s
    }
}

/// `(product_name, full_text)` from a block's content buffer.
pub fn split_product_fields(block: &RawBlock) -> (Option<String>, Option<String>) {
    let product_name = block
        .content
        .iter()
        .find_map(|f| clean_product_name(f, block.product_code.as_deref()));
    let full = block.content_text();
    let full_text = (!full.trim().is_empty()).then_some(full);
    (product_name, full_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnchorConfig;
    use crate::document::{Element, Node};
    use crate::parser::classify::AnchorRules;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_layouts() {
        assert_eq!(normalize_date("05/20/2024"), Ok(ymd(2024, 5, 20)));
        assert_eq!(normalize_date("2024.05.20"), Ok(ymd(2024, 5, 20)));
        assert_eq!(normalize_date("20240520"), Ok(ymd(2024, 5, 20)));
        assert_eq!(normalize_date("2024-05-20"), Ok(ymd(2024, 5, 20)));
        assert_eq!(normalize_date("2024-05-20 13:45:00"), Ok(ymd(2024, 5, 20)));
        assert_eq!(normalize_date(" May 20, 2024 "), Ok(ymd(2024, 5, 20)));
    }

    #[test]
    fn date_inside_text() {
        assert_eq!(normalize_date("Published 05/20/2024 (rev.)"), Ok(ymd(2024, 5, 20)));
    }

    #[test]
    fn bad_dates() {
        assert!(normalize_date("13/45/2024").is_err());
        assert_eq!(
            normalize_date("soon"),
            Err(DateFormatError("soon".to_string()))
        );
        assert!(normalize_date("").is_err());
    }

    #[test]
    fn product_name_strips_code() {
        assert_eq!(
            clean_product_name("12A--34 - Frozen Shrimp", Some("12A--34")).as_deref(),
            Some("Frozen Shrimp")
        );
        assert_eq!(
            clean_product_name("12A - - 34: Frozen Shrimp", Some("12A--34")).as_deref(),
            Some("Frozen Shrimp")
        );
        assert_eq!(
            clean_product_name("Frozen Shrimp,", Some("12A--34")).as_deref(),
            Some("Frozen Shrimp")
        );
        assert_eq!(clean_product_name(" -- ", None), None);
    }

    #[test]
    fn product_fields_from_block() {
        let block = RawBlock {
            start_index: 1,
            country: None,
            product_code: Some("12A--34".into()),
            raw_date_text: None,
            date_index: None,
            content: vec!["Frozen Shrimp".into(), "Salmonella detected".into()],
        };
        let (name, full) = split_product_fields(&block);
        assert_eq!(name.as_deref(), Some("Frozen Shrimp"));
        assert_eq!(full.as_deref(), Some("Frozen Shrimp Salmonella detected"));
    }

    #[test]
    fn country_backward_scan() {
        let rules = AnchorRules::compile(&AnchorConfig::default()).unwrap();
        let nodes = rules.classify_all(&[
            Node::new(
                Element::new("h4", &[]),
                Some(Element::new("div", &["center"])),
                "Viet Nam",
            ),
            Node::text("intro"),
            Node::text("01/01/2024"),
            Node::text("shrimp"),
        ]);
        let block = RawBlock {
            start_index: 2,
            country: None,
            product_code: None,
            raw_date_text: Some("01/01/2024".into()),
            date_index: Some(2),
            content: vec!["shrimp".into()],
        };
        assert_eq!(resolve_country(&block, &nodes).as_deref(), Some("Viet Nam"));

        let orphan = RawBlock {
            start_index: 0,
            ..block.clone()
        };
        assert_eq!(resolve_country(&orphan, &nodes), None);

        let own = RawBlock {
            country: Some("Peru".into()),
            ..block
        };
        assert_eq!(resolve_country(&own, &nodes).as_deref(), Some("Peru"));
    }

    #[test]
    fn page_title_is_not_a_country() {
        let rules = AnchorRules::compile(&AnchorConfig::default()).unwrap();
        let nodes = rules.classify_all(&[
            Node::new(Element::new("h1", &[]), None, "Import Alert # 99-01"),
            Node::text("12A--34"),
            Node::text("Frozen Shrimp"),
        ]);
        let block = RawBlock {
            start_index: 1,
            country: None,
            product_code: Some("12A--34".into()),
            raw_date_text: None,
            date_index: None,
            content: vec!["Frozen Shrimp".into()],
        };
        assert_eq!(resolve_country(&block, &nodes), None);
    }
}
