use scraper::{ElementRef, Html, Selector};

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "head", "template"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
}

impl Element {
    pub fn new(tag: &str, classes: &[&str]) -> Self {
        Element {
            tag: tag.to_ascii_lowercase(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn from_ref(el: &ElementRef) -> Self {
        let value = el.value();
        Element {
            tag: value.name().to_ascii_lowercase(),
            classes: value.classes().map(str::to_string).collect(),
        }
    }
}

/// One text-bearing unit of the flattened page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub element: Element,
    pub parent: Option<Element>,
    pub text: String,
}

impl Node {
    pub fn new(element: Element, parent: Option<Element>, text: &str) -> Self {
        Node {
            element,
            parent,
            text: text.to_string(),
        }
    }

    /// A `<p>` with no container, the common case in tests.
    pub fn text(text: &str) -> Self {
        Node::new(Element::new("p", &[]), None, text)
    }
}

/// Ordered node stream for one retrieved page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source_id: String,
    pub nodes: Vec<Node>,
}

impl Document {
    pub fn new(source_id: &str, nodes: Vec<Node>) -> Self {
        Document {
            source_id: source_id.to_string(),
            nodes,
        }
    }

    /// Flatten an HTML page into sibling-ordered text nodes.
    ///
    /// Each element contributes its own direct text as one node; `<br>` and
    /// nested elements split the text so that document order is preserved.
    pub fn from_html(source_id: &str, html: &str) -> Self {
        let page = Html::parse_document(html);
        let mut nodes = Vec::new();

        let body = Selector::parse("body")
            .ok()
            .and_then(|sel| page.select(&sel).next());
        match body {
            Some(body) => walk(body, None, &mut nodes),
            None => walk(page.root_element(), None, &mut nodes),
        }

        Document::new(source_id, nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn walk(el: ElementRef, parent: Option<&Element>, out: &mut Vec<Node>) {
    let me = Element::from_ref(&el);
    let mut pending = String::new();

    for child in el.children() {
        match child.value() {
            scraper::Node::Text(t) => {
                pending.push_str(t);
                pending.push(' ');
            }
            scraper::Node::Element(e) => {
                if SKIP_TAGS.contains(&e.name()) {
                    continue;
                }
                flush(&mut pending, &me, parent, out);
                if e.name() == "br" {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    walk(child_ref, Some(&me), out);
                }
            }
            _ => {}
        }
    }

    flush(&mut pending, &me, parent, out);
}

fn flush(pending: &mut String, me: &Element, parent: Option<&Element>, out: &mut Vec<Node>) {
    let text = collapse_whitespace(pending);
    pending.clear();
    if !text.is_empty() {
        out.push(Node {
            element: me.clone(),
            parent: parent.cloned(),
            text,
        });
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_siblings_in_order() {
        let html = r#"<html><body>
            <div class="center"><h4>Korea</h4></div>
            <p>12A--34</p>
            <p>Frozen Shrimp<br>Date Published: 05/20/2024</p>
        </body></html>"#;
        let doc = Document::from_html("99-01", html);
        let texts: Vec<&str> = doc.nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Korea", "12A--34", "Frozen Shrimp", "Date Published: 05/20/2024"]
        );
    }

    #[test]
    fn heading_keeps_center_parent() {
        let html = r#"<body><div class="center"><h4> China </h4></div></body>"#;
        let doc = Document::from_html("x", html);
        assert_eq!(doc.nodes.len(), 1);
        let node = &doc.nodes[0];
        assert_eq!(node.element.tag, "h4");
        assert!(node.parent.as_ref().is_some_and(|p| p.has_class("center")));
        assert_eq!(node.text, "China");
    }

    #[test]
    fn skips_scripts_and_blank_text() {
        let html = "<body><script>var x = 1;</script>\n\n<p>  kept  </p><style>p{}</style></body>";
        let doc = Document::from_html("x", html);
        assert_eq!(doc.nodes.len(), 1);
        assert_eq!(doc.nodes[0].text, "kept");
    }

    #[test]
    fn inline_elements_split_text() {
        let html = "<body><p>Firm <b>ACME</b> tail</p></body>";
        let doc = Document::from_html("x", html);
        let texts: Vec<&str> = doc.nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["Firm", "ACME", "tail"]);
        assert_eq!(doc.nodes[1].parent.as_ref().map(|p| p.tag.as_str()), Some("p"));
    }

    #[test]
    fn empty_page_has_no_nodes() {
        assert!(Document::from_html("x", "").is_empty());
    }
}
