//! In-memory document parsed from HTML.
//!
//! Used to run the executor offline. Every click, value write and
//! synthetic event is recorded so callers can inspect what a page would
//! have observed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use scraper::{ElementRef, Html};
use serde::Serialize;

use super::{DomError, DomEvent, Document, ElementQuery, PageElement};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug)]
enum Child {
    Element(usize),
    Text(String),
}

#[derive(Debug)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Child>,
}

/// An event observed on an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    pub tag: String,
    pub id: Option<String>,
    pub event: DomEvent,
}

#[derive(Debug, Default)]
struct PageState {
    values: HashMap<usize, String>,
    events: Vec<RecordedEvent>,
    scroll_y: i64,
    detached: bool,
}

#[derive(Debug)]
pub struct MemoryDocument {
    nodes: Vec<Node>,
    body: Option<usize>,
    url: String,
    state: Mutex<PageState>,
}

/// Flatten the tree under `root` into `nodes`, in document order.
///
/// Uses an explicit work stack so nesting depth is bounded by memory only.
fn build(root: ElementRef<'_>, nodes: &mut Vec<Node>) {
    // (element, slot in the parent's children to fill with its index)
    let mut stack: Vec<(ElementRef<'_>, Option<(usize, usize)>)> = vec![(root, None)];
    while let Some((el, slot)) = stack.pop() {
        let index = nodes.len();
        if let Some((parent, position)) = slot {
            nodes[parent].children[position] = Child::Element(index);
        }
        let mut children = Vec::new();
        let mut pending = Vec::new();
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                pending.push((child_el, Some((index, children.len()))));
                children.push(Child::Element(usize::MAX));
            } else if let Some(text) = child.value().as_text() {
                children.push(Child::Text(String::from(&**text)));
            }
        }
        nodes.push(Node {
            tag: el.value().name().to_ascii_lowercase(),
            attrs: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children,
        });
        // first child on top, so indices follow document order
        stack.extend(pending.into_iter().rev());
    }
}

fn escape(text: &str, attr: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attr => out.push_str("&lt;"),
            '>' if !attr => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl MemoryDocument {
    pub fn parse(html: &str) -> Self {
        Self::with_url(html, "about:blank")
    }

    pub fn with_url(html: &str, url: impl Into<String>) -> Self {
        let parsed = Html::parse_document(html);
        let mut nodes = Vec::new();
        build(parsed.root_element(), &mut nodes);
        let body = nodes.iter().position(|n| n.tag == "body");
        Self {
            nodes,
            body,
            url: url.into(),
            state: Mutex::new(PageState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_attached(&self) -> Result<(), DomError> {
        if self.state().detached {
            Err(DomError::Detached(self.url.clone()))
        } else {
            Ok(())
        }
    }

    fn element_children(&self, index: usize) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.nodes[index].children.iter().filter_map(|c| match c {
            Child::Element(i) => Some(*i),
            Child::Text(_) => None,
        })
    }

    fn collect_descendants(&self, index: usize, out: &mut Vec<usize>) {
        let mut stack: Vec<usize> = self.element_children(index).rev().collect();
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.element_children(i).rev());
        }
    }

    fn push_text(&self, index: usize, out: &mut String) {
        let mut stack: Vec<&Child> = self.nodes[index].children.iter().rev().collect();
        while let Some(child) = stack.pop() {
            match child {
                Child::Text(t) => out.push_str(t),
                Child::Element(i) => stack.extend(self.nodes[*i].children.iter().rev()),
            }
        }
    }

    fn serialize(&self, index: usize, out: &mut String) {
        enum Step<'a> {
            Open(usize),
            Text(&'a str),
            Close(&'a str),
        }

        let mut stack = vec![Step::Open(index)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Text(t) => out.push_str(&escape(t, false)),
                Step::Close(tag) => out.push_str(&format!("</{tag}>")),
                Step::Open(i) => {
                    let node = &self.nodes[i];
                    out.push('<');
                    out.push_str(&node.tag);
                    for (k, v) in &node.attrs {
                        out.push_str(&format!(" {k}=\"{}\"", escape(v, true)));
                    }
                    out.push('>');
                    if VOID_ELEMENTS.contains(&node.tag.as_str()) {
                        continue;
                    }
                    stack.push(Step::Close(&node.tag));
                    stack.extend(node.children.iter().rev().map(|child| match child {
                        Child::Text(t) => Step::Text(t),
                        Child::Element(c) => Step::Open(*c),
                    }));
                }
            }
        }
    }

    fn record(&self, index: usize, event: DomEvent) {
        let node = &self.nodes[index];
        let id = node
            .attrs
            .iter()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.clone());
        self.state().events.push(RecordedEvent {
            tag: node.tag.to_ascii_uppercase(),
            id,
            event,
        });
    }

    /// Everything dispatched on the page so far, oldest first.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state().events.clone()
    }

    /// Current value of the element with `id`: the last write, else its `value` attribute.
    pub fn value_of(&self, id: &str) -> Option<String> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.attrs.iter().any(|(k, v)| k == "id" && v == id))?;
        if let Some(value) = self.state().values.get(&index) {
            return Some(value.clone());
        }
        self.nodes[index]
            .attrs
            .iter()
            .find(|(k, _)| k == "value")
            .map(|(_, v)| v.clone())
    }

    pub fn scroll_y(&self) -> i64 {
        self.state().scroll_y
    }

    /// Simulate the page going away; later operations fail as detached.
    pub fn navigate_away(&self) {
        self.state().detached = true;
    }
}

impl Document for MemoryDocument {
    type Element<'a>
        = MemoryElement<'a>
    where
        Self: 'a;

    fn query_all(&self, query: &ElementQuery) -> Result<Vec<MemoryElement<'_>>, DomError> {
        self.check_attached()?;
        let candidates: Vec<usize> = match (query.tag, query.attribute, self.body) {
            (None, None, Some(body)) => {
                let mut out = Vec::new();
                self.collect_descendants(body, &mut out);
                out
            }
            (None, None, None) => Vec::new(),
            _ => (0..self.nodes.len()).collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|&i| {
                let node = &self.nodes[i];
                query.tag.is_none_or(|t| node.tag.eq_ignore_ascii_case(t))
                    && query
                        .attribute
                        .is_none_or(|a| node.attrs.iter().any(|(k, _)| k == a))
            })
            .map(|index| MemoryElement { doc: self, index })
            .collect())
    }

    fn title(&self) -> Result<String, DomError> {
        Ok(self
            .nodes
            .iter()
            .position(|n| n.tag == "title")
            .map(|i| {
                let mut text = String::new();
                self.push_text(i, &mut text);
                text.trim().to_string()
            })
            .unwrap_or_default())
    }

    fn url(&self) -> Result<String, DomError> {
        Ok(self.url.clone())
    }

    fn scroll_by(&self, dy: i64) -> Result<(), DomError> {
        self.check_attached()?;
        let mut state = self.state();
        state.scroll_y = (state.scroll_y + dy).max(0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryElement<'a> {
    doc: &'a MemoryDocument,
    index: usize,
}

impl PageElement for MemoryElement<'_> {
    fn tag_name(&self) -> String {
        self.doc.nodes[self.index].tag.to_ascii_uppercase()
    }

    fn attribute(&self, name: &str) -> Result<Option<String>, DomError> {
        Ok(self.doc.nodes[self.index]
            .attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone()))
    }

    fn text_content(&self) -> Result<String, DomError> {
        let mut out = String::new();
        self.doc.push_text(self.index, &mut out);
        Ok(out)
    }

    fn own_text(&self) -> Result<String, DomError> {
        Ok(self.doc.nodes[self.index]
            .children
            .iter()
            .filter_map(|c| match c {
                Child::Text(t) => Some(t.as_str()),
                Child::Element(_) => None,
            })
            .collect())
    }

    fn outer_html(&self) -> Result<String, DomError> {
        let mut out = String::new();
        self.doc.serialize(self.index, &mut out);
        Ok(out)
    }

    fn click(&self) -> Result<(), DomError> {
        self.doc.check_attached()?;
        self.doc.record(self.index, DomEvent::Click);
        Ok(())
    }

    fn set_value(&self, value: &str) -> Result<(), DomError> {
        self.doc.check_attached()?;
        self.doc
            .state()
            .values
            .insert(self.index, value.to_string());
        Ok(())
    }

    fn dispatch(&self, event: DomEvent) -> Result<(), DomError> {
        self.doc.check_attached()?;
        self.doc.record(self.index, event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TextScope;

    const PAGE: &str = r#"<html><head><title> Shop </title></head>
        <body><nav><a href="/">Home</a></nav><main id="m"><p>Hello <b>world</b></p>
        <input id="q" name="q" value="old"></main></body></html>"#;

    #[test]
    fn test_title_and_url() {
        let doc = MemoryDocument::with_url(PAGE, "https://shop.test/");
        assert_eq!(doc.title().unwrap(), "Shop");
        assert_eq!(doc.url().unwrap(), "https://shop.test/");
    }

    #[test]
    fn test_any_query_is_document_order_under_body() {
        let doc = MemoryDocument::parse(PAGE);
        let tags: Vec<String> = doc
            .query_all(&ElementQuery::any())
            .unwrap()
            .iter()
            .map(|e| e.tag_name())
            .collect();
        assert_eq!(tags, ["NAV", "A", "MAIN", "P", "B", "INPUT"]);
    }

    #[test]
    fn test_text_and_markup() {
        let doc = MemoryDocument::parse(PAGE);
        let p = &doc.query_all(&ElementQuery::tag("p")).unwrap()[0];
        assert_eq!(p.text_content().unwrap(), "Hello world");
        assert_eq!(p.own_text().unwrap(), "Hello ");
        assert_eq!(p.outer_html().unwrap(), "<p>Hello <b>world</b></p>");
    }

    #[test]
    fn test_value_writes_are_visible() {
        let doc = MemoryDocument::parse(PAGE);
        assert_eq!(doc.value_of("q").as_deref(), Some("old"));
        let input = &doc.query_all(&ElementQuery::tag("input")).unwrap()[0];
        input.set_value("new").unwrap();
        assert_eq!(doc.value_of("q").as_deref(), Some("new"));
    }

    #[test]
    fn test_deeply_nested_markup() {
        const DEPTH: usize = 50_000;
        let html = format!(
            "<html><body>{}<label>deep</label>{}</body></html>",
            "<span>".repeat(DEPTH),
            "</span>".repeat(DEPTH)
        );
        let doc = MemoryDocument::parse(&html);
        let all = doc.query_all(&ElementQuery::any()).unwrap();
        assert_eq!(all.last().unwrap().tag_name(), "LABEL");
        assert_eq!(all[0].text_content().unwrap(), "deep");
        assert!(all[0].outer_html().unwrap().ends_with("<label>deep</label></span></span>"));
    }

    #[test]
    fn test_query_text_filters_and_limits() {
        let doc = MemoryDocument::parse(
            "<body><ul><li>Plan A</li><li>plan B</li><li>Plan C</li></ul></body>",
        );
        let own = doc.query_text(&ElementQuery::any(), "PLAN", TextScope::Own, 2).unwrap();
        let texts: Vec<String> = own.iter().map(|e| e.text_content().unwrap()).collect();
        assert_eq!(texts, ["Plan A", "plan B"]);

        let all = doc.query_text(&ElementQuery::any(), "plan c", TextScope::All, 10).unwrap();
        let tags: Vec<String> = all.iter().map(|e| e.tag_name()).collect();
        assert_eq!(tags, ["UL", "LI"]);
    }

    #[test]
    fn test_detached_page_rejects_operations() {
        let doc = MemoryDocument::parse(PAGE);
        doc.navigate_away();
        assert!(matches!(
            doc.query_all(&ElementQuery::tag("a")),
            Err(DomError::Detached(_))
        ));
    }
}
