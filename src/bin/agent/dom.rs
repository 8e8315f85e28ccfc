use std::collections::HashMap;
use std::sync::Arc;

use headless_chrome::Tab;
use serde::Deserialize;

use heyweb::executor::{DomError, DomEvent, Document, ElementQuery, PageElement, TextScope};
use heyweb::types::MARKUP_SNIPPET_CHARS;

use crate::hands::BrowserSession;

/// Text content beyond this is not read back from the page.
const TEXT_CAP: usize = 10_000;

/// Reads up to `limit` elements matching a selector in one round-trip,
/// keeping only those for which the JS expression `keep` holds.
///
/// Returns a JSON string; the page never sees anything but literal selectors.
fn snapshot_js(selector: &str, keep: &str, limit: usize) -> String {
    format!(
        r#"
(() => {{
  const els = document.querySelectorAll({selector});
  const out = [];
  for (let i = 0; i < els.length && out.length < {limit}; i++) {{
    const el = els[i];
    const own = [...el.childNodes].filter(n => n.nodeType === 3).map(n => n.textContent).join('');
    if (!({keep})) continue;
    out.push({{
      index: i,
      tag: el.tagName,
      attrs: Object.fromEntries([...el.attributes].map(a => [a.name, a.value])),
      text: (el.textContent || '').slice(0, {TEXT_CAP}),
      own,
      html: el.outerHTML.slice(0, {MARKUP_SNIPPET_CHARS}),
    }});
  }}
  return JSON.stringify(out);
}})()
"#,
        selector = js_string(selector),
    )
}

/// JS test for a case-insensitive text match, against `el` and `own` in [`snapshot_js`].
fn text_filter(needle: &str, scope: TextScope) -> String {
    let text = match scope {
        TextScope::All => "(el.textContent || '')",
        TextScope::Own => "own",
    };
    format!("{text}.toLowerCase().includes({})", js_string(&needle.to_lowercase()))
}

/// Runs `body` against the `index`th match of `selector`, if it is still the same kind of element.
fn element_js(selector: &str, index: usize, tag: &str, body: &str) -> String {
    format!(
        r#"
(() => {{
  const el = document.querySelectorAll({selector})[{index}];
  if (!el || el.tagName !== {tag}) return 'detached';
  {body}
  return 'ok';
}})()
"#,
        selector = js_string(selector),
        tag = js_string(tag),
    )
}

fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn op_error(e: impl std::fmt::Display) -> DomError {
    DomError::Operation(e.to_string())
}

/// Evaluate `expression` and return its string result.
fn eval_string(tab: &Tab, expression: &str) -> Result<String, DomError> {
    let result = tab.evaluate(expression, false).map_err(op_error)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

/// Get the current page URL.
pub fn get_current_url(tab: &Arc<Tab>) -> Result<String, DomError> {
    eval_string(tab, "window.location.href")
}

/// Get the current page title.
pub fn get_page_title(tab: &Arc<Tab>) -> Result<String, DomError> {
    eval_string(tab, "document.title")
}

#[derive(Debug, Clone, Deserialize)]
struct ElementSnapshot {
    /// Position among all matches of the selector
    index: usize,
    tag: String,
    #[serde(default)]
    attrs: HashMap<String, String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    own: String,
    #[serde(default)]
    html: String,
}

/// The browser's current tab, as a [`Document`].
pub struct ChromeDocument {
    session: BrowserSession,
}

impl ChromeDocument {
    pub fn new(session: BrowserSession) -> Self {
        Self { session }
    }
}

impl ChromeDocument {
    fn snapshot(
        &self,
        query: &ElementQuery,
        keep: &str,
        limit: usize,
    ) -> Result<Vec<ChromeElement>, DomError> {
        let tab = self.session.current_tab();
        let selector = query.to_string();
        let json = eval_string(&tab, &snapshot_js(&selector, keep, limit))?;
        let snapshots: Vec<ElementSnapshot> =
            serde_json::from_str(&json).map_err(|e| DomError::Query {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
        Ok(snapshots
            .into_iter()
            .map(|snapshot| ChromeElement {
                tab: Arc::clone(&tab),
                selector: selector.clone(),
                index: snapshot.index,
                snapshot,
            })
            .collect())
    }
}

impl Document for ChromeDocument {
    type Element<'a>
        = ChromeElement
    where
        Self: 'a;

    fn query_all(&self, query: &ElementQuery) -> Result<Vec<ChromeElement>, DomError> {
        self.snapshot(query, "true", usize::MAX)
    }

    fn query_text(
        &self,
        query: &ElementQuery,
        needle: &str,
        scope: TextScope,
        limit: usize,
    ) -> Result<Vec<ChromeElement>, DomError> {
        self.snapshot(query, &text_filter(needle, scope), limit)
    }

    fn title(&self) -> Result<String, DomError> {
        get_page_title(&self.session.current_tab())
    }

    fn url(&self) -> Result<String, DomError> {
        get_current_url(&self.session.current_tab())
    }

    fn scroll_by(&self, dy: i64) -> Result<(), DomError> {
        eval_string(
            &self.session.current_tab(),
            &format!("window.scrollBy({{top: {dy}, behavior: 'smooth'}})"),
        )
        .map(|_| ())
    }
}

/// An element found by position within a selector's matches.
///
/// Reads come from the snapshot taken at query time; writes go back to
/// the live page and fail as detached if the element has moved.
pub struct ChromeElement {
    tab: Arc<Tab>,
    selector: String,
    index: usize,
    snapshot: ElementSnapshot,
}

impl ChromeElement {
    fn run(&self, body: &str) -> Result<(), DomError> {
        let js = element_js(&self.selector, self.index, &self.snapshot.tag, body);
        match eval_string(&self.tab, &js)?.as_str() {
            "ok" => Ok(()),
            _ => Err(DomError::Detached(format!("{}[{}]", self.selector, self.index))),
        }
    }
}

impl PageElement for ChromeElement {
    fn tag_name(&self) -> String {
        self.snapshot.tag.to_ascii_uppercase()
    }

    fn attribute(&self, name: &str) -> Result<Option<String>, DomError> {
        Ok(self.snapshot.attrs.get(&name.to_ascii_lowercase()).cloned())
    }

    fn text_content(&self) -> Result<String, DomError> {
        Ok(self.snapshot.text.clone())
    }

    fn own_text(&self) -> Result<String, DomError> {
        Ok(self.snapshot.own.clone())
    }

    fn outer_html(&self) -> Result<String, DomError> {
        Ok(self.snapshot.html.clone())
    }

    fn click(&self) -> Result<(), DomError> {
        self.run("el.scrollIntoView({block: 'center'}); el.click();")
    }

    fn set_value(&self, value: &str) -> Result<(), DomError> {
        self.run(&format!("el.focus(); el.value = {};", js_string(value)))
    }

    fn dispatch(&self, event: DomEvent) -> Result<(), DomError> {
        self.run(&format!(
            "el.dispatchEvent(new Event({}, {{bubbles: true}}));",
            js_string(event.name())
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_quoted_for_js() {
        assert_eq!(js_string(r#"a "b" </script>"#), r#""a \"b\" </script>""#);
    }

    #[test]
    fn test_element_script_checks_tag() {
        let js = element_js("button", 3, "BUTTON", "el.click();");
        assert!(js.contains(r#"document.querySelectorAll("button")[3]"#));
        assert!(js.contains(r#"el.tagName !== "BUTTON""#));
    }

    #[test]
    fn test_snapshot_parses() {
        let parsed: Vec<ElementSnapshot> = serde_json::from_str(
            r#"[{"index":4,"tag":"A","attrs":{"href":"/x","aria-label":"Home"},"text":"Home","own":"Home","html":"<a href=\"/x\">"}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0].attrs["aria-label"], "Home");
        assert_eq!(parsed[0].index, 4);
    }

    #[test]
    fn test_text_queries_filter_in_the_page() {
        let keep = text_filter(r#"Say "Hi""#, TextScope::Own);
        assert_eq!(keep, r#"own.toLowerCase().includes("say \"hi\"")"#);

        let js = snapshot_js("body *", &text_filter("pricing", TextScope::All), 10);
        assert!(js.contains(r#"(el.textContent || '').toLowerCase().includes("pricing")"#));
        assert!(js.contains("out.length < 10"));
        assert!(js.contains("index: i"));
    }
}
