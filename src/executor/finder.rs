//! Element finder strategies.
//!
//! Strategies are tried in the order of the list they belong to and the
//! first element any of them accepts wins. That order is part of the
//! contract: reordering a list changes which element a vague target hits.

use serde::Serialize;

use super::{DomError, Document, ElementQuery, PageElement, TextScope};

/// A single way of locating an element from a loose description.
pub trait ElementFinder<D: Document>: Send + Sync {
    fn name(&self) -> &'static str;

    /// First element in document order this strategy accepts for `needle`.
    fn find<'a>(&self, doc: &'a D, needle: &str) -> Result<Option<D::Element<'a>>, DomError>;
}

/// Which element a lookup settled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMatch {
    pub tag_name: String,
    pub strategy: &'static str,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn attribute_contains<E: PageElement>(el: &E, name: &str, needle: &str) -> Result<bool, DomError> {
    Ok(el
        .attribute(name)?
        .is_some_and(|value| contains_ci(&value, needle)))
}

/// Whether a user could interact with `el` at all.
fn is_actionable<E: PageElement>(el: &E, editable: bool) -> Result<bool, DomError> {
    if el.attribute("disabled")?.is_some() || el.attribute("hidden")?.is_some() {
        return Ok(false);
    }
    if el
        .attribute("aria-hidden")?
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return Ok(false);
    }
    if editable && el.attribute("readonly")?.is_some() {
        return Ok(false);
    }
    Ok(true)
}

/// Matches elements whose `attribute` contains the needle.
pub struct AttributeFinder {
    pub name: &'static str,
    pub query: ElementQuery,
    pub attribute: &'static str,
    pub editable: bool,
}

impl<D: Document> ElementFinder<D> for AttributeFinder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn find<'a>(&self, doc: &'a D, needle: &str) -> Result<Option<D::Element<'a>>, DomError> {
        for el in doc.query_all(&self.query)? {
            if attribute_contains(&el, self.attribute, needle)? && is_actionable(&el, self.editable)? {
                return Ok(Some(el));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// Full text content, or the aria-label, or the placeholder
    Labelled,
    /// Only the element's own text nodes
    Own,
}

/// Matches elements by their visible text.
pub struct TextFinder {
    pub name: &'static str,
    pub query: ElementQuery,
    pub source: TextSource,
}

impl TextFinder {
    fn accepts<E: PageElement>(&self, el: &E, needle: &str) -> Result<bool, DomError> {
        match self.source {
            TextSource::Own => Ok(contains_ci(&el.own_text()?, needle)),
            TextSource::Labelled => Ok(contains_ci(&el.text_content()?, needle)
                || attribute_contains(el, "aria-label", needle)?
                || attribute_contains(el, "placeholder", needle)?),
        }
    }
}

impl<D: Document> ElementFinder<D> for TextFinder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn find<'a>(&self, doc: &'a D, needle: &str) -> Result<Option<D::Element<'a>>, DomError> {
        // own-text queries usually run over the whole body, so let the document filter
        let candidates = match self.source {
            TextSource::Own => doc.query_text(&self.query, needle, TextScope::Own, usize::MAX)?,
            TextSource::Labelled => doc.query_all(&self.query)?,
        };
        for el in candidates {
            if self.accepts(&el, needle)? && is_actionable(&el, false)? {
                return Ok(Some(el));
            }
        }
        Ok(None)
    }
}

pub type Strategies<D> = Vec<Box<dyn ElementFinder<D>>>;

/// Strategies for click targets, in priority order.
pub fn click_strategies<D: Document>() -> Strategies<D> {
    vec![
        Box::new(AttributeFinder {
            name: "aria-label",
            query: ElementQuery::attribute("aria-label"),
            attribute: "aria-label",
            editable: false,
        }),
        Box::new(AttributeFinder {
            name: "placeholder",
            query: ElementQuery::attribute("placeholder"),
            attribute: "placeholder",
            editable: false,
        }),
        Box::new(AttributeFinder {
            name: "input-value",
            query: ElementQuery::tag_with("input", "value"),
            attribute: "value",
            editable: false,
        }),
        Box::new(TextFinder {
            name: "button-text",
            query: ElementQuery::tag("button"),
            source: TextSource::Labelled,
        }),
        Box::new(TextFinder {
            name: "link-text",
            query: ElementQuery::tag("a"),
            source: TextSource::Labelled,
        }),
        Box::new(TextFinder {
            name: "label-text",
            query: ElementQuery::tag("label"),
            source: TextSource::Labelled,
        }),
        Box::new(TextFinder {
            name: "any-text",
            query: ElementQuery::any(),
            source: TextSource::Own,
        }),
    ]
}

/// Strategies for form fields, in priority order.
pub fn fill_strategies<D: Document>() -> Strategies<D> {
    const FIELDS: [(&str, &str, &str); 6] = [
        ("input-name", "input", "name"),
        ("input-placeholder", "input", "placeholder"),
        ("input-aria-label", "input", "aria-label"),
        ("textarea-name", "textarea", "name"),
        ("textarea-placeholder", "textarea", "placeholder"),
        ("textarea-aria-label", "textarea", "aria-label"),
    ];
    FIELDS
        .into_iter()
        .map(|(name, tag, attribute)| {
            Box::new(AttributeFinder {
                name,
                query: ElementQuery::tag_with(tag, attribute),
                attribute,
                editable: true,
            }) as Box<dyn ElementFinder<D>>
        })
        .collect()
}

/// Run `strategies` in order and return the first hit.
///
/// A strategy that errors is logged and skipped.
pub fn locate<'a, D: Document>(
    doc: &'a D,
    strategies: &[Box<dyn ElementFinder<D>>],
    needle: &str,
) -> Option<(D::Element<'a>, ElementMatch)> {
    for strategy in strategies {
        match strategy.find(doc, needle) {
            Ok(Some(el)) => {
                let found = ElementMatch {
                    tag_name: el.tag_name(),
                    strategy: strategy.name(),
                };
                tracing::debug!(strategy = found.strategy, tag = %found.tag_name, needle, "element located");
                return Some((el, found));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(strategy = strategy.name(), error = %e, "strategy failed, trying next");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryDocument;

    fn hit(html: &str, needle: &str) -> Option<ElementMatch> {
        let doc = MemoryDocument::parse(html);
        locate(&doc, &click_strategies(), needle).map(|(_, m)| m)
    }

    #[test]
    fn test_aria_label_beats_button_text() {
        let m = hit(
            r#"<body><button>Login</button><a aria-label="Login page" href="/l">go</a></body>"#,
            "login",
        )
        .unwrap();
        assert_eq!(m.strategy, "aria-label");
        assert_eq!(m.tag_name, "A");
    }

    #[test]
    fn test_button_text_case_insensitive() {
        let m = hit("<body><div>intro</div><button>Sign In</button></body>", "sign in").unwrap();
        assert_eq!(m.strategy, "button-text");
        assert_eq!(m.tag_name, "BUTTON");
    }

    #[test]
    fn test_generic_uses_own_text_not_ancestors() {
        let m = hit("<body><div><section><span>Pricing</span></section></div></body>", "pricing")
            .unwrap();
        assert_eq!(m.strategy, "any-text");
        assert_eq!(m.tag_name, "SPAN");
    }

    #[test]
    fn test_disabled_and_hidden_are_skipped() {
        let m = hit(
            r#"<body><button disabled>Save</button><button hidden>Save</button><button id="ok">Save draft</button></body>"#,
            "save",
        )
        .unwrap();
        assert_eq!(m.strategy, "button-text");
        let doc = MemoryDocument::parse(
            r#"<body><button disabled>Save</button><button id="ok">Save draft</button></body>"#,
        );
        let (el, _) = locate(&doc, &click_strategies(), "save").unwrap();
        assert_eq!(el.attribute("id").unwrap().as_deref(), Some("ok"));
    }

    #[test]
    fn test_no_match() {
        assert!(hit("<body><p>Nothing here</p></body>", "checkout").is_none());
    }

    #[test]
    fn test_fill_prefers_input_name_over_textarea() {
        let doc = MemoryDocument::parse(
            r#"<body><textarea name="email-notes"></textarea><input name="email"></body>"#,
        );
        let (el, m) = locate(&doc, &fill_strategies(), "EMAIL").unwrap();
        assert_eq!(m.strategy, "input-name");
        assert_eq!(el.tag_name(), "INPUT");
    }

    #[test]
    fn test_fill_skips_readonly() {
        let doc = MemoryDocument::parse(
            r#"<body><input name="city" readonly><input placeholder="City"></body>"#,
        );
        let (_, m) = locate(&doc, &fill_strategies(), "city").unwrap();
        assert_eq!(m.strategy, "input-placeholder");
    }

    struct Broken;

    impl<D: Document> ElementFinder<D> for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn find<'a>(&self, _: &'a D, _: &str) -> Result<Option<D::Element<'a>>, DomError> {
            Err(DomError::Query {
                selector: ":contains(x)".into(),
                reason: "invalid selector".into(),
            })
        }
    }

    #[test]
    fn test_failing_strategy_is_skipped() {
        let doc = MemoryDocument::parse("<body><button>Next</button></body>");
        let mut strategies: Strategies<MemoryDocument> = vec![Box::new(Broken)];
        strategies.extend(click_strategies());
        let (_, m) = locate(&doc, &strategies, "next").unwrap();
        assert_eq!(m.strategy, "button-text");
    }
}
