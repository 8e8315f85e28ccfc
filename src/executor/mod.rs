//! Page automation against documents we have no schema for.
//!
//! A [`Document`] exposes the handful of DOM primitives the executor needs.
//! [`finder`] holds the ordered fallback strategies that locate an element
//! from a loose description, and [`automation`] turns page requests into
//! results that never raise.

pub mod automation;
pub mod finder;
pub mod memory;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use automation::{
    ActionOutcome, ElementCounts, FoundElement, LocalPage, PageAutomation, PageInfo, PageRequest,
    PageResponse, ScrollOutcome,
};
pub use finder::{ElementFinder, ElementMatch};
pub use memory::MemoryDocument;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The query could not be run against the page
    #[error("query `{selector}` failed: {reason}")]
    Query { selector: String, reason: String },

    /// The element went away (navigation, re-render) before we could use it
    #[error("element is gone: {0}")]
    Detached(String),

    /// The page refused the operation
    #[error("operation failed: {0}")]
    Operation(String),
}

/// Synthetic notifications emitted on elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEvent {
    Click,
    Input,
    Change,
}

impl DomEvent {
    pub fn name(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Input => "input",
            Self::Change => "change",
        }
    }
}

/// Which elements to enumerate. Renders as a CSS selector.
///
/// With neither tag nor attribute the query means every element under
/// `<body>`, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementQuery {
    pub tag: Option<&'static str>,
    pub attribute: Option<&'static str>,
}

impl ElementQuery {
    pub const fn tag(tag: &'static str) -> Self {
        Self {
            tag: Some(tag),
            attribute: None,
        }
    }

    pub const fn attribute(attribute: &'static str) -> Self {
        Self {
            tag: None,
            attribute: Some(attribute),
        }
    }

    pub const fn tag_with(tag: &'static str, attribute: &'static str) -> Self {
        Self {
            tag: Some(tag),
            attribute: Some(attribute),
        }
    }

    pub const fn any() -> Self {
        Self {
            tag: None,
            attribute: None,
        }
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.tag, self.attribute) {
            (None, None) => f.write_str("body *"),
            (Some(tag), None) => f.write_str(tag),
            (None, Some(attr)) => write!(f, "[{attr}]"),
            (Some(tag), Some(attr)) => write!(f, "{tag}[{attr}]"),
        }
    }
}

/// Which text of an element a text query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextScope {
    /// Text of the element and all its descendants
    All,
    /// The element's direct text children only
    Own,
}

/// A live element handle.
pub trait PageElement {
    /// Upper-case tag name, as the DOM reports it
    fn tag_name(&self) -> String;
    fn attribute(&self, name: &str) -> Result<Option<String>, DomError>;
    /// Text of the element and all its descendants
    fn text_content(&self) -> Result<String, DomError>;
    /// Text of the element's direct text children only
    fn own_text(&self) -> Result<String, DomError>;
    fn outer_html(&self) -> Result<String, DomError>;
    fn click(&self) -> Result<(), DomError>;
    fn set_value(&self, value: &str) -> Result<(), DomError>;
    fn dispatch(&self, event: DomEvent) -> Result<(), DomError>;
}

/// A page the executor can inspect and drive.
pub trait Document: Send + Sync {
    type Element<'a>: PageElement
    where
        Self: 'a;

    /// Elements matching `query`, in document order.
    fn query_all(&self, query: &ElementQuery) -> Result<Vec<Self::Element<'_>>, DomError>;

    /// At most `limit` elements matching `query` whose `scope` text contains
    /// `needle`, ignoring case, in document order.
    ///
    /// Remote documents should override this to filter on their side.
    fn query_text(
        &self,
        query: &ElementQuery,
        needle: &str,
        scope: TextScope,
        limit: usize,
    ) -> Result<Vec<Self::Element<'_>>, DomError> {
        let needle = needle.to_lowercase();
        let mut hits = Vec::new();
        for el in self.query_all(query)? {
            if hits.len() >= limit {
                break;
            }
            let text = match scope {
                TextScope::All => el.text_content()?,
                TextScope::Own => el.own_text()?,
            };
            if text.to_lowercase().contains(&needle) {
                hits.push(el);
            }
        }
        Ok(hits)
    }
    fn title(&self) -> Result<String, DomError>;
    fn url(&self) -> Result<String, DomError>;
    fn scroll_by(&self, dy: i64) -> Result<(), DomError>;
}
