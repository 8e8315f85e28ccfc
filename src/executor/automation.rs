//! Page operations and the message protocol the page answers.
//!
//! Every operation reports success or failure in its result; nothing here
//! returns an error to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::finder::{Strategies, click_strategies, fill_strategies, locate};
use super::{DomEvent, Document, ElementQuery, PageElement, TextScope};
use crate::dispatcher::PageChannel;
use crate::error::{Error, Result};
use crate::types::{MARKUP_SNIPPET_CHARS, MAX_FOUND_ELEMENTS, ScrollDirection, TEXT_SNIPPET_CHARS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionOutcome {
    pub success: bool,
    /// Tag name of the element acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn matched(tag_name: impl Into<String>) -> Self {
        Self {
            success: true,
            element: Some(tag_name.into()),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            element: None,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollOutcome {
    pub success: bool,
    pub direction: ScrollDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounts {
    pub buttons: usize,
    pub inputs: usize,
    pub links: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
    pub elements: ElementCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundElement {
    #[serde(rename = "tagName")]
    pub tag_name: String,
    /// Trimmed text content, cut to a fixed length
    pub text: String,
    /// Start of the element's markup
    pub tag: String,
}

/// Requests the page understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageRequest {
    ClickElement { target: String },
    FillForm { field: String, value: String },
    ScrollPage { direction: ScrollDirection },
    GetPageInfo,
    FindElements { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageResponse {
    Outcome(ActionOutcome),
    Scroll(ScrollOutcome),
    Info(PageInfo),
    Elements(Vec<FoundElement>),
}

impl PageResponse {
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Outcome(o) => o.success,
            Self::Scroll(s) => s.success,
            Self::Info(_) | Self::Elements(_) => true,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Outcome(o) => o.error.as_deref(),
            Self::Scroll(s) if !s.success => Some("scroll failed"),
            _ => None,
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Executes page requests against a [`Document`].
pub struct PageAutomation<D: Document> {
    doc: D,
    click: Strategies<D>,
    fill: Strategies<D>,
}

impl<D: Document> PageAutomation<D> {
    pub fn new(doc: D) -> Self {
        Self::with_strategies(doc, click_strategies(), fill_strategies())
    }

    pub fn with_strategies(doc: D, click: Strategies<D>, fill: Strategies<D>) -> Self {
        Self { doc, click, fill }
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    pub fn click(&self, target: &str) -> ActionOutcome {
        let target = target.trim();
        if target.is_empty() {
            return ActionOutcome::failed("Empty target");
        }
        let Some((el, found)) = locate(&self.doc, &self.click, target) else {
            tracing::info!(wanted = target, "no element to click");
            return ActionOutcome::failed("Element not found");
        };
        match el.click() {
            Ok(()) => ActionOutcome::matched(found.tag_name),
            Err(e) => {
                tracing::warn!(wanted = target, error = %e, "click failed");
                ActionOutcome::failed(e.to_string())
            }
        }
    }

    /// Set a form field and notify the page with `input` then `change`.
    pub fn fill_field(&self, field: &str, value: &str) -> ActionOutcome {
        let field = field.trim();
        if field.is_empty() {
            return ActionOutcome::failed("Empty field name");
        }
        let Some((el, found)) = locate(&self.doc, &self.fill, field) else {
            tracing::info!(field, "no field to fill");
            return ActionOutcome::failed("Field not found");
        };
        let written = el
            .set_value(value)
            .and_then(|()| el.dispatch(DomEvent::Input))
            .and_then(|()| el.dispatch(DomEvent::Change));
        match written {
            Ok(()) => ActionOutcome::matched(found.tag_name),
            Err(e) => {
                tracing::warn!(field, error = %e, "fill failed");
                ActionOutcome::failed(e.to_string())
            }
        }
    }

    pub fn scroll(&self, direction: ScrollDirection) -> ScrollOutcome {
        let success = match self.doc.scroll_by(direction.offset()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(?direction, error = %e, "scroll failed");
                false
            }
        };
        ScrollOutcome { success, direction }
    }

    pub fn page_info(&self) -> PageInfo {
        let count = |tag| {
            self.doc
                .query_all(&ElementQuery::tag(tag))
                .map(|v| v.len())
                .unwrap_or(0)
        };
        PageInfo {
            title: self.doc.title().unwrap_or_default(),
            url: self.doc.url().unwrap_or_default(),
            elements: ElementCounts {
                buttons: count("button"),
                inputs: count("input"),
                links: count("a"),
            },
        }
    }

    /// Elements under `<body>` whose text contains `text`, in document order.
    pub fn find_elements_by_text(&self, text: &str) -> Vec<FoundElement> {
        let elements = match self.doc.query_text(
            &ElementQuery::any(),
            text,
            TextScope::All,
            MAX_FOUND_ELEMENTS,
        ) {
            Ok(elements) => elements,
            Err(e) => {
                tracing::warn!(error = %e, "element walk failed");
                return Vec::new();
            }
        };
        elements
            .iter()
            .map(|el| FoundElement {
                tag_name: el.tag_name(),
                text: truncate_chars(el.text_content().unwrap_or_default().trim(), TEXT_SNIPPET_CHARS),
                tag: truncate_chars(&el.outer_html().unwrap_or_default(), MARKUP_SNIPPET_CHARS),
            })
            .collect()
    }

    pub fn handle(&self, request: PageRequest) -> PageResponse {
        match request {
            PageRequest::ClickElement { target } => PageResponse::Outcome(self.click(&target)),
            PageRequest::FillForm { field, value } => {
                PageResponse::Outcome(self.fill_field(&field, &value))
            }
            PageRequest::ScrollPage { direction } => PageResponse::Scroll(self.scroll(direction)),
            PageRequest::GetPageInfo => PageResponse::Info(self.page_info()),
            PageRequest::FindElements { text } => {
                PageResponse::Elements(self.find_elements_by_text(&text))
            }
        }
    }

    /// Answer a raw protocol message. Unknown actions get a failure result.
    pub fn handle_message(&self, message: Value) -> Value {
        match serde_json::from_value::<PageRequest>(message) {
            Ok(request) => serde_json::to_value(self.handle(request))
                .unwrap_or_else(|e| json!({"success": false, "error": e.to_string()})),
            Err(e) => {
                tracing::debug!(error = %e, "unrecognized page message");
                json!({"success": false, "error": "Unknown action"})
            }
        }
    }
}

/// A page channel that runs the automation in this process.
///
/// Document calls may block (a remote browser), so they run on the
/// blocking pool.
pub struct LocalPage<D: Document + 'static> {
    automation: Arc<PageAutomation<D>>,
}

impl<D: Document + 'static> LocalPage<D> {
    pub fn new(doc: D) -> Self {
        Self {
            automation: Arc::new(PageAutomation::new(doc)),
        }
    }

    pub fn automation(&self) -> &PageAutomation<D> {
        &self.automation
    }
}

#[async_trait]
impl<D: Document + 'static> PageChannel for LocalPage<D> {
    async fn send(&self, request: PageRequest) -> Result<PageResponse> {
        let automation = Arc::clone(&self.automation);
        tokio::task::spawn_blocking(move || automation.handle(request))
            .await
            .map_err(|e| Error::Action(format!("page task failed: {e}")))
    }
}
