//! Extracts actions from free-form assistant text.
//!
//! The completion service only ever produces prose, so every action comes
//! from an ordered list of [`Matcher`]s run over that prose. Each matcher is
//! independent: all of its matches contribute, in matcher order, and a
//! match whose extractor fails is skipped on its own.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::types::{Action, LinkTarget, ScrollDirection, SearchEngine, SystemCommand};

/// Why a single match produced no action.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("capture group {0} missing")]
    MissingGroup(usize),

    #[error("empty {0}")]
    Empty(&'static str),

    #[error("rejected: {0}")]
    Rejected(&'static str),
}

type Extractor = fn(&Captures<'_>) -> Result<Action, ExtractError>;

/// One rule of the action grammar.
pub struct Matcher {
    pub name: &'static str,
    regex: Regex,
    extract: Extractor,
}

impl Matcher {
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid regex; matchers are built from literals.
    pub fn new(name: &'static str, pattern: &str, extract: Extractor) -> Self {
        let regex = Regex::new(&format!("(?i){pattern}"))
            .unwrap_or_else(|e| panic!("matcher {name} has an invalid pattern: {e}"));
        Self {
            name,
            regex,
            extract,
        }
    }

    /// Every action this matcher finds in `text`, skipping failed extractions.
    pub fn apply(&self, text: &str) -> Vec<Action> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| match (self.extract)(&caps) {
                Ok(action) => Some(action),
                Err(e) => {
                    tracing::debug!(matcher = self.name, error = %e, "skipping match");
                    None
                }
            })
            .collect()
    }
}

pub struct ActionParser {
    matchers: Vec<Matcher>,
}

impl Default for ActionParser {
    fn default() -> Self {
        Self::new(default_matchers())
    }
}

impl ActionParser {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self { matchers }
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// Extract every action in `text`. Duplicates are kept.
    pub fn parse(&self, text: &str) -> Vec<Action> {
        let actions: Vec<Action> = self.matchers.iter().flat_map(|m| m.apply(text)).collect();
        if !actions.is_empty() {
            tracing::debug!(count = actions.len(), "parsed actions from reply");
        }
        actions
    }
}

/// Drop repeated actions, keeping the first occurrence of each.
pub fn dedup_actions(actions: Vec<Action>) -> Vec<Action> {
    let mut unique: Vec<Action> = Vec::with_capacity(actions.len());
    for action in actions {
        if !unique.contains(&action) {
            unique.push(action);
        }
    }
    unique
}

const FILLER_SUFFIXES: &[&str] = &["for you", "for me", "please", "now"];
const ELEMENT_NOUNS: &[&str] = &["button", "link", "field", "box", "input", "bar", "icon"];
/// Words that end a click target and start the rest of the sentence.
const CONNECTIVES: &[&str] = &["to", "and", "then", "so"];

fn group<'t>(caps: &Captures<'t>, i: usize) -> Result<&'t str, ExtractError> {
    caps.get(i)
        .map(|m| m.as_str())
        .ok_or(ExtractError::MissingGroup(i))
}

fn strip_suffix_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let lower = text.to_ascii_lowercase();
    if lower == word {
        return None;
    }
    lower
        .strip_suffix(word)
        .filter(|rest| rest.ends_with(' '))
        .map(|rest| text[..rest.len()].trim_end())
}

fn strip_leading_article(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("the ") && text.len() > 4 {
        text[4..].trim_start()
    } else {
        text
    }
}

fn strip_filler(raw: &str) -> &str {
    let mut text = raw.trim().trim_end_matches('.');
    loop {
        let before = text;
        for suffix in FILLER_SUFFIXES {
            if let Some(rest) = strip_suffix_word(text, suffix) {
                text = rest;
            }
        }
        if before == text {
            return text;
        }
    }
}

/// Cut a click target at its element noun, or before a connective.
///
/// "login button to sign you in" becomes "login button".
fn target_span(raw: &str) -> &str {
    let mut start = 0;
    for word in raw.split(' ') {
        let lower = word.to_ascii_lowercase();
        if ELEMENT_NOUNS.contains(&lower.as_str()) {
            return &raw[..start + word.len()];
        }
        if CONNECTIVES.contains(&lower.as_str()) {
            return &raw[..start];
        }
        start += word.len() + 1;
    }
    raw
}

/// Trim a captured phrase down to what the user actually referred to.
fn clean_phrase(raw: &str, strip_nouns: bool) -> String {
    let mut text = strip_filler(raw);
    if strip_nouns {
        for noun in ELEMENT_NOUNS {
            if let Some(rest) = strip_suffix_word(text, noun) {
                text = rest;
                break;
            }
        }
    }
    strip_leading_article(text).trim().to_string()
}

fn non_empty(text: String, what: &'static str) -> Result<String, ExtractError> {
    if text.is_empty() {
        Err(ExtractError::Empty(what))
    } else {
        Ok(text)
    }
}

fn extract_click(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    let target = non_empty(clean_phrase(target_span(group(caps, 1)?), true), "click target")?;
    Ok(Action::click(target))
}

fn extract_type_as(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    let field = non_empty(clean_phrase(group(caps, 1)?, true), "field")?;
    let value = strip_filler(group(caps, 2)?).to_string();
    Ok(Action::fill(field, non_empty(value, "value")?))
}

fn extract_type_into(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    let value = non_empty(group(caps, 1)?.trim().to_string(), "value")?;
    let field = non_empty(clean_phrase(group(caps, 2)?, true), "field")?;
    Ok(Action::fill(field, value))
}

fn extract_scroll(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    let direction = if group(caps, 1)?.eq_ignore_ascii_case("up") {
        ScrollDirection::Up
    } else {
        ScrollDirection::Down
    };
    Ok(Action::scroll(direction))
}

fn extract_history(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::navigate(group(caps, 1)?.to_ascii_lowercase()))
}

fn extract_reload(_: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::navigate("refresh"))
}

fn extract_new_tab(_: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::navigate("new_tab"))
}

fn extract_close_tab(_: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::navigate("close_tab"))
}

/// Whether `phrase` reads "search [on] <engine> <query>", the engine-qualified shape.
fn names_engine(phrase: &str) -> bool {
    let mut words = phrase.split_whitespace().skip(1).peekable();
    if words.peek().is_some_and(|w| w.eq_ignore_ascii_case("on")) {
        words.next();
    }
    words.next().is_some_and(|w| SearchEngine::from_name(w).is_some()) && words.next().is_some()
}

fn extract_search(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    // "search on youtube for ..." belongs to the engine-qualified matcher,
    // "search for youtube tutorials" does not
    if names_engine(group(caps, 0)?) {
        return Err(ExtractError::Rejected("engine-qualified search"));
    }
    let query = non_empty(clean_phrase(group(caps, 1)?, false), "query")?;
    Ok(Action::search(query, SearchEngine::Google))
}

fn extract_engine_search(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    let engine =
        SearchEngine::from_name(group(caps, 1)?).ok_or(ExtractError::Rejected("unknown engine"))?;
    let query = non_empty(clean_phrase(group(caps, 2)?, false), "query")?;
    Ok(Action::search(query, engine))
}

fn extract_site(caps: &Captures<'_>) -> Result<Action, ExtractError> {
    let site = group(caps, 1)?.trim_end_matches('.');
    let url = if site.starts_with("http://") || site.starts_with("https://") {
        site.to_string()
    } else {
        format!("https://{site}")
    };
    Ok(Action::Navigation {
        url,
        target: LinkTarget::Blank,
    })
}

fn extract_clear_history(_: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::system(SystemCommand::ClearHistory))
}

fn extract_export(_: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::system(SystemCommand::ExportConversation))
}

fn extract_settings(_: &Captures<'_>) -> Result<Action, ExtractError> {
    Ok(Action::system(SystemCommand::OpenSettings))
}

/// The built-in grammar, in evaluation order.
pub fn default_matchers() -> Vec<Matcher> {
    vec![
        Matcher::new(
            "click",
            r"\bclick\s+(?:on\s+)?(?:the\s+)?([a-z0-9][a-z0-9 ]*)",
            extract_click,
        ),
        Matcher::new(
            "type_as",
            r"\btype\s+(?:in\s+)?(?:the\s+)?([a-z0-9][a-z0-9 ]*?)\s+as\s+([a-z0-9@._+\-]+(?: [a-z0-9@._+\-]+)*)",
            extract_type_as,
        ),
        Matcher::new(
            "type_into",
            r#"\btype\s+"([^"]+)"\s+in(?:to)?\s+(?:the\s+)?([a-z0-9][a-z0-9 ]*)"#,
            extract_type_into,
        ),
        Matcher::new("scroll", r"\bscroll\s+(up|down)\b", extract_scroll),
        Matcher::new("go_history", r"\bgo\s+(back|forward)\b", extract_history),
        Matcher::new(
            "reload",
            r"\b(?:refresh|reload)\s+(?:the\s+)?page\b",
            extract_reload,
        ),
        Matcher::new("new_tab", r"\bopen\s+(?:a\s+)?new\s+tab\b", extract_new_tab),
        Matcher::new(
            "close_tab",
            r"\bclose\s+(?:this\s+|the\s+)?tab\b",
            extract_close_tab,
        ),
        Matcher::new(
            "search",
            r"\bsearch\s+(?:for\s+)?([a-z0-9][a-z0-9 ]*)",
            extract_search,
        ),
        Matcher::new(
            "engine_search",
            r"\b(?:search|find)\s+(?:on\s+)?(google|bing|youtube|wikipedia)\s+(?:for\s+)?([a-z0-9][a-z0-9 ]*)",
            extract_engine_search,
        ),
        Matcher::new(
            "open_site",
            r"\bopen\s+(?:the\s+)?(?:website\s+)?([a-z0-9.-]+\.[a-z]{2,})\b",
            extract_site,
        ),
        Matcher::new(
            "visit_site",
            r"\b(?:go\s+to|navigate\s+to|visit)\s+(?:the\s+)?(?:website\s+)?((?:https?://)?[a-z0-9.-]+\.[a-z]{2,}(?:/[^\s]*)?)",
            extract_site,
        ),
        Matcher::new(
            "clear_history",
            r"\bclear\s+(?:the\s+)?(?:conversation\s+|chat\s+)?history\b",
            extract_clear_history,
        ),
        Matcher::new(
            "export",
            r"\bexport\s+(?:the\s+|this\s+)?(?:conversation|chat)\b",
            extract_export,
        ),
        Matcher::new(
            "settings",
            r"\bopen\s+(?:the\s+)?settings\b",
            extract_settings,
        ),
    ]
}

/// Shared parser over the built-in grammar.
pub static DEFAULT_PARSER: LazyLock<ActionParser> = LazyLock::new(ActionParser::default);
