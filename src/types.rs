use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A message in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A message as the completion service expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// The tab the assistant is currently attached to.
///
/// `id` is whatever handle the host browser uses; it is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveTab {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Per-request context sent alongside the conversation window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tab: Option<ActiveTab>,
    #[serde(default)]
    pub web_automation_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebCommand {
    Click,
    Type,
    Scroll,
    Navigate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// Vertical offset in pixels for one scroll step.
    pub fn offset(self) -> i64 {
        match self {
            Self::Up => -SCROLL_STEP_PX,
            Self::Down => SCROLL_STEP_PX,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    Google,
    Bing,
    Youtube,
    Wikipedia,
}

impl SearchEngine {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "google" => Some(Self::Google),
            "bing" => Some(Self::Bing),
            "youtube" => Some(Self::Youtube),
            "wikipedia" => Some(Self::Wikipedia),
            _ => None,
        }
    }

    /// Results page for `query` on this engine.
    pub fn search_url(self, query: &str) -> String {
        let q = urlencoding::encode(query);
        match self {
            Self::Google => format!("https://www.google.com/search?q={q}"),
            Self::Bing => format!("https://www.bing.com/search?q={q}"),
            Self::Youtube => format!("https://www.youtube.com/results?search_query={q}"),
            Self::Wikipedia => format!("https://en.wikipedia.org/wiki/{q}"),
        }
    }
}

/// Where a navigation opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkTarget {
    #[default]
    #[serde(rename = "_blank")]
    Blank,
    #[serde(rename = "_self")]
    SameTab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemCommand {
    ClearHistory,
    ExportConversation,
    OpenSettings,
}

/// Tab-level moves behind the `navigate` web command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStep {
    Back,
    Forward,
    Refresh,
    NewTab,
    CloseTab,
}

impl HistoryStep {
    pub fn from_target(target: &str) -> Option<Self> {
        match target.trim().to_ascii_lowercase().as_str() {
            "back" => Some(Self::Back),
            "forward" => Some(Self::Forward),
            "refresh" | "reload" => Some(Self::Refresh),
            "new_tab" => Some(Self::NewTab),
            "close_tab" => Some(Self::CloseTab),
            _ => None,
        }
    }
}

/// A structured instruction derived from assistant text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    WebAutomation {
        command: WebCommand,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<ScrollDirection>,
    },
    Search {
        query: String,
        #[serde(default)]
        engine: SearchEngine,
    },
    Navigation {
        url: String,
        #[serde(default)]
        target: LinkTarget,
    },
    System {
        command: SystemCommand,
    },
}

impl Action {
    pub fn click(target: impl Into<String>) -> Self {
        Self::WebAutomation {
            command: WebCommand::Click,
            target: Some(target.into()),
            value: None,
            direction: None,
        }
    }

    pub fn fill(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::WebAutomation {
            command: WebCommand::Type,
            target: Some(field.into()),
            value: Some(value.into()),
            direction: None,
        }
    }

    pub fn scroll(direction: ScrollDirection) -> Self {
        Self::WebAutomation {
            command: WebCommand::Scroll,
            target: None,
            value: None,
            direction: Some(direction),
        }
    }

    pub fn navigate(target: impl Into<String>) -> Self {
        Self::WebAutomation {
            command: WebCommand::Navigate,
            target: Some(target.into()),
            value: None,
            direction: None,
        }
    }

    pub fn search(query: impl Into<String>, engine: SearchEngine) -> Self {
        Self::Search {
            query: query.into(),
            engine,
        }
    }

    pub fn open(url: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            target: LinkTarget::Blank,
        }
    }

    pub fn system(command: SystemCommand) -> Self {
        Self::System { command }
    }

    /// The wire tag of this variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WebAutomation { .. } => "web_automation",
            Self::Search { .. } => "search",
            Self::Navigation { .. } => "navigation",
            Self::System { .. } => "system",
        }
    }
}

pub const CONTEXT_WINDOW: usize = 10;
pub const SCROLL_STEP_PX: i64 = 300;
pub const MAX_FOUND_ELEMENTS: usize = 10;
pub const TEXT_SNIPPET_CHARS: usize = 50;
pub const MARKUP_SNIPPET_CHARS: usize = 100;

pub const FALLBACK_REPLY: &str = "I encountered an error processing your request. Please try again.";
pub const FALLBACK_SPEECH: &str = "I encountered an error. Please try again.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_format() {
        let json = serde_json::to_value(Action::click("login")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "web_automation", "command": "click", "target": "login"})
        );
    }

    #[test]
    fn test_search_engine_defaults_to_google() {
        let action: Action =
            serde_json::from_value(serde_json::json!({"type": "search", "query": "rust"})).unwrap();
        assert_eq!(action, Action::search("rust", SearchEngine::Google));
    }

    #[test]
    fn test_navigation_target_names() {
        let action: Action = serde_json::from_value(
            serde_json::json!({"type": "navigation", "url": "https://a.io", "target": "_self"}),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::Navigation {
                url: "https://a.io".into(),
                target: LinkTarget::SameTab
            }
        );
    }

    #[test]
    fn test_search_urls_are_encoded() {
        assert_eq!(
            SearchEngine::Youtube.search_url("cat videos"),
            "https://www.youtube.com/results?search_query=cat%20videos"
        );
        assert_eq!(
            SearchEngine::Wikipedia.search_url("Rust"),
            "https://en.wikipedia.org/wiki/Rust"
        );
    }

    #[test]
    fn test_context_accepts_browser_tab_shape() {
        let ctx: Context = serde_json::from_value(serde_json::json!({
            "activeTab": {"id": 42, "url": "https://example.com", "windowId": 3},
            "webAutomationEnabled": true,
            "currentTime": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let tab = ctx.active_tab.unwrap();
        assert_eq!(tab.id, Some(serde_json::json!(42)));
        assert!(ctx.web_automation_enabled);
        assert!(ctx.user_agent.is_none());
    }

    #[test]
    fn test_message_timestamp_is_optional_on_the_wire() {
        let msg: Message =
            serde_json::from_value(serde_json::json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(msg.role, Role::User);
    }
}
