//! Prompting and response shaping for chat, summarize and translate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::{CompletionRequest, CompletionService};
use crate::error::Result;
use crate::parser::DEFAULT_PARSER;
use crate::types::{Action, ChatMessage, Context, Role};

pub const NO_REPLY: &str = "Sorry, I could not process your request.";
pub const NO_SUMMARY: &str = "Summary could not be generated.";
pub const NO_TRANSLATION: &str = "Translation could not be generated.";
pub const AUTO_DETECTED: &str = "auto-detected";

const CHAT_PROMPT: &str = r#"You are HeyWeb!, a voice-first assistant. People talk to you to get things done on the web page in front of them and to get answers through plain conversation.

You can:
1. Drive the current page: click things, fill in form fields, scroll, go back, forward or refresh
2. Search Google, Bing, YouTube or Wikipedia
3. Answer questions, explain things and make recommendations
4. Manage the assistant itself: clear the history, export the conversation, open the settings

Reply in a short, natural sentence that says what you are going to do. Say it with these exact phrasings so it can be carried out:
- "I'll click the <name> button"
- "I'll type <field> as <value>"
- "Scroll down" or "scroll up"
- "Go back", "go forward" or "refresh the page"
- "I'll search for <query>" or "search YouTube for <query>"
- "Open <domain>"
- "Clear the conversation history", "export the conversation" or "open the settings"

Examples:
User: "Show me the latest news about AI"
Assistant: "I'll search for latest artificial intelligence news."

User: "Click the login button"
Assistant: "I'll click the login button for you."

User: "What's the weather like today?"
Assistant: "I'll search for current weather today."

Stay conversational. Always answer in words, and only describe actions you actually want carried out."#;

/// The chat reply returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub assistant: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Word budget for the summary
    pub max_length: u32,
    pub include_key_points: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_length: 300,
            include_key_points: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary: String,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
}

/// System prompt for a chat turn, extended with what we know about the page.
pub fn chat_prompt(context: Option<&Context>) -> String {
    let mut prompt = CHAT_PROMPT.to_string();
    let Some(context) = context else {
        return prompt;
    };
    if context.web_automation_enabled {
        if let Some(tab) = &context.active_tab {
            let url = tab.url.as_deref().unwrap_or("Unknown");
            prompt.push_str(&format!(
                "\nCurrent web page: {url}\nWeb automation is active on this page."
            ));
        }
    }
    if let Some(time) = context.current_time {
        prompt.push_str(&format!(
            "\nCurrent time: {}",
            time.format("%A, %B %-d, %Y %H:%M UTC")
        ));
    }
    prompt
}

fn summary_prompt(options: SummaryOptions) -> String {
    let key_points = if options.include_key_points {
        "4. Pull out 3-5 key points covering the most important information\n"
    } else {
        ""
    };
    format!(
        r#"You are an expert summarizer. Write a concise, accurate summary of the text you are given.

Requirements:
1. The summary is clear and coherent and captures the main ideas
2. It stays within {} words
3. It keeps the original meaning and tone
{key_points}
Answer with JSON only:
{{
  "summary": "the summary",
  "keyPoints": ["first point", "second point", "third point"]
}}"#,
        options.max_length
    )
}

fn translate_prompt(source: Option<&str>, target: &str) -> String {
    let source_line = match source {
        Some(source) => format!("Source language: {source}"),
        None => "Detect the source language".to_string(),
    };
    format!(
        r#"You are an expert translator. Translate the text you are given into {target}.

Requirements:
1. The translation is accurate and reads naturally
2. It keeps the original meaning and tone
3. It keeps formatting and structure
4. Answer with the translated text only, no notes or explanations

{source_line}
Target language: {target}"#
    )
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Read the summarizer's answer: JSON when it sent JSON, otherwise raw text.
pub fn parse_summary(content: &str) -> Summary {
    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(Value::Object(fields)) => Summary {
            summary: fields
                .get("summary")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(NO_SUMMARY)
                .to_string(),
            key_points: fields
                .get("keyPoints")
                .and_then(Value::as_array)
                .map(|points| {
                    points
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        },
        _ => Summary {
            summary: content.to_string(),
            key_points: Vec::new(),
        },
    }
}

fn system(content: String) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content,
    }
}

fn user(content: String) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content,
    }
}

/// Talks to the completion service on behalf of clients.
#[derive(Clone)]
pub struct Assistant {
    completion: Arc<dyn CompletionService>,
}

impl Assistant {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// One chat round-trip. Actions are read from the reply text.
    pub async fn chat(&self, messages: Vec<ChatMessage>, context: Option<&Context>) -> Result<ChatReply> {
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(system(chat_prompt(context)));
        conversation.extend(messages);

        let completion = self
            .completion
            .complete(CompletionRequest::new(conversation, 0.7, 1000))
            .await?;
        let assistant = completion
            .content
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NO_REPLY.to_string());
        let actions = DEFAULT_PARSER.parse(&assistant);
        tracing::debug!(actions = actions.len(), "chat reply parsed");

        Ok(ChatReply {
            assistant,
            actions,
            raw: completion.raw,
        })
    }

    pub async fn summarize(&self, text: &str, options: SummaryOptions) -> Result<Summary> {
        let completion = self
            .completion
            .complete(CompletionRequest::new(
                vec![
                    system(summary_prompt(options)),
                    user(format!("Summarize this text:\n\n{text}")),
                ],
                0.3,
                800,
            ))
            .await?;
        Ok(parse_summary(completion.content.as_deref().unwrap_or_default()))
    }

    pub async fn translate(&self, text: &str, source: Option<&str>, target: &str) -> Result<Translation> {
        let completion = self
            .completion
            .complete(CompletionRequest::new(
                vec![
                    system(translate_prompt(source, target)),
                    user(format!("Translate this text:\n\n{text}")),
                ],
                0.3,
                1000,
            ))
            .await?;
        let translated_text = completion
            .content
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NO_TRANSLATION.to_string())
            .trim()
            .to_string();
        Ok(Translation {
            translated_text,
            source_language: source.unwrap_or(AUTO_DETECTED).to_string(),
            target_language: target.to_string(),
        })
    }
}
