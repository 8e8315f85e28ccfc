//! Conversation history for one assistant session.
//!
//! History is append-only apart from an explicit clear, and is written to
//! a JSON file so it survives restarts.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::dispatcher::SystemHandler;
use crate::error::Result;
use crate::orchestrator::AssistantEvent;
use crate::types::{Message, SystemCommand};

pub const SESSION_FILE: &str = "session.json";
pub const EXPORT_FILE: &str = "heyweb-conversation.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    messages: Vec<Message>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Export<'a> {
    session_id: Uuid,
    exported_at: DateTime<Utc>,
    messages: &'a [Message],
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session that is never written to disk.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            path: None,
        }
    }

    /// Load the session stored at `path`, or start a new one there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no stored session, starting fresh");
            return Ok(Self {
                path: Some(path),
                ..Self::new()
            });
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut session: Session = serde_json::from_reader(reader)?;
        tracing::info!(
            path = %path.display(),
            messages = session.messages.len(),
            "loaded session"
        );
        session.path = Some(path);
        Ok(session)
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The last `size` messages, oldest first.
    pub fn context_window(&self, size: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(size);
        &self.messages[start..]
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Serialize the session for writing once the lock is released.
    ///
    /// In-memory sessions have nothing to write.
    pub fn snapshot(&self) -> Result<Option<PendingWrite>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        Ok(Some(PendingWrite {
            path: path.clone(),
            contents: serde_json::to_vec_pretty(self)?,
        }))
    }

    /// The conversation as pretty JSON, to be written into `dir`.
    pub fn export(&self, dir: &Path) -> Result<PendingWrite> {
        let contents = serde_json::to_vec_pretty(&Export {
            session_id: self.id,
            exported_at: Utc::now(),
            messages: &self.messages,
        })?;
        Ok(PendingWrite {
            path: dir.join(EXPORT_FILE),
            contents,
        })
    }
}

/// Serialized session data and the file it belongs in.
#[derive(Debug)]
pub struct PendingWrite {
    path: PathBuf,
    contents: Vec<u8>,
}

impl PendingWrite {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the file, creating parent directories, and return its path.
    pub async fn write(self) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, &self.contents).await?;
        Ok(self.path)
    }
}

/// Carries out `system` actions against a session.
pub struct SessionControl {
    session: SharedSession,
    export_dir: PathBuf,
    events: Option<broadcast::Sender<AssistantEvent>>,
}

impl SessionControl {
    pub fn new(session: SharedSession, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            export_dir: export_dir.into(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AssistantEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: AssistantEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl SystemHandler for SessionControl {
    async fn handle(&self, command: SystemCommand) -> Result<()> {
        match command {
            SystemCommand::ClearHistory => {
                let (id, pending) = {
                    let mut session = self.session.lock().await;
                    session.clear();
                    (session.id, session.snapshot()?)
                };
                if let Some(pending) = pending {
                    pending.write().await?;
                }
                tracing::info!(session = %id, "history cleared");
                self.emit(AssistantEvent::HistoryCleared);
            }
            SystemCommand::ExportConversation => {
                let pending = self.session.lock().await.export(&self.export_dir)?;
                let path = pending.write().await?;
                tracing::info!(path = %path.display(), "conversation exported");
                self.emit(AssistantEvent::Exported {
                    path: path.display().to_string(),
                });
            }
            SystemCommand::OpenSettings => self.emit(AssistantEvent::OpenSettings),
        }
        Ok(())
    }
}
