//! Runs conversation turns: history, one assistant round-trip, dispatch and speech.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::AssistantBackend;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{Error, Result};
use crate::parser::dedup_actions;
use crate::phase::{Phase, Trigger};
use crate::recognition::RecognitionError;
use crate::session::SharedSession;
use crate::speech::Speaker;
use crate::types::{
    ActiveTab, CONTEXT_WINDOW, ChatMessage, Context, FALLBACK_REPLY, FALLBACK_SPEECH, Message,
};

/// Things observers of a session may want to show.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    Phase { phase: Phase },
    Message { message: Message },
    Actions { report: DispatchReport },
    Notification { text: String },
    OpenSettings,
    HistoryCleared,
    Exported { path: String },
}

/// How a call into the orchestrator ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Replied {
        reply: String,
        report: DispatchReport,
    },
    /// The assistant could not be reached; the fallback reply was used
    Fallback,
    /// Another turn is still being processed
    Busy,
    /// Nothing to do (empty input)
    Ignored,
}

/// Builds the per-request [`Context`].
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    automation_enabled: bool,
    user_agent: Option<String>,
}

impl ContextBuilder {
    pub fn new(automation_enabled: bool) -> Self {
        Self {
            automation_enabled,
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Automation is only reported as enabled when there is a tab to automate.
    pub fn build(&self, active_tab: Option<ActiveTab>) -> Context {
        Context {
            web_automation_enabled: self.automation_enabled && active_tab.is_some(),
            active_tab,
            current_time: Some(Utc::now()),
            user_agent: self.user_agent.clone(),
        }
    }
}

pub struct Orchestrator {
    session: SharedSession,
    backend: Arc<dyn AssistantBackend>,
    dispatcher: Dispatcher,
    speaker: Arc<Speaker>,
    context: ContextBuilder,
    phase: Mutex<Phase>,
    events: Option<broadcast::Sender<AssistantEvent>>,
}

/// Returns the session to idle however the turn ends.
struct TurnGuard<'a>(&'a Orchestrator);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock_phase() = Phase::Idle;
        self.0.emit(AssistantEvent::Phase { phase: Phase::Idle });
    }
}

impl Orchestrator {
    pub fn new(
        session: SharedSession,
        backend: Arc<dyn AssistantBackend>,
        dispatcher: Dispatcher,
        speaker: Arc<Speaker>,
        context: ContextBuilder,
    ) -> Self {
        Self {
            session,
            backend,
            dispatcher,
            speaker,
            context,
            phase: Mutex::new(Phase::Idle),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AssistantEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn speaker(&self) -> &Arc<Speaker> {
        &self.speaker
    }

    pub fn phase(&self) -> Phase {
        *self.lock_phase()
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AssistantEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn transition(&self, trigger: Trigger) -> Result<Phase> {
        let next = {
            let mut phase = self.lock_phase();
            let next = phase.on(trigger)?;
            *phase = next;
            next
        };
        tracing::debug!(?trigger, phase = ?next, "phase changed");
        self.emit(AssistantEvent::Phase { phase: next });
        Ok(next)
    }

    /// Speech capture started. Stops any reply still being spoken.
    pub fn begin_listening(&self) -> Result<()> {
        self.transition(Trigger::StartListening)?;
        self.speaker.cancel();
        Ok(())
    }

    pub fn cancel_listening(&self) -> Result<()> {
        self.transition(Trigger::StopListening).map(|_| ())
    }

    /// Speech capture failed. Returns the text shown to the user, if any.
    pub fn recognition_failed(&self, error: RecognitionError) -> Option<String> {
        if self.phase() == Phase::Listening {
            if let Err(e) = self.transition(Trigger::StopListening) {
                tracing::debug!(error = %e, "recognition failure after capture ended");
            }
        }
        let notification = error.notification();
        match &notification {
            Some(text) => {
                tracing::warn!(?error, "speech recognition failed");
                self.emit(AssistantEvent::Notification { text: text.clone() });
            }
            None => tracing::debug!(?error, "speech recognition ended without speech"),
        }
        notification
    }

    /// A final transcript arrived from speech capture.
    pub async fn handle_transcript(&self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            if self.phase() == Phase::Listening {
                self.cancel_listening()?;
            }
            return Ok(TurnOutcome::Ignored);
        }
        self.start_turn(Trigger::Transcript, text).await
    }

    /// A typed message was submitted.
    pub async fn handle_user_utterance(&self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        self.start_turn(Trigger::Submit, text).await
    }

    async fn start_turn(&self, trigger: Trigger, text: &str) -> Result<TurnOutcome> {
        match self.transition(trigger) {
            Ok(_) => Ok(self.run_turn(text.trim()).await),
            Err(Error::Busy) => {
                tracing::info!("turn rejected, another is in progress");
                Ok(TurnOutcome::Busy)
            }
            Err(e) => Err(e),
        }
    }

    async fn record(&self, message: Message) {
        let pending = {
            let mut session = self.session.lock().await;
            session.push(message.clone());
            session.snapshot()
        };
        let saved = match pending {
            Ok(Some(pending)) => pending.write().await.map(drop),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            tracing::warn!(error = %e, "failed to save session");
        }
        self.emit(AssistantEvent::Message { message });
    }

    async fn run_turn(&self, text: &str) -> TurnOutcome {
        let _guard = TurnGuard(self);

        self.record(Message::user(text)).await;
        let window: Vec<ChatMessage> = self
            .session
            .lock()
            .await
            .context_window(CONTEXT_WINDOW)
            .iter()
            .map(ChatMessage::from)
            .collect();

        let active_tab = self.dispatcher.navigator().active_tab().await;
        let context = self.context.build(active_tab);

        match self.backend.chat(window, &context).await {
            Ok(reply) => {
                self.record(Message::assistant(reply.assistant.as_str())).await;
                let actions = dedup_actions(reply.actions);
                let report = self.dispatcher.dispatch(&actions, &context).await;
                tracing::info!(
                    executed = report.executed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "turn complete"
                );
                self.emit(AssistantEvent::Actions { report });
                self.speaker.speak(reply.assistant.as_str());
                TurnOutcome::Replied {
                    reply: reply.assistant,
                    report,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "assistant request failed");
                self.record(Message::assistant(FALLBACK_REPLY)).await;
                self.speaker.speak(FALLBACK_SPEECH);
                TurnOutcome::Fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::assistant::ChatReply;
    use crate::dispatcher::{Navigator, SystemHandler};
    use crate::executor::{DomEvent, LocalPage, MemoryDocument};
    use crate::session::Session;
    use crate::speech::{SpeechEngine, VoiceSettings};
    use crate::types::{Action, HistoryStep, LinkTarget, Role, SystemCommand};

    const PAGE: &str = r#"<html><body><button id="login">Login</button></body></html>"#;

    struct Scripted {
        replies: Mutex<VecDeque<Result<ChatReply>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        gate: Option<Arc<Notify>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ChatReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl AssistantBackend for Scripted {
        async fn chat(&self, messages: Vec<ChatMessage>, _: &Context) -> Result<ChatReply> {
            self.seen.lock().unwrap().push(messages);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::MalformedResponse("script exhausted".into())))
        }
    }

    fn reply(text: &str, actions: Vec<Action>) -> Result<ChatReply> {
        Ok(ChatReply {
            assistant: text.into(),
            actions,
            raw: serde_json::Value::Null,
        })
    }

    struct Tab;

    #[async_trait]
    impl Navigator for Tab {
        async fn open(&self, _: &str, _: LinkTarget) -> Result<()> {
            Ok(())
        }

        async fn history(&self, _: HistoryStep) -> Result<()> {
            Ok(())
        }

        async fn active_tab(&self) -> Option<ActiveTab> {
            Some(ActiveTab {
                url: Some("https://app.test/".into()),
                ..ActiveTab::default()
            })
        }
    }

    struct NoSystem;

    #[async_trait]
    impl SystemHandler for NoSystem {
        async fn handle(&self, _: SystemCommand) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Heard(Mutex<Vec<String>>);

    #[async_trait]
    impl SpeechEngine for Heard {
        async fn say(&self, text: &str, _: &VoiceSettings) -> Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        page: Arc<LocalPage<MemoryDocument>>,
        backend: Arc<Scripted>,
        heard: Arc<Heard>,
    }

    fn harness(backend: Scripted) -> Harness {
        harness_with(backend, Session::new())
    }

    fn harness_with(backend: Scripted, session: Session) -> Harness {
        let page = Arc::new(LocalPage::new(MemoryDocument::parse(PAGE)));
        let backend = Arc::new(backend);
        let heard = Arc::new(Heard::default());
        let dispatcher = Dispatcher::new(page.clone(), Arc::new(Tab), Arc::new(NoSystem));
        let orchestrator = Orchestrator::new(
            session.into_shared(),
            backend.clone(),
            dispatcher,
            Arc::new(Speaker::new(heard.clone())),
            ContextBuilder::new(true),
        );
        Harness {
            orchestrator: Arc::new(orchestrator),
            page,
            backend,
            heard,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_turn_dispatches_deduplicated_actions_and_speaks() {
        let h = harness(Scripted::new(vec![reply(
            "I'll click the login button.",
            vec![Action::click("login"), Action::click("login")],
        )]));

        let outcome = h.orchestrator.handle_user_utterance("log me in").await.unwrap();
        let TurnOutcome::Replied { report, .. } = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert_eq!(report.executed, 1);

        let clicks = h
            .page
            .automation()
            .document()
            .events()
            .into_iter()
            .filter(|e| e.event == DomEvent::Click)
            .count();
        assert_eq!(clicks, 1);

        let session = h.orchestrator.session().lock().await;
        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant]);
        drop(session);

        settle().await;
        assert_eq!(*h.heard.0.lock().unwrap(), ["I'll click the login button."]);
        assert_eq!(h.orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_turn_is_saved_to_the_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let h = harness_with(
            Scripted::new(vec![reply("Hello there.", Vec::new())]),
            Session::open(&path).unwrap(),
        );

        h.orchestrator.handle_user_utterance("hi").await.unwrap();

        let reopened = Session::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.messages()[1].content, "Hello there.");
        // the session lock is free once the turn is done
        assert!(h.orchestrator.session().try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back() {
        let h = harness(Scripted::new(vec![Err(Error::Upstream {
            status: 502,
            message: "bad gateway".into(),
        })]));

        let outcome = h.orchestrator.handle_user_utterance("hello").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Fallback);
        let session = h.orchestrator.session().lock().await;
        assert_eq!(session.messages().last().unwrap().content, FALLBACK_REPLY);
        drop(session);

        settle().await;
        assert_eq!(*h.heard.0.lock().unwrap(), [FALLBACK_SPEECH]);
        assert_eq!(h.orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_second_utterance_while_processing_is_busy() {
        let gate = Arc::new(Notify::new());
        let mut backend = Scripted::new(vec![reply("Done.", Vec::new())]);
        backend.gate = Some(gate.clone());
        let h = harness(backend);

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.handle_user_utterance("first").await })
        };
        while h.orchestrator.phase() != Phase::Processing {
            tokio::task::yield_now().await;
        }

        let second = h.orchestrator.handle_user_utterance("second").await.unwrap();
        assert_eq!(second, TurnOutcome::Busy);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, TurnOutcome::Replied { .. }));

        let session = h.orchestrator.session().lock().await;
        assert!(session.messages().iter().all(|m| m.content != "second"));
        assert_eq!(session.len(), 2);
    }

    #[tokio::test]
    async fn test_only_last_ten_messages_are_sent() {
        let h = harness(Scripted::new(vec![reply("ok", Vec::new())]));
        {
            let mut session = h.orchestrator.session().lock().await;
            for i in 0..30 {
                session.push(Message::user(format!("old {i}")));
            }
        }
        h.orchestrator.handle_user_utterance("newest").await.unwrap();

        let seen = h.backend.seen.lock().unwrap();
        assert_eq!(seen[0].len(), CONTEXT_WINDOW);
        assert_eq!(seen[0].last().unwrap().content, "newest");
        assert_eq!(seen[0][0].content, "old 21");
    }

    #[tokio::test]
    async fn test_voice_path_and_recognition_errors() {
        let h = harness(Scripted::new(vec![reply("Hello!", Vec::new())]));

        h.orchestrator.begin_listening().unwrap();
        assert_eq!(h.orchestrator.phase(), Phase::Listening);
        let outcome = h.orchestrator.handle_transcript("hi there").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Replied { .. }));
        assert_eq!(h.orchestrator.phase(), Phase::Idle);

        h.orchestrator.begin_listening().unwrap();
        let note = h.orchestrator.recognition_failed(RecognitionError::Network);
        assert!(note.unwrap().contains("internet connection"));
        assert_eq!(h.orchestrator.phase(), Phase::Idle);

        h.orchestrator.begin_listening().unwrap();
        assert!(h.orchestrator.recognition_failed(RecognitionError::NoSpeech).is_none());
        assert_eq!(h.orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_empty_input_is_ignored() {
        let h = harness(Scripted::new(Vec::new()));
        assert_eq!(
            h.orchestrator.handle_user_utterance("   ").await.unwrap(),
            TurnOutcome::Ignored
        );
        h.orchestrator.begin_listening().unwrap();
        assert_eq!(
            h.orchestrator.handle_transcript("").await.unwrap(),
            TurnOutcome::Ignored
        );
        assert_eq!(h.orchestrator.phase(), Phase::Idle);
        assert!(h.orchestrator.session().lock().await.is_empty());
        assert!(h.backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_follow_the_turn() {
        let (tx, mut rx) = broadcast::channel(32);
        let h = harness(Scripted::new(vec![reply("Sure.", Vec::new())]));
        let orchestrator = Arc::try_unwrap(h.orchestrator)
            .ok()
            .unwrap()
            .with_events(tx);
        orchestrator.handle_user_utterance("hi").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, ["phase", "message", "message", "actions", "phase"]);
    }

    #[test]
    fn test_context_requires_a_tab_for_automation() {
        let builder = ContextBuilder::new(true).with_user_agent("heyweb-test");
        assert!(!builder.build(None).web_automation_enabled);
        let context = builder.build(Some(ActiveTab::default()));
        assert!(context.web_automation_enabled);
        assert_eq!(context.user_agent.as_deref(), Some("heyweb-test"));
        assert!(!ContextBuilder::new(false).build(Some(ActiveTab::default())).web_automation_enabled);
    }
}
