//! Routes actions to whatever carries them out.
//!
//! Dispatch is best-effort: actions are submitted in order, and a failing
//! action is logged and counted without stopping the rest of the queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::executor::{PageRequest, PageResponse};
use crate::types::{
    Action, ActiveTab, Context, HistoryStep, LinkTarget, ScrollDirection, SystemCommand, WebCommand,
};

/// Delivers requests to the page the assistant controls.
#[async_trait]
pub trait PageChannel: Send + Sync {
    async fn send(&self, request: PageRequest) -> Result<PageResponse>;
}

/// Tab and window level browser control.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn open(&self, url: &str, target: LinkTarget) -> Result<()>;

    async fn history(&self, step: HistoryStep) -> Result<()>;

    /// The tab automation currently targets, if any.
    async fn active_tab(&self) -> Option<ActiveTab> {
        None
    }
}

/// Assistant-level commands (history, export, settings).
#[async_trait]
pub trait SystemHandler: Send + Sync {
    async fn handle(&self, command: SystemCommand) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum Step {
    Done,
    Skipped,
}

/// Decode wire actions, dropping any variant we do not recognize.
pub fn decode_actions(values: &[Value]) -> Vec<Action> {
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<Action>(value.clone()) {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!(action = %value, error = %e, "dropping unrecognized action");
                None
            }
        })
        .collect()
}

fn require<'a>(field: &'a Option<String>, what: &str) -> Result<&'a str> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Action(format!("missing {what}")))
}

pub struct Dispatcher {
    page: Arc<dyn PageChannel>,
    navigator: Arc<dyn Navigator>,
    system: Arc<dyn SystemHandler>,
}

impl Dispatcher {
    pub fn new(
        page: Arc<dyn PageChannel>,
        navigator: Arc<dyn Navigator>,
        system: Arc<dyn SystemHandler>,
    ) -> Self {
        Self {
            page,
            navigator,
            system,
        }
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub async fn dispatch(&self, actions: &[Action], context: &Context) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (index, action) in actions.iter().enumerate() {
            match self.execute(action, context).await {
                Ok(Step::Done) => {
                    tracing::debug!(index, kind = action.kind(), "action executed");
                    report.executed += 1;
                }
                Ok(Step::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(index, kind = action.kind(), error = %e, "action failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Dispatch actions that arrived as raw JSON.
    pub async fn dispatch_values(&self, values: &[Value], context: &Context) -> DispatchReport {
        let actions = decode_actions(values);
        let mut report = self.dispatch(&actions, context).await;
        report.skipped += values.len() - actions.len();
        report
    }

    async fn execute(&self, action: &Action, context: &Context) -> Result<Step> {
        match action {
            Action::WebAutomation {
                command,
                target,
                value,
                direction,
            } => {
                if !context.web_automation_enabled {
                    tracing::debug!(?command, "web automation disabled, skipping");
                    return Ok(Step::Skipped);
                }
                match command {
                    WebCommand::Click => {
                        let target = require(target, "click target")?;
                        self.send_page(PageRequest::ClickElement {
                            target: target.to_string(),
                        })
                        .await?;
                    }
                    WebCommand::Type => {
                        let field = require(target, "field name")?;
                        let value = value
                            .clone()
                            .ok_or_else(|| Error::Action("missing value to type".into()))?;
                        self.send_page(PageRequest::FillForm {
                            field: field.to_string(),
                            value,
                        })
                        .await?;
                    }
                    WebCommand::Scroll => {
                        let direction = direction.unwrap_or(ScrollDirection::Down);
                        self.send_page(PageRequest::ScrollPage { direction }).await?;
                    }
                    WebCommand::Navigate => {
                        let target = require(target, "navigation target")?;
                        let step = HistoryStep::from_target(target).ok_or_else(|| {
                            Error::Action(format!("unknown navigation target `{target}`"))
                        })?;
                        self.navigator.history(step).await?;
                    }
                }
            }
            Action::Search { query, engine } => {
                self.navigator
                    .open(&engine.search_url(query), LinkTarget::Blank)
                    .await?;
            }
            Action::Navigation { url, target } => {
                self.navigator.open(url, *target).await?;
            }
            Action::System { command } => {
                self.system.handle(*command).await?;
            }
        }
        Ok(Step::Done)
    }

    async fn send_page(&self, request: PageRequest) -> Result<()> {
        let response = self.page.send(request).await?;
        if response.succeeded() {
            Ok(())
        } else {
            Err(Error::Action(
                response
                    .error()
                    .unwrap_or("page reported failure")
                    .to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::executor::ActionOutcome;
    use crate::types::SearchEngine;

    #[derive(Default)]
    struct Recorder {
        page: Mutex<Vec<PageRequest>>,
        opened: Mutex<Vec<(String, LinkTarget)>>,
        steps: Mutex<Vec<HistoryStep>>,
        system: Mutex<Vec<SystemCommand>>,
    }

    #[async_trait]
    impl PageChannel for Recorder {
        async fn send(&self, request: PageRequest) -> Result<PageResponse> {
            if let PageRequest::ClickElement { target } = &request {
                if target == "broken" {
                    return Err(Error::Action("page went away".into()));
                }
                if target == "missing" {
                    return Ok(PageResponse::Outcome(ActionOutcome::failed(
                        "Element not found",
                    )));
                }
            }
            self.page.lock().unwrap().push(request);
            Ok(PageResponse::Outcome(ActionOutcome::matched("BUTTON")))
        }
    }

    #[async_trait]
    impl Navigator for Recorder {
        async fn open(&self, url: &str, target: LinkTarget) -> Result<()> {
            self.opened.lock().unwrap().push((url.to_string(), target));
            Ok(())
        }

        async fn history(&self, step: HistoryStep) -> Result<()> {
            self.steps.lock().unwrap().push(step);
            Ok(())
        }
    }

    #[async_trait]
    impl SystemHandler for Recorder {
        async fn handle(&self, command: SystemCommand) -> Result<()> {
            self.system.lock().unwrap().push(command);
            Ok(())
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Recorder>) {
        let rec = Arc::new(Recorder::default());
        (
            Dispatcher::new(rec.clone(), rec.clone(), rec.clone()),
            rec,
        )
    }

    fn enabled() -> Context {
        Context {
            web_automation_enabled: true,
            ..Context::default()
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_queue() {
        for actions in [
            vec![Action::click("broken"), Action::click("save")],
            vec![Action::click("save"), Action::click("broken")],
        ] {
            let (dispatcher, rec) = dispatcher();
            let report = dispatcher.dispatch(&actions, &enabled()).await;
            assert_eq!(report.executed, 1);
            assert_eq!(report.failed, 1);
            assert_eq!(
                *rec.page.lock().unwrap(),
                vec![PageRequest::ClickElement {
                    target: "save".into()
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_page_reported_failure_counts_as_failed() {
        let (dispatcher, _) = dispatcher();
        let report = dispatcher
            .dispatch(
                &[Action::click("missing"), Action::scroll(ScrollDirection::Up)],
                &enabled(),
            )
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 1);
    }

    #[tokio::test]
    async fn test_routes_each_variant() {
        let (dispatcher, rec) = dispatcher();
        let actions = [
            Action::fill("email", "a@b.c"),
            Action::navigate("back"),
            Action::search("rust book", SearchEngine::Bing),
            Action::Navigation {
                url: "https://example.com".into(),
                target: LinkTarget::SameTab,
            },
            Action::system(SystemCommand::OpenSettings),
        ];
        let report = dispatcher.dispatch(&actions, &enabled()).await;
        assert_eq!(report.executed, 5);
        assert_eq!(
            rec.page.lock().unwrap()[0],
            PageRequest::FillForm {
                field: "email".into(),
                value: "a@b.c".into()
            }
        );
        assert_eq!(*rec.steps.lock().unwrap(), vec![HistoryStep::Back]);
        assert_eq!(
            *rec.opened.lock().unwrap(),
            vec![
                (
                    "https://www.bing.com/search?q=rust%20book".to_string(),
                    LinkTarget::Blank
                ),
                ("https://example.com".to_string(), LinkTarget::SameTab),
            ]
        );
        assert_eq!(*rec.system.lock().unwrap(), vec![SystemCommand::OpenSettings]);
    }

    #[tokio::test]
    async fn test_web_automation_requires_enabled_context() {
        let (dispatcher, rec) = dispatcher();
        let report = dispatcher
            .dispatch(
                &[Action::click("save"), Action::search("x", SearchEngine::Google)],
                &Context::default(),
            )
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.executed, 1);
        assert!(rec.page.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_navigation_target_fails() {
        let (dispatcher, _) = dispatcher();
        let report = dispatcher
            .dispatch(&[Action::navigate("sideways")], &enabled())
            .await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_unrecognized_wire_actions_are_dropped() {
        let (dispatcher, rec) = dispatcher();
        let values = vec![
            serde_json::json!({"type": "teleport", "to": "mars"}),
            serde_json::json!({"type": "system", "command": "clear_history"}),
        ];
        let report = dispatcher.dispatch_values(&values, &enabled()).await;
        assert_eq!(report.executed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(*rec.system.lock().unwrap(), vec![SystemCommand::ClearHistory]);
    }
}
