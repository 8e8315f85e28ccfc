use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::json;

use heyweb::Navigator;
use heyweb::types::{ActiveTab, HistoryStep, LinkTarget};

/// Browser session shared by the page channel and the navigator.
///
/// Cloning is cheap; all clones follow the same current tab.
#[derive(Clone)]
pub struct BrowserSession {
    browser: Arc<Browser>,
    tab: Arc<Mutex<Arc<Tab>>>,
}

impl BrowserSession {
    /// Attach to a Chrome already listening on `debug_url`, or launch one.
    pub fn launch(debug_url: &str, profile_dir: PathBuf) -> Result<Self> {
        tracing::info!(debug_url, "attempting to attach to running Chrome");
        if let Ok(browser) = Browser::connect(debug_url.to_string()) {
            let existing = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("browser tab list is poisoned"))?
                .first()
                .cloned();
            let tab = match existing {
                Some(tab) => {
                    tracing::info!(url = %tab.get_url(), "attached, using existing tab");
                    tab
                }
                None => browser.new_tab()?,
            };
            return Ok(Self::from_parts(browser, tab));
        }

        tracing::info!(profile = %profile_dir.display(), "could not attach, launching Chrome");
        std::fs::create_dir_all(&profile_dir)?;
        let chrome_path = headless_chrome::browser::default_executable()
            .map_err(|e| anyhow!("Chrome executable not found: {e}"))?;

        let options = LaunchOptions {
            headless: false,
            path: Some(chrome_path),
            user_data_dir: Some(profile_dir),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(60 * 60),
            ..Default::default()
        };
        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        tracing::info!("Chrome ready");
        Ok(Self::from_parts(browser, tab))
    }

    fn from_parts(browser: Browser, tab: Arc<Tab>) -> Self {
        Self {
            browser: Arc::new(browser),
            tab: Arc::new(Mutex::new(tab)),
        }
    }

    pub fn current_tab(&self) -> Arc<Tab> {
        Arc::clone(&self.tab.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_current(&self, tab: Arc<Tab>) {
        *self.tab.lock().unwrap_or_else(PoisonError::into_inner) = tab;
    }

    fn new_tab(&self) -> Result<Arc<Tab>> {
        let tab = self.browser.new_tab()?;
        self.set_current(Arc::clone(&tab));
        Ok(tab)
    }

    fn open_blocking(&self, url: &str, target: LinkTarget) -> Result<()> {
        let tab = match target {
            LinkTarget::Blank => self.new_tab()?,
            LinkTarget::SameTab => self.current_tab(),
        };
        tab.navigate_to(url)?;
        tab.wait_until_navigated()?;
        Ok(())
    }

    fn history_blocking(&self, step: HistoryStep) -> Result<()> {
        let tab = self.current_tab();
        match step {
            HistoryStep::Back => {
                tab.evaluate("history.back()", false)?;
            }
            HistoryStep::Forward => {
                tab.evaluate("history.forward()", false)?;
            }
            HistoryStep::Refresh => {
                tab.reload(false, None)?;
            }
            HistoryStep::NewTab => {
                self.new_tab()?.navigate_to("about:blank")?;
            }
            HistoryStep::CloseTab => {
                tab.close(true)?;
                let remaining = self
                    .browser
                    .get_tabs()
                    .lock()
                    .map_err(|_| anyhow!("browser tab list is poisoned"))?
                    .iter()
                    .find(|t| t.get_target_id() != tab.get_target_id())
                    .cloned();
                match remaining {
                    Some(next) => self.set_current(next),
                    None => {
                        self.new_tab()?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, work: F) -> heyweb::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(BrowserSession) -> Result<T> + Send + 'static,
    {
        let session = self.clone();
        tokio::task::spawn_blocking(move || work(session))
            .await
            .map_err(|e| heyweb::Error::Action(format!("browser task failed: {e}")))?
            .map_err(|e| heyweb::Error::Action(format!("{e:#}")))
    }
}

#[async_trait]
impl Navigator for BrowserSession {
    async fn open(&self, url: &str, target: LinkTarget) -> heyweb::Result<()> {
        tracing::info!(url, ?target, "opening");
        let url = url.to_string();
        self.blocking(move |session| session.open_blocking(&url, target))
            .await
    }

    async fn history(&self, step: HistoryStep) -> heyweb::Result<()> {
        tracing::info!(?step, "tab navigation");
        self.blocking(move |session| session.history_blocking(step))
            .await
    }

    async fn active_tab(&self) -> Option<ActiveTab> {
        let tab = self.current_tab();
        let title = self
            .blocking(|session| Ok(session.current_tab().get_title()?))
            .await
            .ok();
        Some(ActiveTab {
            id: Some(json!(tab.get_target_id())),
            url: Some(tab.get_url()),
            title,
        })
    }
}
