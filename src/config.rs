//! Runtime configuration shared by the binaries.

use std::path::PathBuf;

use crate::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAiCompatible};
use crate::session::SESSION_FILE;

pub const DEFAULT_PORT: u16 = 4000;

/// Settings for reaching the completion service and serving the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    pub fn completion_service(&self) -> OpenAiCompatible {
        OpenAiCompatible::new(&self.base_url, self.api_key.clone(), &self.model)
    }

    /// Warn about settings that will make every request fail.
    pub fn warn_if_incomplete(&self) {
        if self.api_key.as_deref().is_none_or(str::is_empty) {
            tracing::warn!("OPENAI_API_KEY is not set; completion requests will be rejected upstream");
        }
    }
}

/// Log the outcome of loading `.env`, which happens before logging is set up.
pub fn report_dotenv(result: &Result<PathBuf, dotenvy::Error>) {
    match result {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env"),
    }
}

/// Where session state lives.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("heyweb")
}

pub fn session_path() -> PathBuf {
    data_dir().join(SESSION_FILE)
}

/// Where exported conversations are written.
pub fn export_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.port, 4000);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_session_lives_under_heyweb() {
        let path = session_path();
        assert!(path.ends_with("heyweb/session.json"));
    }
}
