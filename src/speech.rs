//! Speech synthesis with at most one utterance playing at a time.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// How an utterance should sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// 1.0 is the engine's normal speed
    pub rate: f32,
    pub pitch: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            voice: None,
        }
    }
}

/// Something that can turn text into audible speech.
///
/// `say` resolves when the utterance has finished. Dropping the future
/// must stop playback.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn say(&self, text: &str, settings: &VoiceSettings) -> Result<()>;
}

/// Speaks through a local command-line synthesizer (`espeak`, `say`, ...).
pub struct SystemVoice {
    program: String,
}

impl SystemVoice {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The platform's usual synthesizer.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("say")
        } else {
            Self::new("espeak")
        }
    }

    fn args(&self, settings: &VoiceSettings) -> Vec<String> {
        let words_per_minute = (175.0 * settings.rate).round() as i64;
        let mut args = Vec::new();
        match self.program_name() {
            "espeak" | "espeak-ng" => {
                args.push(format!("-s{words_per_minute}"));
                args.push(format!("-p{}", (50.0 * settings.pitch).round().clamp(0.0, 99.0)));
                if let Some(voice) = &settings.voice {
                    args.push(format!("-v{voice}"));
                }
            }
            "say" => {
                args.push(format!("-r{words_per_minute}"));
                if let Some(voice) = &settings.voice {
                    args.push(format!("-v{voice}"));
                }
            }
            _ => {}
        }
        args
    }

    fn program_name(&self) -> &str {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

#[async_trait]
impl SpeechEngine for SystemVoice {
    async fn say(&self, text: &str, settings: &VoiceSettings) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(self.args(settings))
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Speech(format!("could not run {}: {e}", self.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Speech(format!("{} exited with {status}", self.program)))
        }
    }
}

/// Writes utterances to the log instead of playing them.
pub struct LogVoice;

#[async_trait]
impl SpeechEngine for LogVoice {
    async fn say(&self, text: &str, _: &VoiceSettings) -> Result<()> {
        tracing::info!(text, "speak");
        Ok(())
    }
}

/// Front end to a [`SpeechEngine`] that never overlaps utterances.
pub struct Speaker {
    engine: Arc<dyn SpeechEngine>,
    settings: Mutex<VoiceSettings>,
    current: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Speaker {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self::with_settings(engine, VoiceSettings::default())
    }

    pub fn with_settings(engine: Arc<dyn SpeechEngine>, settings: VoiceSettings) -> Self {
        Self {
            engine,
            settings: Mutex::new(settings),
            current: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> VoiceSettings {
        lock(&self.settings).clone()
    }

    pub fn set_settings(&self, settings: VoiceSettings) {
        *lock(&self.settings) = settings;
    }

    /// Start speaking `text`, cutting off whatever was playing.
    ///
    /// Must be called inside a tokio runtime.
    pub fn speak(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        let mut current = lock(&self.current);
        if let Some(previous) = current.take() {
            previous.abort();
        }
        let engine = Arc::clone(&self.engine);
        let settings = self.settings();
        *current = Some(tokio::spawn(async move {
            if let Err(e) = engine.say(&text, &settings).await {
                tracing::warn!(error = %e, "speech failed");
            }
        }));
    }

    pub fn cancel(&self) {
        if let Some(previous) = lock(&self.current).take() {
            previous.abort();
        }
    }

    pub fn is_speaking(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.cancel();
    }
}
