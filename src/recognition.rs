//! Speech capture failures and what the user is told about them.

use serde::{Deserialize, Serialize};

/// Error codes reported by the speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionError {
    NotAllowed,
    NoSpeech,
    AudioCapture,
    Network,
    Other(String),
}

impl RecognitionError {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "not-allowed" | "service-not-allowed" => Self::NotAllowed,
            "no-speech" => Self::NoSpeech,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }

    /// Text to show the user, if this failure warrants one.
    ///
    /// Silence is routine and only logged.
    pub fn notification(&self) -> Option<String> {
        match self {
            Self::NotAllowed => Some(
                "Microphone access denied. Please allow microphone access and try again.".into(),
            ),
            Self::NoSpeech => None,
            Self::AudioCapture => {
                Some("Audio capture error. Please check your microphone and try again.".into())
            }
            Self::Network => Some("Network error. Please check your internet connection.".into()),
            Self::Other(code) => Some(format!("Speech recognition error: {code}")),
        }
    }
}
