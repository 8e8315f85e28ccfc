//! Session phase machine: `Idle -> Listening -> Processing -> Idle`.

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Listening,
    Processing,
}

/// Something that moves a session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Speech capture started
    StartListening,
    /// Speech capture was cancelled or failed
    StopListening,
    /// A final transcript arrived from speech capture
    Transcript,
    /// A typed message was submitted
    Submit,
    /// The turn finished, successfully or not
    Finish,
}

impl Trigger {
    fn verb(self) -> &'static str {
        match self {
            Self::StartListening => "start listening",
            Self::StopListening => "stop listening",
            Self::Transcript => "accept a transcript",
            Self::Submit => "submit a message",
            Self::Finish => "finish a turn",
        }
    }
}

impl Phase {
    /// Next phase for `trigger`, or an error when the move is not allowed.
    ///
    /// A second `Submit` or `Transcript` while processing is reported as
    /// [`Error::Busy`] so callers can tell single-flight rejections apart.
    pub fn on(self, trigger: Trigger) -> Result<Self> {
        match (self, trigger) {
            (Self::Idle, Trigger::StartListening) => Ok(Self::Listening),
            (Self::Listening, Trigger::StopListening) => Ok(Self::Idle),
            (Self::Listening, Trigger::Transcript) => Ok(Self::Processing),
            (Self::Idle, Trigger::Submit) => Ok(Self::Processing),
            (Self::Processing, Trigger::Finish) => Ok(Self::Idle),
            (Self::Processing, Trigger::Submit | Trigger::Transcript | Trigger::StartListening) => {
                Err(Error::Busy)
            }
            (from, trigger) => Err(Error::InvalidTransition {
                from,
                trigger: trigger.verb(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_path() {
        let phase = Phase::Idle.on(Trigger::StartListening).unwrap();
        assert_eq!(phase, Phase::Listening);
        let phase = phase.on(Trigger::Transcript).unwrap();
        assert_eq!(phase, Phase::Processing);
        assert_eq!(phase.on(Trigger::Finish).unwrap(), Phase::Idle);
    }

    #[test]
    fn test_typed_path() {
        let phase = Phase::Idle.on(Trigger::Submit).unwrap();
        assert_eq!(phase, Phase::Processing);
        assert_eq!(phase.on(Trigger::Finish).unwrap(), Phase::Idle);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let phase = Phase::Idle.on(Trigger::StartListening).unwrap();
        assert_eq!(phase.on(Trigger::StopListening).unwrap(), Phase::Idle);
    }

    #[test]
    fn test_processing_is_single_flight() {
        assert!(matches!(
            Phase::Processing.on(Trigger::Submit),
            Err(Error::Busy)
        ));
        assert!(matches!(
            Phase::Processing.on(Trigger::StartListening),
            Err(Error::Busy)
        ));
    }

    #[test]
    fn test_transcript_requires_listening() {
        assert!(matches!(
            Phase::Idle.on(Trigger::Transcript),
            Err(Error::InvalidTransition { .. })
        ));
    }
}
