//! HeyWeb: a voice assistant that turns what you say into replies and page actions.

pub mod assistant;
pub mod backend;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod parser;
pub mod phase;
pub mod recognition;
pub mod server;
pub mod session;
pub mod speech;
pub mod types;

pub use assistant::{Assistant, ChatReply};
pub use backend::{AssistantBackend, HttpBackend};
pub use completion::{CompletionService, OpenAiCompatible};
pub use config::Config;
pub use dispatcher::{DispatchReport, Dispatcher, Navigator, PageChannel, SystemHandler};
pub use error::{Error, Result};
pub use orchestrator::{AssistantEvent, ContextBuilder, Orchestrator, TurnOutcome};
pub use parser::{ActionParser, DEFAULT_PARSER};
pub use phase::Phase;
pub use session::{Session, SessionControl, SharedSession};
pub use speech::{Speaker, SpeechEngine, VoiceSettings};
pub use types::{Action, Context, Message, Role};
