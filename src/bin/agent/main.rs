mod dom;
mod face;
mod hands;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use heyweb::backend::AssistantBackend;
use heyweb::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use heyweb::config;
use heyweb::executor::LocalPage;
use heyweb::recognition::RecognitionError;
use heyweb::speech::{LogVoice, SpeechEngine, SystemVoice};
use heyweb::{
    Assistant, AssistantEvent, Config, ContextBuilder, Dispatcher, HttpBackend, Orchestrator,
    Session, SessionControl, Speaker, TurnOutcome, VoiceSettings,
};

use crate::dom::ChromeDocument;
use crate::face::UiCommand;
use crate::hands::BrowserSession;

/// HeyWeb agent: a voice assistant that drives your browser
#[derive(Parser)]
#[command(name = "agent", version, about)]
struct Cli {
    /// URL of a running `heyweb` proxy
    #[arg(long, env = "HEYWEB_SERVER_URL", default_value = "http://localhost:4000")]
    server_url: String,

    /// Call the completion API directly instead of going through the proxy
    #[arg(long, env = "HEYWEB_DIRECT")]
    direct: bool,

    /// API key, used with --direct
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model, used with --direct
    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// API base URL, used with --direct
    #[arg(long, env = "API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Speech synthesizer command; "none" only logs replies
    #[arg(long, env = "HEYWEB_TTS_COMMAND")]
    tts_command: Option<String>,

    /// Speech rate, 1.0 is normal
    #[arg(long, default_value_t = 1.0)]
    voice_rate: f32,

    /// First port to try for the local UI
    #[arg(long, env = "HEYWEB_UI_PORT", default_value_t = 3000)]
    ui_port: u16,

    /// Never act on the page, only talk
    #[arg(long)]
    no_automation: bool,

    /// Chrome remote debugging endpoint to attach to
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    chrome_debug_url: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,heyweb=info,agent=info",
        1 => "info,heyweb=debug,agent=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
    config::report_dotenv(&dotenv);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn speech_engine(command: Option<&str>) -> Arc<dyn SpeechEngine> {
    match command {
        Some("none") => Arc::new(LogVoice),
        Some(program) => Arc::new(SystemVoice::new(program)),
        None => Arc::new(SystemVoice::platform_default()),
    }
}

fn backend(cli: &Cli) -> Arc<dyn AssistantBackend> {
    if cli.direct {
        let config = Config {
            api_key: cli.api_key.clone(),
            model: cli.model.clone(),
            base_url: cli.base_url.clone(),
            ..Config::default()
        };
        config.warn_if_incomplete();
        tracing::info!(model = %config.model, "calling the completion API directly");
        Arc::new(Assistant::new(Arc::new(config.completion_service())))
    } else {
        tracing::info!(server = %cli.server_url, "using proxy");
        Arc::new(HttpBackend::new(&cli.server_url))
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let face = face::start_server(cli.ui_port).await?;
    let events = face.events.clone();
    let mut commands = face.commands;

    let debug_url = cli.chrome_debug_url.clone();
    let profile_dir = config::data_dir().join("chrome-profile");
    let browser =
        tokio::task::spawn_blocking(move || BrowserSession::launch(&debug_url, profile_dir))
            .await??;

    let session = Session::open(config::session_path())?.into_shared();
    let control = SessionControl::new(session.clone(), config::export_dir()).with_events(events.clone());
    let dispatcher = Dispatcher::new(
        Arc::new(LocalPage::new(ChromeDocument::new(browser.clone()))),
        Arc::new(browser),
        Arc::new(control),
    );

    let speaker = Arc::new(Speaker::with_settings(
        speech_engine(cli.tts_command.as_deref()),
        VoiceSettings {
            rate: cli.voice_rate,
            ..VoiceSettings::default()
        },
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(
            session,
            backend(&cli),
            dispatcher,
            speaker,
            ContextBuilder::new(!cli.no_automation),
        )
        .with_events(events.clone()),
    );

    tracing::info!("ready, open http://localhost:{} to talk", face.port);
    while let Some(command) = commands.recv().await {
        match command {
            // Turns run in the background so listening commands stay responsive.
            UiCommand::Say { text } => {
                let orchestrator = Arc::clone(&orchestrator);
                let events = events.clone();
                tokio::spawn(async move {
                    let outcome = orchestrator.handle_user_utterance(&text).await;
                    report(&events, outcome);
                });
            }
            UiCommand::Transcript { text } => {
                let orchestrator = Arc::clone(&orchestrator);
                let events = events.clone();
                tokio::spawn(async move {
                    let outcome = orchestrator.handle_transcript(&text).await;
                    report(&events, outcome);
                });
            }
            UiCommand::ListenStart => {
                if let Err(e) = orchestrator.begin_listening() {
                    busy_or_log(&events, &e);
                }
            }
            UiCommand::ListenCancel => {
                if let Err(e) = orchestrator.cancel_listening() {
                    tracing::debug!(error = %e, "nothing to cancel");
                }
            }
            UiCommand::RecognitionError { error } => {
                orchestrator.recognition_failed(RecognitionError::from_code(&error));
            }
            UiCommand::Voice { settings } => {
                tracing::debug!(?settings, "voice settings changed");
                orchestrator.speaker().set_settings(settings);
            }
        }
    }
    Ok(())
}

const STILL_WORKING: &str = "Still working on the last request.";

fn report(events: &broadcast::Sender<AssistantEvent>, outcome: heyweb::Result<TurnOutcome>) {
    match outcome {
        Ok(TurnOutcome::Busy) => {
            let _ = events.send(AssistantEvent::Notification {
                text: STILL_WORKING.into(),
            });
        }
        Ok(outcome) => tracing::debug!(?outcome, "turn finished"),
        Err(e) => tracing::warn!(error = %e, "turn rejected"),
    }
}

fn busy_or_log(events: &broadcast::Sender<AssistantEvent>, error: &heyweb::Error) {
    if matches!(error, heyweb::Error::Busy) {
        let _ = events.send(AssistantEvent::Notification {
            text: STILL_WORKING.into(),
        });
    } else {
        tracing::warn!(error = %error, "cannot start listening");
    }
}
