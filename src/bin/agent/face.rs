use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use heyweb::AssistantEvent;
use heyweb::speech::VoiceSettings;

/// Ports tried after the requested one before giving up.
const PORT_ATTEMPTS: u16 = 10;

/// What the UI page asks the agent to do.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    /// A typed message
    Say { text: String },
    ListenStart,
    ListenCancel,
    /// Final speech recognition result
    Transcript { text: String },
    /// Recognizer error code (`not-allowed`, `no-speech`, ...)
    RecognitionError { error: String },
    Voice { settings: VoiceSettings },
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<UiCommand>,
    event_tx: broadcast::Sender<AssistantEvent>,
}

pub struct Face {
    pub commands: mpsc::Receiver<UiCommand>,
    pub events: broadcast::Sender<AssistantEvent>,
    pub port: u16,
}

/// Start the UI on the first free port from `port`.
pub async fn start_server(port: u16) -> Result<Face> {
    let (cmd_tx, commands) = mpsc::channel::<UiCommand>(16);
    let (events, _) = broadcast::channel::<AssistantEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: events.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for candidate in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => {
                bound = Some((listener, candidate));
                break;
            }
            Err(e) => tracing::debug!(port = candidate, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port in {port}..{}; is another agent running?",
            port.saturating_add(PORT_ATTEMPTS)
        )
    })?;

    tracing::info!("web UI running at http://localhost:{port}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "web UI stopped");
        }
    });

    Ok(Face {
        commands,
        events,
        port,
    })
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(command): Json<UiCommand>,
) -> StatusCode {
    tracing::debug!(?command, "ui command");
    match state.cmd_tx.send(command).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let event = result.ok()?;
        match Event::default().json_data(&event) {
            Ok(sse) => Some(Ok::<_, Infallible>(sse)),
            Err(e) => {
                tracing::warn!(error = %e, "could not encode event");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>HeyWeb</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; flex: 1; }
  .dot { width: 10px; height: 10px; border-radius: 50%; background: #22c55e; }
  .dot.listening { background: #ef4444; animation: pulse 1s infinite; }
  .dot.processing { background: #f59e0b; animation: pulse 2s infinite; }
  @keyframes pulse { 0%, 100% { opacity: 1; } 50% { opacity: 0.4; } }
  .main {
    flex: 1; display: flex; flex-direction: column;
    max-width: 800px; width: 100%; margin: 0 auto;
    padding: 24px 32px; gap: 16px; overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 8px; }
  .entry { padding: 10px 14px; border-radius: 8px; font-size: 14px; line-height: 1.5; }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.assistant { background: #0a1a0a; border-left: 3px solid #22c55e; color: #bbf7d0; }
  .entry.info { background: #111118; border-left: 3px solid #3b82f6; font-size: 13px; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  #settings { display: none; gap: 16px; align-items: center; font-size: 13px; }
  #settings.open { display: flex; }
  .input-area { display: flex; gap: 8px; }
  #cmd {
    flex: 1; background: #111118; border: 1px solid #222; border-radius: 8px;
    padding: 12px 16px; color: #fff; font-size: 16px; outline: none;
  }
  #cmd:focus { border-color: #6366f1; }
  button {
    background: #6366f1; color: #fff; border: none; border-radius: 8px;
    padding: 12px 20px; font-size: 15px; font-weight: 600; cursor: pointer;
  }
  button:disabled { background: #333; cursor: not-allowed; }
  #mic.on { background: #ef4444; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="dot"></div>
    <h1>HeyWeb</h1>
    <button id="gear" title="Settings">&#9881;</button>
  </header>
  <div class="main">
    <div id="settings">
      <label>Rate <input type="range" id="rate" min="0.5" max="2" step="0.1" value="1"></label>
      <label>Pitch <input type="range" id="pitch" min="0.5" max="1.9" step="0.1" value="1"></label>
      <label>Voice <input type="text" id="voice" placeholder="default"></label>
    </div>
    <div id="log"></div>
    <div class="input-area">
      <button id="mic" title="Speak">&#127908;</button>
      <input type="text" id="cmd" placeholder="Say or type what you want..." autofocus />
      <button id="send">Send</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const mic = document.getElementById('mic');
  const dot = document.getElementById('dot');
  const settings = document.getElementById('settings');
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function addEntry(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = esc(text);
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function post(body) {
    return fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify(body),
    });
  }

  function send() {
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    post({type: 'say', text});
  }
  document.getElementById('send').onclick = send;
  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const Recognition = window.SpeechRecognition || window.webkitSpeechRecognition;
  let recognition = null;
  let heard = false;
  if (!Recognition) {
    mic.disabled = true;
    mic.title = 'Speech recognition is not supported in this browser';
  } else {
    recognition = new Recognition();
    recognition.lang = 'en-US';
    recognition.interimResults = false;
    recognition.onstart = () => { heard = false; post({type: 'listen_start'}); };
    recognition.onresult = ev => {
      const result = ev.results[ev.results.length - 1];
      if (result.isFinal) {
        heard = true;
        post({type: 'transcript', text: result[0].transcript});
      }
    };
    recognition.onerror = ev => { heard = true; post({type: 'recognition_error', error: ev.error}); };
    recognition.onend = () => { if (!heard) post({type: 'listen_cancel'}); };
  }
  mic.onclick = () => {
    if (!recognition) return;
    if (mic.classList.contains('on')) { recognition.stop(); return; }
    try { recognition.start(); } catch (e) { addEntry('error', 'Failed to start voice recognition. Please try again.'); }
  };

  function sendVoice() {
    const voice = document.getElementById('voice').value.trim();
    post({type: 'voice', settings: {
      rate: parseFloat(document.getElementById('rate').value),
      pitch: parseFloat(document.getElementById('pitch').value),
      voice: voice || null,
    }});
  }
  for (const id of ['rate', 'pitch', 'voice']) document.getElementById(id).onchange = sendVoice;
  document.getElementById('gear').onclick = () => settings.classList.toggle('open');

  const es = new EventSource('/events');
  es.onmessage = e => {
    const d = JSON.parse(e.data);
    switch (d.type) {
      case 'phase':
        dot.className = 'dot ' + d.phase;
        mic.classList.toggle('on', d.phase === 'listening');
        break;
      case 'message':
        addEntry(d.message.role === 'user' ? 'user' : 'assistant', d.message.content);
        break;
      case 'actions':
        if (d.report.executed || d.report.failed || d.report.skipped)
          addEntry('info', `Actions: ${d.report.executed} done, ${d.report.failed} failed, ${d.report.skipped} skipped`);
        break;
      case 'notification':
        addEntry('error', d.text);
        break;
      case 'open_settings':
        settings.classList.add('open');
        break;
      case 'history_cleared':
        log.innerHTML = '';
        addEntry('info', 'Conversation history cleared.');
        break;
      case 'exported':
        addEntry('info', 'Conversation exported to ' + d.path);
        break;
    }
  };

  addEntry('info', 'Ready. Type a message or press the microphone to talk.');
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_commands_parse() {
        let cmd: UiCommand =
            serde_json::from_str(r#"{"type":"recognition_error","error":"no-speech"}"#).unwrap();
        assert!(matches!(cmd, UiCommand::RecognitionError { error } if error == "no-speech"));

        let cmd: UiCommand = serde_json::from_str(
            r#"{"type":"voice","settings":{"rate":1.5,"pitch":1.0,"voice":null}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, UiCommand::Voice { settings } if settings.rate == 1.5));
    }
}
