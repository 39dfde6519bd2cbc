//! Realtime speech-to-text over the Scribe WebSocket API
//!
//! Microphone audio is captured on a dedicated thread (audio streams are not
//! `Send`), encoded as base64 PCM16 and streamed to the service. Transcript
//! messages come back on the same socket and are posted to the orchestrator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::capture::{AudioCapture, CaptureOptions, samples_to_pcm16};
use crate::config::{Language, SttConfig};
use crate::conversation::{Event, EventSender};
use crate::transcription::{ConnectRequest, TranscriptionEvent, TranscriptionSession};
use crate::{Error, Result};

/// Sample rates the service accepts as raw PCM
const PCM_RATES: &[u32] = &[8000, 16000, 22050, 24000, 44100, 48000];

/// Outbound audio message
#[derive(Debug, Serialize)]
struct AudioChunk<'a> {
    message_type: &'static str,
    audio_base_64: &'a str,
    commit: bool,
    sample_rate: u32,
}

/// Inbound message; only the fields we read
#[derive(Debug, Deserialize)]
struct ServiceMessage {
    message_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Build the session URL for a credential and capture rate
///
/// # Errors
///
/// Returns `SessionConnect` if the service has no PCM format for `sample_rate`
pub fn session_url(
    config: &SttConfig,
    token: &SecretString,
    language: Language,
    sample_rate: u32,
) -> Result<Url> {
    if !PCM_RATES.contains(&sample_rate) {
        return Err(Error::SessionConnect(format!(
            "unsupported capture rate {sample_rate} Hz"
        )));
    }

    let mut url = config.url.clone();
    url.query_pairs_mut()
        .append_pair("model_id", &config.model_id)
        .append_pair("language_code", language.code())
        .append_pair("audio_format", &format!("pcm_{sample_rate}"))
        .append_pair("commit_strategy", &config.commit_strategy)
        .append_pair("token", token.expose_secret());
    Ok(url)
}

/// Map one service message to a session event
///
/// Returns `None` for bookkeeping messages and anything unparseable.
#[must_use]
pub fn parse_message(text: &str) -> Option<TranscriptionEvent> {
    let message: ServiceMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "invalid message from transcription service");
            return None;
        }
    };

    let detail = || {
        message
            .error
            .clone()
            .or_else(|| message.message.clone())
            .unwrap_or_else(|| message.message_type.clone())
    };

    match message.message_type.as_str() {
        "session_started" => {
            tracing::info!("transcription session started");
            None
        }
        "partial_transcript" => Some(TranscriptionEvent::Partial(
            message.text.clone().unwrap_or_default(),
        )),
        "committed_transcript" | "committed_transcript_with_timestamps" => Some(
            TranscriptionEvent::Committed(message.text.clone().unwrap_or_default()),
        ),
        "auth_error" => Some(TranscriptionEvent::AuthError(detail())),
        "quota_exceeded" | "input_error" | "error" => Some(TranscriptionEvent::Error(detail())),
        other => {
            tracing::trace!(message_type = other, "ignoring transcription message");
            None
        }
    }
}

/// Tasks and threads behind one live session
struct ActiveSession {
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ActiveSession {
    fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
    }
}

/// Scribe realtime transcription session
pub struct ScribeSession {
    config: SttConfig,
    events: EventSender,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActiveSession>>,
}

impl ScribeSession {
    #[must_use]
    pub fn new(config: SttConfig, events: EventSender) -> Self {
        Self {
            config,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    fn take_active(&self) -> Option<ActiveSession> {
        self.active.lock().ok().and_then(|mut active| active.take())
    }
}

#[async_trait]
impl TranscriptionSession for ScribeSession {
    async fn connect(&self, request: ConnectRequest) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.take_active() {
            previous.shutdown();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let sample_rate =
            start_capture(request.constraints.into(), audio_tx, Arc::clone(&stop)).await?;

        let url = match session_url(&self.config, &request.token, request.language, sample_rate) {
            Ok(url) => url,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        tracing::info!(
            host = self.config.url.host_str().unwrap_or_default(),
            language = %request.language,
            sample_rate,
            "connecting transcription session"
        );

        let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                return Err(connect_error(e));
            }
        };

        let (write, read) = stream.split();
        let writer = tokio::spawn(write_audio(write, audio_rx, sample_rate, Arc::clone(&stop)));
        let reader = tokio::spawn(read_transcripts(
            read,
            self.events.clone(),
            Arc::clone(&stop),
        ));
        let session = ActiveSession {
            stop,
            reader,
            writer,
        };

        // A disconnect that raced the handshake wins
        let mut active = self
            .active
            .lock()
            .map_err(|_| Error::SessionConnect("session state poisoned".to_string()))?;
        if self.generation.load(Ordering::SeqCst) != generation {
            drop(active);
            session.shutdown();
            return Err(Error::SessionConnect("cancelled".to_string()));
        }
        *active = Some(session);
        Ok(())
    }

    fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.take_active() {
            tracing::debug!("disconnecting transcription session");
            session.shutdown();
        }
    }
}

impl Drop for ScribeSession {
    fn drop(&mut self) {
        if let Some(session) = self.take_active() {
            session.shutdown();
        }
    }
}

fn connect_error(error: tungstenite::Error) -> Error {
    match &error {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Error::SessionAuth(format!("credential rejected ({})", response.status()))
        }
        _ => Error::SessionConnect(error.to_string()),
    }
}

/// Run the microphone on its own thread until `stop` is set
///
/// Resolves to the capture sample rate once the stream is running.
async fn start_capture(
    options: CaptureOptions,
    sink: mpsc::UnboundedSender<Vec<f32>>,
    stop: Arc<AtomicBool>,
) -> Result<u32> {
    let (ready_tx, ready_rx) = oneshot::channel();

    std::thread::spawn(move || {
        let mut capture = match AudioCapture::new(options).and_then(|mut capture| {
            capture.start_streaming(sink)?;
            Ok(capture)
        }) {
            Ok(capture) => capture,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let _ = ready_tx.send(Ok(capture.sample_rate()));
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(50));
        }
        capture.stop();
    });

    match ready_rx.await {
        Ok(Ok(rate)) => Ok(rate),
        Ok(Err(e)) => Err(Error::SessionConnect(e.to_string())),
        Err(_) => Err(Error::SessionConnect("capture thread exited".to_string())),
    }
}

async fn write_audio<S>(
    mut write: S,
    mut audio: mpsc::UnboundedReceiver<Vec<f32>>,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
) where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let engine = base64::engine::general_purpose::STANDARD;

    while let Some(chunk) = audio.recv().await {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let encoded = engine.encode(samples_to_pcm16(&chunk));
        let payload = AudioChunk {
            message_type: "input_audio_chunk",
            audio_base_64: &encoded,
            commit: false,
            sample_rate,
        };
        let text = match serde_json::to_string(&payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode audio chunk");
                continue;
            }
        };

        if let Err(e) = write.send(Message::Text(text)).await {
            tracing::error!(error = %e, "failed to send audio chunk");
            break;
        }
    }

    let _ = write.close().await;
}

async fn read_transcripts<S>(mut read: S, events: EventSender, stop: Arc<AtomicBool>)
where
    S: futures::Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let post = |event: TranscriptionEvent| {
        if !stop.load(Ordering::SeqCst) {
            events.send(Event::Transcription(event));
        }
    };

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_message(&text) {
                    let fatal = matches!(
                        event,
                        TranscriptionEvent::AuthError(_) | TranscriptionEvent::Error(_)
                    );
                    post(event);
                    if fatal {
                        break;
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(reason = ?frame, "transcription service closed the session");
                post(TranscriptionEvent::Error("Transcription session closed".to_string()));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "transcription connection error");
                post(TranscriptionEvent::Error(e.to_string()));
                break;
            }
        }
    }
}
