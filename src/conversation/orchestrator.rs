//! Conversation state machine
//!
//! The [`Orchestrator`] owns every piece of turn, session and playback state.
//! All input arrives through [`Orchestrator::dispatch`], which handles one
//! event to completion without awaiting. Work that has to wait (credential
//! fetch and session connect, audio decode and playback) runs in spawned
//! tasks that post their outcome back as events.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use super::event::{Event, EventReceiver, EventSender, PlaybackEvent};
use super::playback::{AudioClip, AudioOutput, PlaybackKind, PlaybackSession};
use super::reply::ReplyBuffer;
use super::reveal::WordReveal;
use super::state::{ConnectionStatus, ConversationState, ViewState};
use super::timer::SingleShot;
use super::utterance::{Action, UtteranceTracker, extract_speech};
use crate::Error;
use crate::channel::{ChannelEvent, DuplexChannel, InboundFrame};
use crate::config::{Config, Language, TimingConfig};
use crate::credentials::CredentialSource;
use crate::transcription::{
    AudioConstraints, ConnectRequest, TranscriptionEvent, TranscriptionSession,
};

/// Per-conversation settings
#[derive(Debug, Clone, Default)]
pub struct ConversationSettings {
    pub language: Language,
    pub timing: TimingConfig,
    /// Greeting audio; `None` shows the greeting text only
    pub greeting_audio: Option<PathBuf>,
    pub constraints: AudioConstraints,
}

impl ConversationSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.language,
            timing: config.timing,
            greeting_audio: Some(config.greeting.audio_path(config.language)),
            constraints: config.stt.constraints,
        }
    }
}

/// External collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub channel: Arc<dyn DuplexChannel>,
    pub transcription: Arc<dyn TranscriptionSession>,
    pub credentials: Arc<dyn CredentialSource>,
    pub audio: Arc<dyn AudioOutput>,
}

/// Why the transcription session is being connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPurpose {
    /// First connect after the greeting
    Greeting,
    /// Reconnect after a reply finished
    Resume,
}

/// How a reply ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyOutcome {
    Played,
    TextOnly,
    Failed,
}

/// Voice conversation orchestrator
pub struct Orchestrator {
    settings: ConversationSettings,
    deps: Collaborators,
    events: EventSender,
    view: watch::Sender<ViewState>,
    state: ConversationState,
    utterance: UtteranceTracker,
    reply: ReplyBuffer,
    silence: SingleShot,
    fade: SingleShot,
    greeting_wait: SingleShot,
    reveal: WordReveal,
    playback: Option<PlaybackSession>,
    next_playback_id: u64,
    /// Current connect attempt; spawned connects compare against it
    session_epoch: Arc<AtomicU64>,
    pending_connect: Option<ConnectPurpose>,
    session_live: bool,
    connect_attempts: u64,
}

impl Orchestrator {
    /// Create an idle orchestrator posting its own work to `events`
    #[must_use]
    pub fn new(settings: ConversationSettings, deps: Collaborators, events: EventSender) -> Self {
        let connection = if deps.channel.is_open() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Connecting
        };
        let (view, _) = watch::channel(ViewState {
            connection,
            ..ViewState::default()
        });

        Self {
            utterance: UtteranceTracker::new(settings.timing.silence),
            reveal: WordReveal::new(
                settings.timing.reveal_min_interval,
                settings.timing.reveal_factor,
            ),
            settings,
            deps,
            events,
            view,
            state: ConversationState::Idle,
            reply: ReplyBuffer::new(),
            silence: SingleShot::new(),
            fade: SingleShot::new(),
            greeting_wait: SingleShot::new(),
            playback: None,
            next_playback_id: 0,
            session_epoch: Arc::new(AtomicU64::new(0)),
            pending_connect: None,
            session_live: false,
            connect_attempts: 0,
        }
    }

    /// Watch the UI-observable view
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    #[must_use]
    pub const fn state(&self) -> ConversationState {
        self.state
    }

    /// Current view snapshot
    #[must_use]
    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Whether a turn is in flight
    #[must_use]
    pub const fn turn_sent(&self) -> bool {
        self.utterance.turn_sent()
    }

    /// Number of times the silence timer has been armed
    #[must_use]
    pub const fn silence_arms(&self) -> u64 {
        self.silence.arms()
    }

    /// Number of session connects started
    #[must_use]
    pub const fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    /// Id of the active playback, if any
    #[must_use]
    pub fn playback_id(&self) -> Option<u64> {
        self.playback.as_ref().map(|p| p.id)
    }

    /// Drain the queue until shutdown
    pub async fn run(mut self, mut events: EventReceiver) {
        tracing::info!(language = %self.settings.language, "conversation loop started");
        while let Some(event) = events.recv().await {
            let shutdown = matches!(event, Event::Shutdown);
            self.dispatch(event);
            if shutdown {
                break;
            }
        }
        self.shutdown();
        tracing::info!("conversation loop stopped");
    }

    /// Handle one event to completion
    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::Start => self.start(),
            Event::Stop => self.stop(),
            Event::Toggle => {
                if self.state == ConversationState::Idle {
                    self.start();
                } else {
                    self.stop();
                }
            }
            Event::Shutdown => self.shutdown(),
            Event::Transcription(event) => self.on_transcription(event),
            Event::Channel(event) => self.on_channel(event),
            Event::Playback { id, event } => self.on_playback(id, event),
            Event::SessionConnected { epoch, result } => self.on_session_connected(epoch, result),
            Event::SilenceElapsed(generation) => self.on_silence(generation),
            Event::RevealTick(generation) => {
                if let Some(text) = self.reveal.tick(generation) {
                    self.update_view(|v| v.displayed_response = text);
                }
            }
            Event::FadeElapsed(generation) => {
                if self.fade.fire(generation) {
                    self.update_view(|v| v.response_visible = false);
                }
            }
            Event::GreetingWaitElapsed(generation) => {
                if self.greeting_wait.fire(generation) && self.state == ConversationState::Greeting {
                    self.connect_session(ConnectPurpose::Greeting);
                }
            }
        }
    }

    /// Stop the conversation and close the duplex channel
    pub fn shutdown(&mut self) {
        self.stop();
        self.deps.channel.close();
    }

    fn start(&mut self) {
        if self.state != ConversationState::Idle {
            return;
        }
        if !self.deps.channel.is_open() {
            tracing::warn!("start requested before the backend connection is open");
            self.surface(&Error::ChannelConnect("Not connected".to_string()));
            return;
        }

        tracing::info!(language = %self.settings.language, "starting conversation");
        self.utterance.reset();
        self.reply.clear();
        self.set_state(ConversationState::Greeting);
        self.update_view(|v| {
            v.transcript.clear();
            v.transcript_visible = false;
            v.displayed_response.clear();
            v.response_visible = false;
        });

        let played = match self.settings.greeting_audio.clone() {
            Some(path) => match self.play(AudioClip::file(path), PlaybackKind::Greeting) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "greeting audio unavailable");
                    false
                }
            },
            None => false,
        };
        if !played {
            self.greeting_fallback();
        }
    }

    /// Show the greeting text and wait before listening
    fn greeting_fallback(&mut self) {
        self.reveal.stop();
        let text = self.settings.language.greeting_text().to_string();
        self.update_view(|v| {
            v.displayed_response = text;
            v.response_visible = true;
        });
        self.greeting_wait.arm(
            self.settings.timing.greeting_fallback,
            &self.events,
            Event::GreetingWaitElapsed,
        );
    }

    fn stop(&mut self) {
        if self.state != ConversationState::Idle {
            tracing::info!(state = %self.state, "stopping conversation");
        }

        self.silence.cancel();
        self.fade.cancel();
        self.greeting_wait.cancel();
        self.reveal.stop();
        self.stop_playback();
        self.disconnect_session();
        self.utterance.reset();
        self.reply.clear();

        self.set_state(ConversationState::Idle);
        self.update_view(|v| {
            v.transcript_visible = false;
            v.response_visible = false;
        });
    }

    fn connect_session(&mut self, purpose: ConnectPurpose) {
        self.disconnect_session();

        let epoch = self.session_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending_connect = Some(purpose);
        self.connect_attempts += 1;
        tracing::debug!(epoch, ?purpose, "connecting transcription session");

        let current = Arc::clone(&self.session_epoch);
        let credentials = Arc::clone(&self.deps.credentials);
        let transcription = Arc::clone(&self.deps.transcription);
        let events = self.events.clone();
        let language = self.settings.language;
        let constraints = self.settings.constraints;

        tokio::spawn(async move {
            let result: crate::Result<()> = async {
                let token = credentials.fetch().await?;
                if current.load(Ordering::SeqCst) != epoch {
                    return Err(Error::SessionConnect("superseded".to_string()));
                }
                transcription
                    .connect(ConnectRequest {
                        token,
                        language,
                        constraints,
                    })
                    .await
            }
            .await;
            events.send(Event::SessionConnected { epoch, result });
        });
    }

    /// Drop the live session and invalidate any connect in flight
    fn disconnect_session(&mut self) {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.pending_connect = None;
        self.session_live = false;
        self.deps.transcription.disconnect();
        self.update_view(|v| v.recording = false);
    }

    fn on_session_connected(&mut self, epoch: u64, result: crate::Result<()>) {
        let current = epoch == self.session_epoch.load(Ordering::SeqCst);
        let Some(purpose) = self.pending_connect.filter(|_| current) else {
            // Superseded; a connect that still won the race is closed again
            // unless a newer connect is about to replace it
            if result.is_ok() && self.pending_connect.is_none() && !self.session_live {
                tracing::debug!(epoch, "closing stale transcription session");
                self.deps.transcription.disconnect();
            }
            return;
        };
        self.pending_connect = None;

        match result {
            Ok(()) => {
                tracing::info!(?purpose, "transcription session connected");
                self.session_live = true;
                let channel_open = self.deps.channel.is_open();
                self.update_view(|v| {
                    v.recording = true;
                    if v.connection.is_error() && channel_open {
                        v.connection = ConnectionStatus::Connected;
                    }
                });

                if purpose == ConnectPurpose::Greeting && self.state == ConversationState::Greeting {
                    self.utterance.reset();
                    self.set_state(ConversationState::Listening);
                    self.fade.arm(
                        self.settings.timing.greeting_fade,
                        &self.events,
                        Event::FadeElapsed,
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, ?purpose, "transcription session connect failed");
                self.surface(&e);
                self.disconnect_session();
                if purpose == ConnectPurpose::Greeting {
                    self.reveal.stop();
                    self.greeting_wait.cancel();
                    self.set_state(ConversationState::Idle);
                }
            }
        }
    }

    fn on_transcription(&mut self, event: TranscriptionEvent) {
        if self.state == ConversationState::Idle {
            return;
        }

        match event {
            TranscriptionEvent::Partial(text) => self.on_partial(text),
            TranscriptionEvent::Committed(text) => {
                if self.state.accepts_speech() && !self.utterance.turn_sent() {
                    tracing::debug!(text = %text, "committed transcript");
                    self.commit(&extract_speech(&text));
                }
            }
            TranscriptionEvent::AuthError(message) => {
                tracing::error!(message = %message, "transcription auth error");
                self.surface(&Error::SessionAuth(message));
                self.disconnect_session();
            }
            TranscriptionEvent::Error(message) => {
                tracing::error!(message = %message, "transcription error");
                self.surface(&Error::SessionRuntime(message));
                self.disconnect_session();
            }
        }
    }

    fn on_partial(&mut self, text: String) {
        if !self.state.accepts_speech() {
            return;
        }

        match self.utterance.observe(&text) {
            Action::Ignore => {}
            Action::Reset(delay) => {
                tracing::debug!(text = %text, "partial transcript");
                self.silence.arm(delay, &self.events, Event::SilenceElapsed);
                self.update_view(|v| {
                    v.transcript = text;
                    v.transcript_visible = true;
                });
            }
            Action::Clear => self.silence.cancel(),
        }
    }

    fn on_silence(&mut self, generation: u64) {
        if !self.silence.fire(generation) {
            return;
        }
        if self.utterance.turn_sent() || !self.state.accepts_speech() {
            return;
        }
        let speech = self.utterance.pending_speech();
        self.commit(&speech);
    }

    fn commit(&mut self, speech: &str) {
        let Some(delta) = self.utterance.commit(speech) else {
            return;
        };

        self.silence.cancel();
        self.set_state(ConversationState::Thinking);
        tracing::debug!(text = %delta, "sending turn");

        if let Err(e) = self.deps.channel.send_transcript(&delta) {
            tracing::error!(error = %e, "failed to send turn");
            self.surface(&e);
            self.utterance.reset();
            self.set_state(ConversationState::Listening);
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                self.update_view(|v| v.connection = ConnectionStatus::Connected);
            }
            ChannelEvent::ConnectFailed(message) => {
                self.surface(&Error::ChannelConnect(message));
            }
            ChannelEvent::Closed => {
                tracing::info!("backend connection closed");
                self.update_view(|v| {
                    if !v.connection.is_error() {
                        v.connection = ConnectionStatus::Disconnected;
                    }
                });
            }
            ChannelEvent::Error(message) => {
                self.surface(&Error::ChannelRuntime(message));
            }
            ChannelEvent::Frame(frame) => self.on_frame(frame),
            ChannelEvent::Audio(chunk) => {
                if self.state.is_busy() {
                    self.reply.push_audio(chunk);
                }
            }
        }
    }

    fn on_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::ServerHello => tracing::debug!("server hello"),
            InboundFrame::Error { message } => {
                tracing::error!(message = %message, "backend reported an error");
                self.surface(&Error::ChannelRuntime(message));
            }
            _ if matches!(
                self.state,
                ConversationState::Idle | ConversationState::Greeting
            ) =>
            {
                tracing::debug!(?frame, state = %self.state, "ignoring reply frame");
            }
            InboundFrame::AssistantStart => {
                tracing::debug!(state = %self.state, "reply started");
                self.reply.clear();
                self.stop_playback();
                self.reveal.stop();
                self.fade.cancel();
                self.silence.cancel();
                self.disconnect_session();
                // A reply can start while listening when an earlier turn's
                // stream outlives a restart; it still has to end the turn
                self.set_state(ConversationState::Thinking);
                self.update_view(|v| {
                    v.transcript_visible = false;
                    v.displayed_response.clear();
                    v.response_visible = false;
                });
            }
            InboundFrame::AssistantToken { text } => {
                if !self.state.is_busy() {
                    tracing::trace!("ignoring token outside a reply");
                    return;
                }
                self.reply.push_text(&text);
                if self.state == ConversationState::Thinking {
                    self.set_state(ConversationState::Responding);
                }
            }
            InboundFrame::AssistantDone => self.on_reply_done(),
            InboundFrame::Interrupted => {
                if self.state.is_busy() {
                    tracing::info!("reply interrupted by backend");
                    self.finish_reply(ReplyOutcome::TextOnly);
                }
            }
        }
    }

    fn on_reply_done(&mut self) {
        if !self.state.is_busy() {
            return;
        }
        tracing::debug!(
            chars = self.reply.full_text().len(),
            audio_bytes = self.reply.audio_len(),
            "reply complete"
        );

        let Some(clip) = self.reply.take_clip() else {
            self.finish_reply(ReplyOutcome::TextOnly);
            return;
        };

        self.set_state(ConversationState::Responding);
        if let Err(e) = self.play(clip, PlaybackKind::Reply) {
            tracing::warn!(error = %e, "reply audio could not start");
            self.finish_reply(ReplyOutcome::Failed);
        }
    }

    fn on_playback(&mut self, id: u64, event: PlaybackEvent) {
        let Some(kind) = self
            .playback
            .as_ref()
            .filter(|p| p.id == id)
            .map(|p| p.kind)
        else {
            tracing::trace!(id, "ignoring stale playback event");
            return;
        };

        match event {
            PlaybackEvent::Loaded(duration) => {
                if let Some(session) = self.playback.as_mut() {
                    session.duration = Some(duration);
                }
                let text = match kind {
                    PlaybackKind::Greeting => self.settings.language.greeting_text().to_string(),
                    PlaybackKind::Reply => self.reply.full_text().to_string(),
                };
                let initial = self.reveal.start(&text, duration, &self.events);
                self.update_view(|v| {
                    v.displayed_response = initial;
                    v.response_visible = true;
                });
            }
            PlaybackEvent::Ended => {
                self.stop_playback();
                match kind {
                    PlaybackKind::Greeting => {
                        self.reveal.stop();
                        let text = self.settings.language.greeting_text().to_string();
                        self.update_view(|v| {
                            v.displayed_response = text;
                            v.response_visible = true;
                        });
                        self.connect_session(ConnectPurpose::Greeting);
                    }
                    PlaybackKind::Reply => self.finish_reply(ReplyOutcome::Played),
                }
            }
            PlaybackEvent::Failed(message) => {
                tracing::warn!(message = %message, ?kind, "playback failed");
                self.stop_playback();
                match kind {
                    PlaybackKind::Greeting => self.greeting_fallback(),
                    PlaybackKind::Reply => self.finish_reply(ReplyOutcome::Failed),
                }
            }
        }
    }

    /// End the current turn and go back to listening
    fn finish_reply(&mut self, outcome: ReplyOutcome) {
        tracing::debug!(?outcome, "reply finished");
        self.stop_playback();
        self.reveal.stop();
        let text = self.reply.full_text().to_string();
        self.update_view(|v| {
            v.displayed_response = text;
            v.response_visible = true;
            v.transcript.clear();
            v.transcript_visible = false;
        });

        self.utterance.reset();
        self.set_state(ConversationState::Listening);
        self.connect_session(ConnectPurpose::Resume);

        let fade = match outcome {
            ReplyOutcome::Played => Some(self.settings.timing.reply_fade),
            ReplyOutcome::TextOnly => Some(self.settings.timing.text_only_fade),
            ReplyOutcome::Failed => None,
        };
        match fade {
            Some(delay) => self.fade.arm(delay, &self.events, Event::FadeElapsed),
            None => self.fade.cancel(),
        }
    }

    fn play(&mut self, clip: AudioClip, kind: PlaybackKind) -> crate::Result<()> {
        self.stop_playback();
        self.next_playback_id += 1;
        let id = self.next_playback_id;

        let handle = self.deps.audio.play(id, clip, self.events.clone())?;
        tracing::debug!(id, ?kind, "playback started");
        self.playback = Some(PlaybackSession::new(id, kind, handle));
        Ok(())
    }

    fn stop_playback(&mut self) {
        if let Some(session) = self.playback.take() {
            tracing::trace!(id = session.id, "releasing playback");
            session.stop();
        }
    }

    fn set_state(&mut self, state: ConversationState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state transition");
            self.state = state;
        }
        self.update_view(|v| v.state = state);
    }

    /// Show an error without leaving the current state
    fn surface(&self, error: &Error) {
        if !error.is_user_visible() {
            return;
        }
        let message = error.status_text();
        self.update_view(|v| v.connection = ConnectionStatus::Error(message));
    }

    fn update_view(&self, f: impl FnOnce(&mut ViewState)) {
        self.view.send_modify(f);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_playback();
        self.deps.transcription.disconnect();
    }
}
