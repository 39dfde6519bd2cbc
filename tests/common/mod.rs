//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use supply_voice::conversation::{
    AudioClip, AudioOutput, EventReceiver, PlaybackEvent, PlaybackHandle,
};
use supply_voice::{
    ChannelEvent, Collaborators, ConversationSettings, ConversationState, CredentialSource,
    DuplexChannel, Error, Event, EventSender, InboundFrame, Orchestrator, Result,
    TranscriptionEvent, TranscriptionSession, ViewState, event_channel,
};
use supply_voice::transcription::ConnectRequest;

/// Mock duplex channel recording every sent turn
#[derive(Default)]
pub struct MockChannel {
    pub open: AtomicBool,
    pub fail_send: AtomicBool,
    pub closed: AtomicBool,
    pub sent: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn open() -> Self {
        let channel = Self::default();
        channel.open.store(true, Ordering::SeqCst);
        channel
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl DuplexChannel for MockChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_transcript(&self, text: &str) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) || !self.is_open() {
            return Err(Error::ChannelRuntime("Not connected".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Mock transcription session counting connects and disconnects
#[derive(Default)]
pub struct MockSession {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail: AtomicBool,
    /// Handshake time for each connect, in milliseconds
    pub delay_ms: AtomicUsize,
}

impl MockSession {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionSession for MockSession {
    async fn connect(&self, _request: ConnectRequest) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::SessionConnect("microphone unavailable".to_string()));
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock credential source
#[derive(Default)]
pub struct MockCredentials {
    pub fetches: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl CredentialSource for MockCredentials {
    async fn fetch(&self) -> Result<SecretString> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::CredentialFetch("Missing token".to_string()));
        }
        Ok(SecretString::from("test-token".to_string()))
    }
}

/// Mock audio output; tests drive playback progress by hand
#[derive(Default)]
pub struct MockAudio {
    pub fail_start: AtomicBool,
    pub plays: Mutex<Vec<(u64, AudioClip, Arc<AtomicBool>)>>,
}

impl MockAudio {
    pub fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }

    pub fn last_clip(&self) -> Option<AudioClip> {
        self.plays.lock().unwrap().last().map(|(_, clip, _)| clip.clone())
    }

    /// Whether the playback with this id has been stopped
    pub fn stopped(&self, id: u64) -> bool {
        self.plays
            .lock()
            .unwrap()
            .iter()
            .find(|(play_id, _, _)| *play_id == id)
            .is_some_and(|(_, _, stop)| stop.load(Ordering::SeqCst))
    }
}

impl AudioOutput for MockAudio {
    fn play(&self, id: u64, clip: AudioClip, _events: EventSender) -> Result<PlaybackHandle> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Playback("no output device".to_string()));
        }
        let stop = Arc::new(AtomicBool::new(false));
        self.plays
            .lock()
            .unwrap()
            .push((id, clip, Arc::clone(&stop)));
        Ok(PlaybackHandle::new(stop, None))
    }
}

/// An orchestrator wired to mocks, driven step by step
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub rx: EventReceiver,
    pub events: EventSender,
    pub channel: Arc<MockChannel>,
    pub session: Arc<MockSession>,
    pub credentials: Arc<MockCredentials>,
    pub audio: Arc<MockAudio>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_channel(MockChannel::open())
    }

    pub fn with_channel(channel: MockChannel) -> Self {
        let settings = ConversationSettings {
            greeting_audio: Some("assets/greeting.mp3".into()),
            ..ConversationSettings::default()
        };
        Self::build(settings, channel)
    }

    pub fn build(settings: ConversationSettings, channel: MockChannel) -> Self {
        let (events, rx) = event_channel();
        let channel = Arc::new(channel);
        let session = Arc::new(MockSession::default());
        let credentials = Arc::new(MockCredentials::default());
        let audio = Arc::new(MockAudio::default());

        let deps = Collaborators {
            channel: channel.clone(),
            transcription: session.clone(),
            credentials: credentials.clone(),
            audio: audio.clone(),
        };
        let orchestrator = Orchestrator::new(settings, deps, events.clone());

        Self {
            orchestrator,
            rx,
            events,
            channel,
            session,
            credentials,
            audio,
        }
    }

    pub fn dispatch(&mut self, event: Event) {
        self.orchestrator.dispatch(event);
    }

    /// Let spawned tasks run, then handle everything they queued
    pub async fn settle(&mut self) {
        loop {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let mut handled = false;
            while let Ok(event) = self.rx.try_recv() {
                self.orchestrator.dispatch(event);
                handled = true;
            }
            if !handled {
                break;
            }
        }
    }

    /// Move the clock forward, then handle what fired
    pub async fn advance(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
        self.settle().await;
    }

    pub fn partial(&mut self, text: &str) {
        self.dispatch(Event::Transcription(TranscriptionEvent::Partial(
            text.to_string(),
        )));
    }

    pub fn committed(&mut self, text: &str) {
        self.dispatch(Event::Transcription(TranscriptionEvent::Committed(
            text.to_string(),
        )));
    }

    pub fn frame(&mut self, frame: InboundFrame) {
        self.dispatch(Event::Channel(ChannelEvent::Frame(frame)));
    }

    pub fn token(&mut self, text: &str) {
        self.frame(InboundFrame::AssistantToken {
            text: text.to_string(),
        });
    }

    pub fn audio_chunk(&mut self, bytes: &[u8]) {
        self.dispatch(Event::Channel(ChannelEvent::Audio(bytes.to_vec())));
    }

    pub fn playback(&mut self, id: u64, event: PlaybackEvent) {
        self.dispatch(Event::Playback { id, event });
    }

    pub fn state(&self) -> ConversationState {
        self.orchestrator.state()
    }

    pub fn view(&self) -> ViewState {
        self.orchestrator.view()
    }

    /// Start, play the greeting to the end and connect the session
    pub async fn start_listening(&mut self) {
        self.dispatch(Event::Start);
        assert_eq!(self.state(), ConversationState::Greeting);

        let id = self
            .orchestrator
            .playback_id()
            .expect("greeting playback started");
        self.playback(id, PlaybackEvent::Loaded(Duration::from_millis(2000)));
        self.playback(id, PlaybackEvent::Ended);
        self.settle().await;
        assert_eq!(self.state(), ConversationState::Listening);
    }

    /// Send one turn and stream back a reply with the given text and audio
    pub fn reply(&mut self, tokens: &[&str], audio: &[&[u8]]) {
        self.frame(InboundFrame::AssistantStart);
        for token in tokens {
            self.token(token);
        }
        for chunk in audio {
            self.audio_chunk(chunk);
        }
        self.frame(InboundFrame::AssistantDone);
    }
}

/// Serve an axum app on an ephemeral local port
pub async fn spawn_server(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    addr
}
