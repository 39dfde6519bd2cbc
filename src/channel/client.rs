//! WebSocket implementation of the duplex channel

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::frame::{OutboundFrame, decode_text};
use super::{ChannelEvent, DuplexChannel};
use crate::conversation::{Event, EventSender};
use crate::{Error, Result};

enum Command {
    Send(String),
    Close,
}

/// Backend WebSocket client
///
/// The connection is opened in the background; progress arrives on the
/// orchestrator queue as [`ChannelEvent`]s.
pub struct ChannelClient {
    open: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelClient {
    /// Start connecting to `url`
    #[must_use]
    pub fn open(url: Url, events: EventSender) -> Self {
        let open = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_connection(
            url,
            Arc::clone(&open),
            command_rx,
            events,
        ));

        Self { open, commands }
    }
}

impl DuplexChannel for ChannelClient {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_transcript(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelRuntime("Not connected".to_string()));
        }

        let payload = OutboundFrame::Transcript {
            text: text.to_string(),
        }
        .encode()?;

        self.commands
            .send(Command::Send(payload))
            .map_err(|_| Error::ChannelRuntime("Connection closed".to_string()))
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run_connection(
    url: Url,
    open: Arc<AtomicBool>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
) {
    tracing::info!(url = %url, "connecting to backend");

    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::error!(error = %e, "backend connect failed");
            events.send(Event::Channel(ChannelEvent::ConnectFailed(e.to_string())));
            return;
        }
    };

    let (mut write, mut read) = stream.split();
    open.store(true, Ordering::SeqCst);
    tracing::info!("backend connected");
    events.send(Event::Channel(ChannelEvent::Opened));

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(payload)) => {
                    if let Err(e) = write.send(Message::Text(payload)).await {
                        tracing::error!(error = %e, "failed to send frame");
                        events.send(Event::Channel(ChannelEvent::Error(e.to_string())));
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    tracing::debug!("closing backend connection");
                    let _ = write.close().await;
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match decode_text(&text) {
                    Ok(Some(frame)) => {
                        events.send(Event::Channel(ChannelEvent::Frame(frame)));
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                },
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::trace!(bytes = bytes.len(), "audio chunk");
                    events.send(Event::Channel(ChannelEvent::Audio(bytes)));
                }
                Some(Ok(Message::Close(reason))) => {
                    tracing::info!(reason = ?reason, "backend closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "backend connection error");
                    events.send(Event::Channel(ChannelEvent::Error(e.to_string())));
                    break;
                }
                None => break,
            },
        }
    }

    open.store(false, Ordering::SeqCst);
    events.send(Event::Channel(ChannelEvent::Closed));
}
