//! Conversation integration tests
//!
//! Drives the orchestrator through whole turns with mock collaborators and
//! a paused clock.

use std::time::Duration;

use supply_voice::conversation::{ClipSource, PlaybackEvent, REPLY_MIME};
use supply_voice::{ConnectionStatus, ConversationState, Event, InboundFrame, TranscriptionEvent};

mod common;
use common::{Harness, MockChannel};

const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[tokio::test(start_paused = true)]
async fn test_bricks_order_end_to_end() {
    let mut h = Harness::new();
    h.start_listening().await;
    assert_eq!(h.session.connects(), 1);
    assert!(h.view().recording);
    assert_eq!(h.view().status_text(), "Listening...");

    h.partial("need");
    h.advance(ms(500)).await;
    h.partial("need five bricks");
    assert_eq!(h.view().visible_text(), Some("need five bricks"));

    h.advance(ms(1499)).await;
    assert!(h.channel.sent().is_empty());

    h.advance(ms(2)).await;
    assert_eq!(h.channel.sent(), vec!["need five bricks"]);
    assert_eq!(h.state(), ConversationState::Thinking);
    assert!(h.orchestrator.turn_sent());

    let disconnects = h.session.disconnects();
    h.frame(InboundFrame::AssistantStart);
    assert!(h.session.disconnects() > disconnects);
    assert!(!h.view().recording);

    h.token("Sure, ");
    assert_eq!(h.state(), ConversationState::Responding);
    h.token("five bricks.");
    h.audio_chunk(&[1, 2]);
    h.audio_chunk(&[3]);
    h.frame(InboundFrame::AssistantDone);

    let clip = h.audio.last_clip().expect("reply playback started");
    assert_eq!(clip.source, ClipSource::Memory(vec![1, 2, 3]));
    assert_eq!(clip.mime, REPLY_MIME);
    assert_eq!(h.state(), ConversationState::Responding);

    let id = h.orchestrator.playback_id().expect("active playback");
    h.playback(id, PlaybackEvent::Loaded(ms(1000)));
    assert!(h.view().response_visible);
    assert_eq!(h.view().displayed_response, "");

    h.advance(ms(300)).await;
    assert_eq!(h.view().displayed_response, "Sure,");
    h.advance(ms(600)).await;
    assert_eq!(h.view().displayed_response, "Sure, five bricks.");

    h.advance(ms(100)).await;
    h.playback(id, PlaybackEvent::Ended);
    assert_eq!(h.state(), ConversationState::Listening);
    assert!(!h.orchestrator.turn_sent());

    h.settle().await;
    assert_eq!(h.session.connects(), 2);
    assert!(h.view().recording);

    h.advance(ms(999)).await;
    assert!(h.view().response_visible);
    h.advance(ms(2)).await;
    assert!(!h.view().response_visible);
}

#[tokio::test(start_paused = true)]
async fn test_streamed_tokens_play_as_one_reply() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");

    h.reply(&["Sure, ", "five bricks ", "added."], &[&[7, 8, 9]]);
    let clip = h.audio.last_clip().expect("reply playback started");
    assert_eq!(clip.source, ClipSource::Memory(vec![7, 8, 9]));

    let id = h.orchestrator.playback_id().expect("active playback");
    h.playback(id, PlaybackEvent::Loaded(ms(1200)));
    h.advance(ms(1300)).await;
    assert_eq!(h.view().displayed_response, "Sure, five bricks added.");

    h.playback(id, PlaybackEvent::Ended);
    assert_eq!(h.state(), ConversationState::Listening);
    assert_eq!(h.view().displayed_response, "Sure, five bricks added.");
}

#[tokio::test(start_paused = true)]
async fn test_restarted_reply_drops_earlier_text() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("how much is sand");

    h.frame(InboundFrame::AssistantStart);
    h.token("Sure, ");
    h.token("five bricks");
    assert_eq!(h.state(), ConversationState::Responding);

    h.frame(InboundFrame::AssistantStart);
    assert_eq!(h.state(), ConversationState::Thinking);
    h.token("Sand is out of stock.");
    h.frame(InboundFrame::AssistantDone);

    assert_eq!(h.state(), ConversationState::Listening);
    assert_eq!(h.view().displayed_response, "Sand is out of stock.");
}

#[tokio::test(start_paused = true)]
async fn test_leftover_reply_after_restart_resumes_listening() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");
    assert_eq!(h.state(), ConversationState::Thinking);

    h.dispatch(Event::Stop);
    h.start_listening().await;
    assert_eq!(h.session.connects(), 2);
    assert!(h.view().recording);

    // The backend still streams the answer to the abandoned turn
    h.reply(&["Sure."], &[]);
    assert_eq!(h.state(), ConversationState::Listening);
    assert_eq!(h.view().displayed_response, "Sure.");

    h.settle().await;
    assert_eq!(h.session.connects(), 3);
    assert!(h.view().recording);

    h.partial("and sand");
    h.advance(ms(1501)).await;
    assert_eq!(h.channel.sent(), vec!["need five bricks", "and sand"]);
}

#[tokio::test(start_paused = true)]
async fn test_tokens_without_reply_start_are_ignored() {
    let mut h = Harness::new();
    h.start_listening().await;

    h.token("stray");
    h.audio_chunk(&[1]);
    h.frame(InboundFrame::AssistantDone);
    assert_eq!(h.state(), ConversationState::Listening);
    assert!(h.view().recording);
    assert_eq!(h.audio.play_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_done_releases_reply_audio() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");
    h.reply(&["Sure."], &[&[1]]);
    let id = h.orchestrator.playback_id().expect("active playback");

    h.frame(InboundFrame::AssistantDone);
    assert!(h.audio.stopped(id));
    assert_eq!(h.state(), ConversationState::Listening);
    h.settle().await;

    h.committed("and sand");
    assert_eq!(h.state(), ConversationState::Thinking);

    // The released playback cannot end the new turn
    h.playback(id, PlaybackEvent::Ended);
    assert_eq!(h.state(), ConversationState::Thinking);
    assert!(h.orchestrator.turn_sent());
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_turn_in_flight() {
    let mut h = Harness::new();
    h.start_listening().await;

    h.partial("need five bricks");
    h.committed("need five bricks");
    assert_eq!(h.channel.sent(), vec!["need five bricks"]);

    let arms = h.orchestrator.silence_arms();
    h.partial("and a pallet of sand");
    h.committed("and a pallet of sand");
    h.advance(ms(5000)).await;

    assert_eq!(h.channel.sent().len(), 1);
    assert_eq!(h.orchestrator.silence_arms(), arms);
    assert_eq!(h.state(), ConversationState::Thinking);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_partials_arm_once() {
    let mut h = Harness::new();
    h.start_listening().await;

    h.partial("need five bricks");
    h.partial("need five bricks");
    h.partial("need five bricks (silence)");
    assert_eq!(h.orchestrator.silence_arms(), 1);

    // The unchanged partials did not push the commit back
    h.advance(ms(1501)).await;
    assert_eq!(h.channel.sent(), vec!["need five bricks"]);
}

#[tokio::test(start_paused = true)]
async fn test_committed_strips_annotation() {
    let mut h = Harness::new();
    h.start_listening().await;

    h.committed("need five bricks (silence)");
    assert_eq!(h.channel.sent(), vec!["need five bricks"]);
}

#[tokio::test(start_paused = true)]
async fn test_done_without_audio_resets_immediately() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("how much is sand");

    h.reply(&["Sand is out of stock."], &[]);
    assert_eq!(h.state(), ConversationState::Listening);
    assert!(!h.orchestrator.turn_sent());
    assert_eq!(h.audio.play_count(), 1);
    assert_eq!(h.view().displayed_response, "Sand is out of stock.");

    h.settle().await;
    assert_eq!(h.session.connects(), 2);

    h.advance(ms(2999)).await;
    assert!(h.view().response_visible);
    h.advance(ms(2)).await;
    assert!(!h.view().response_visible);
}

#[tokio::test(start_paused = true)]
async fn test_playback_failure_recovers_without_fade() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");
    h.reply(&["Sure."], &[&[0xff, 0xfb]]);

    let id = h.orchestrator.playback_id().expect("active playback");
    h.playback(id, PlaybackEvent::Failed("decode error".to_string()));

    assert_eq!(h.state(), ConversationState::Listening);
    assert!(!h.orchestrator.turn_sent());
    assert_eq!(h.view().displayed_response, "Sure.");

    h.advance(ms(10_000)).await;
    assert!(h.view().response_visible);
    assert_eq!(h.session.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_new_reply_stops_previous_playback() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");
    h.reply(&["Sure."], &[&[1]]);
    let first = h.orchestrator.playback_id().expect("active playback");

    h.frame(InboundFrame::AssistantStart);
    assert!(h.audio.stopped(first));
    assert_eq!(h.orchestrator.playback_id(), None);

    // Late events from the released playback change nothing
    h.playback(first, PlaybackEvent::Ended);
    assert_eq!(h.state(), ConversationState::Thinking);
    assert!(h.orchestrator.turn_sent());
}

#[tokio::test(start_paused = true)]
async fn test_second_turn_after_reply() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");
    h.reply(&["Sure."], &[]);
    h.settle().await;

    h.partial("and sand");
    h.advance(ms(1501)).await;
    assert_eq!(h.channel.sent(), vec!["need five bricks", "and sand"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_commit() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.partial("need five bricks");

    h.dispatch(Event::Stop);
    assert_eq!(h.state(), ConversationState::Idle);
    assert!(!h.view().recording);

    h.advance(ms(5000)).await;
    assert!(h.channel.sent().is_empty());

    // Nothing is heard after stopping
    h.partial("order cement");
    h.advance(ms(5000)).await;
    assert!(h.channel.sent().is_empty());
    assert_eq!(h.orchestrator.silence_arms(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reply_releases_playback() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.committed("need five bricks");
    h.reply(&["Sure, five bricks."], &[&[1, 2, 3]]);
    let id = h.orchestrator.playback_id().expect("active playback");
    h.playback(id, PlaybackEvent::Loaded(ms(2000)));

    h.dispatch(Event::Toggle);
    assert_eq!(h.state(), ConversationState::Idle);
    assert!(h.audio.stopped(id));
    assert!(!h.orchestrator.turn_sent());

    let shown = h.view().displayed_response;
    h.advance(ms(5000)).await;
    assert_eq!(h.view().displayed_response, shown);
    assert_eq!(h.session.connects(), 1);

    // Frames for the abandoned reply are ignored while idle
    h.token("more");
    h.frame(InboundFrame::AssistantDone);
    assert_eq!(h.state(), ConversationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_late_connect_after_stop_is_closed() {
    let mut h = Harness::new();
    h.session
        .delay_ms
        .store(200, std::sync::atomic::Ordering::SeqCst);

    h.dispatch(Event::Start);
    let id = h.orchestrator.playback_id().expect("greeting playback");
    h.playback(id, PlaybackEvent::Ended);
    h.settle().await;
    assert_eq!(h.session.connects(), 1);

    h.dispatch(Event::Stop);
    let disconnects = h.session.disconnects();

    h.advance(ms(250)).await;
    assert_eq!(h.state(), ConversationState::Idle);
    assert!(!h.view().recording);
    assert_eq!(h.session.disconnects(), disconnects + 1);
}

#[tokio::test(start_paused = true)]
async fn test_greeting_fallback_when_audio_fails() {
    let mut h = Harness::new();
    h.audio
        .fail_start
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.dispatch(Event::Start);
    assert_eq!(h.state(), ConversationState::Greeting);
    assert!(h.view().response_visible);
    assert!(h.view().displayed_response.starts_with("Hi, I can help"));

    h.advance(ms(1499)).await;
    assert_eq!(h.session.connects(), 0);

    h.advance(ms(2)).await;
    assert_eq!(h.session.connects(), 1);
    assert_eq!(h.state(), ConversationState::Listening);

    // Greeting fades after listening starts
    h.advance(ms(4001)).await;
    assert!(!h.view().response_visible);
}

#[tokio::test(start_paused = true)]
async fn test_greeting_reveal_follows_audio() {
    let mut h = Harness::new();
    h.dispatch(Event::Start);
    let id = h.orchestrator.playback_id().expect("greeting playback");

    h.playback(id, PlaybackEvent::Loaded(ms(5000)));
    assert_eq!(h.view().displayed_response, "");
    h.advance(ms(4500)).await;
    assert!(h.view().displayed_response.starts_with("Hi, I can help"));
    assert_eq!(h.state(), ConversationState::Greeting);
}

#[tokio::test(start_paused = true)]
async fn test_credential_failure_returns_to_idle() {
    let mut h = Harness::new();
    h.credentials
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.dispatch(Event::Start);
    let id = h.orchestrator.playback_id().expect("greeting playback");
    h.playback(id, PlaybackEvent::Ended);
    h.settle().await;

    assert_eq!(h.state(), ConversationState::Idle);
    assert!(!h.view().recording);
    assert_eq!(h.session.connects(), 0);
    assert_eq!(
        h.view().connection,
        ConnectionStatus::Error("Error: Missing token".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_open_channel() {
    let mut h = Harness::with_channel(MockChannel::default());
    h.dispatch(Event::Start);

    assert_eq!(h.state(), ConversationState::Idle);
    assert_eq!(h.audio.play_count(), 0);
    assert!(h.view().connection.is_error());
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_returns_to_listening() {
    let mut h = Harness::new();
    h.start_listening().await;
    h.channel
        .fail_send
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.committed("need five bricks");
    assert_eq!(h.state(), ConversationState::Listening);
    assert!(!h.orchestrator.turn_sent());
    assert!(h.view().connection.is_error());
}

#[tokio::test(start_paused = true)]
async fn test_session_error_keeps_state() {
    let mut h = Harness::new();
    h.start_listening().await;

    h.dispatch(Event::Transcription(TranscriptionEvent::AuthError(
        "invalid token".to_string(),
    )));
    assert_eq!(h.state(), ConversationState::Listening);
    assert!(!h.view().recording);
    assert_eq!(
        h.view().status_text(),
        "Error: invalid token"
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_channel() {
    let mut h = Harness::new();
    h.start_listening().await;

    h.dispatch(Event::Shutdown);
    assert_eq!(h.state(), ConversationState::Idle);
    assert!(h.channel.closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new();
    let channel = h.channel.clone();
    let events = h.events.clone();

    let task = tokio::spawn(h.orchestrator.run(h.rx));
    events.send(Event::Shutdown);
    task.await.expect("run completes");

    assert!(channel.closed.load(std::sync::atomic::Ordering::SeqCst));
}
