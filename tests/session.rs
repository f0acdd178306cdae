//! Streaming transcription session integration tests

use std::time::Duration;

use bytes::Bytes;
use sprout_gateway::quality::QualityVerdict;
use sprout_gateway::stt::{SessionConfig, SessionEvent, SessionHandle, SessionState};
use sprout_gateway::Error;
use tokio::time::timeout;

mod common;
use common::{FakeRecognizer, LONG};

fn config() -> SessionConfig {
    SessionConfig {
        connect_timeout: LONG,
        idle_timeout: LONG,
        drain_timeout: LONG,
        ..SessionConfig::default()
    }
}

async fn next(handle: &mut SessionHandle) -> SessionEvent {
    timeout(Duration::from_secs(5), handle.next_event())
        .await
        .expect("timed out waiting for session event")
        .expect("session ended")
}

async fn quiet(handle: &mut SessionHandle) -> bool {
    timeout(Duration::from_millis(100), handle.next_event()).await.is_err()
}

#[tokio::test]
async fn first_audio_connects_and_relays_in_order() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer.clone(), config());
    let input = handle.sender();

    assert_eq!(handle.state(), SessionState::Idle);

    input.audio(Bytes::from_static(b"one")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    assert_eq!(handle.state(), SessionState::Streaming);

    let mut upstream = connections.recv().await.unwrap();
    assert!(upstream.params.interim_results);
    assert!(upstream.params.punctuate);

    input.audio(Bytes::from_static(b"two")).await.unwrap();
    input.audio(Bytes::from_static(b"three")).await.unwrap();

    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"one"));
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"two"));
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"three"));
    assert_eq!(recognizer.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn partials_then_one_final_with_verdict() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    tokio::time::advance(Duration::from_millis(600)).await;
    upstream.partial("tell me", 0.52).await;
    let SessionEvent::Partial(partial) = next(&mut handle).await else {
        panic!("expected partial");
    };
    assert_eq!(partial.text, "tell me");
    assert!(!partial.is_final);

    // Partials replace each other; confidence may go down
    upstream.partial("tell me a", 0.41).await;
    let SessionEvent::Partial(partial) = next(&mut handle).await else {
        panic!("expected partial");
    };
    assert_eq!(partial.text, "tell me a");

    tokio::time::advance(Duration::from_millis(600)).await;
    upstream.finalize("Tell me a story.", 0.93).await;
    let SessionEvent::Final(result) = next(&mut handle).await else {
        panic!("expected final");
    };
    assert_eq!(result.text, "Tell me a story.");
    assert_eq!(result.verdict, QualityVerdict::Acceptable);
    assert!((1200..1300).contains(&result.elapsed_ms), "{}", result.elapsed_ms);

    assert!(quiet(&mut handle).await);
}

#[tokio::test(start_paused = true)]
async fn short_and_filler_utterances_get_rejecting_verdicts() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    tokio::time::advance(Duration::from_millis(100)).await;
    upstream.finalize("hello there friend", 0.95).await;
    let SessionEvent::Final(result) = next(&mut handle).await else {
        panic!("expected final");
    };
    assert_eq!(result.verdict, QualityVerdict::TooShortDuration);

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    upstream.next_audio().await;
    tokio::time::advance(Duration::from_millis(1000)).await;
    upstream.finalize("um", 0.9).await;
    let SessionEvent::Final(result) = next(&mut handle).await else {
        panic!("expected final");
    };
    assert_eq!(result.verdict, QualityVerdict::FillerOnly);
}

#[tokio::test]
async fn stop_drains_trailing_results_then_closes() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    input.stop().await.unwrap();
    upstream.expect_finish().await;
    upstream.finalize("I saw a big dog", 0.9).await;
    drop(upstream);

    assert!(matches!(next(&mut handle).await, SessionEvent::Final(_)));
    assert_eq!(next(&mut handle).await, SessionEvent::Closed);
    assert_eq!(handle.state(), SessionState::Idle);
    assert!(quiet(&mut handle).await);
}

#[tokio::test]
async fn audio_during_drain_opens_a_new_connection() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer.clone(), config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"first")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    input.stop().await.unwrap();
    upstream.expect_finish().await;
    input.audio(Bytes::from_static(b"second")).await.unwrap();
    drop(upstream);

    assert_eq!(next(&mut handle).await, SessionEvent::Closed);
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);

    let mut upstream = connections.recv().await.unwrap();
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"second"));
    assert_eq!(recognizer.attempts(), 2);
}

#[tokio::test]
async fn stop_while_idle_is_ignored() {
    let (recognizer, _connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer.clone(), config());

    handle.sender().stop().await.unwrap();
    assert!(quiet(&mut handle).await);
    assert_eq!(handle.state(), SessionState::Idle);
    assert_eq!(recognizer.attempts(), 0);
}

#[tokio::test]
async fn connect_failure_reports_one_error_and_allows_retry() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    recognizer.fail_next(1);
    let mut handle = SessionHandle::spawn("s1", recognizer.clone(), config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"lost")).await.unwrap();
    let SessionEvent::Error { message } = next(&mut handle).await else {
        panic!("expected error");
    };
    assert!(message.contains("401"), "{message}");
    assert!(quiet(&mut handle).await);
    assert_eq!(handle.state(), SessionState::Idle);

    input.audio(Bytes::from_static(b"retry")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);

    let mut upstream = connections.recv().await.unwrap();
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"retry"));
    assert_eq!(recognizer.attempts(), 2);
}

#[tokio::test]
async fn audio_sent_while_connecting_is_forwarded_in_order() {
    let (recognizer, mut connections) = FakeRecognizer::with_delay(Duration::from_millis(50));
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    for chunk in [&b"a"[..], b"b", b"c"] {
        input.audio(Bytes::copy_from_slice(chunk)).await.unwrap();
    }

    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"a"));
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"b"));
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"c"));
}

#[tokio::test]
async fn start_connects_without_audio() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());

    handle.sender().start().await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    assert!(connections.recv().await.is_some());
}

#[tokio::test]
async fn empty_chunk_is_dropped_without_an_event() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer.clone(), config());
    let input = handle.sender();

    input.audio(Bytes::new()).await.unwrap();
    assert!(quiet(&mut handle).await);
    assert_eq!(recognizer.attempts(), 0);

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();

    input.audio(Bytes::new()).await.unwrap();
    input.audio(Bytes::from_static(b"more")).await.unwrap();
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"pcm"));
    assert_eq!(upstream.next_audio().await, Bytes::from_static(b"more"));
    assert!(quiet(&mut handle).await);
}

#[tokio::test]
async fn empty_terminal_result_produces_no_final() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let upstream = connections.recv().await.unwrap();

    upstream.partial("", 0.0).await;
    upstream.finalize("  ", 0.0).await;
    upstream.finalize("I like trains", 0.9).await;

    let SessionEvent::Final(result) = next(&mut handle).await else {
        panic!("expected final");
    };
    assert_eq!(result.text, "I like trains");
    assert!(quiet(&mut handle).await);
}

#[tokio::test]
async fn upstream_error_surfaces_and_returns_to_idle() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let upstream = connections.recv().await.unwrap();

    upstream
        .messages
        .send(Err(Error::Upstream("socket reset".to_string())))
        .await
        .unwrap();

    let SessionEvent::Error { message } = next(&mut handle).await else {
        panic!("expected error");
    };
    assert!(message.contains("socket reset"), "{message}");
    assert_eq!(handle.state(), SessionState::Idle);
}

#[tokio::test]
async fn upstream_closing_mid_stream_is_an_error() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());

    handle.sender().audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    drop(connections.recv().await.unwrap());

    assert!(matches!(next(&mut handle).await, SessionEvent::Error { .. }));
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_reports_error() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let session = SessionConfig {
        idle_timeout: Duration::from_secs(2),
        ..config()
    };
    let mut handle = SessionHandle::spawn("s1", recognizer, session);

    handle.sender().audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let _upstream = connections.recv().await.unwrap();

    let SessionEvent::Error { message } = next(&mut handle).await else {
        panic!("expected idle timeout");
    };
    assert!(message.contains("no audio or results"), "{message}");
    assert_eq!(handle.state(), SessionState::Idle);
}

#[tokio::test]
async fn client_disconnect_closes_session_and_upstream() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let handle = SessionHandle::spawn("s1", recognizer, config());
    let mut state = handle.watch_state();
    let (input, mut events, task) = handle.into_parts();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(events.recv().await, Some(SessionEvent::Connected));
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    drop(input);

    timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(*state.borrow_and_update(), SessionState::Closed);
    assert_eq!(events.recv().await, None);

    // Upstream sees its command channel end
    assert!(upstream.commands.recv().await.is_none());
    assert!(upstream.messages.is_closed());
}

#[tokio::test(start_paused = true)]
async fn back_to_back_finals_are_timed_from_the_previous_final() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    input.audio(Bytes::from_static(b"burst")).await.unwrap();
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    tokio::time::advance(Duration::from_millis(1500)).await;
    upstream.finalize("I went to the park", 0.92).await;
    let SessionEvent::Final(first) = next(&mut handle).await else {
        panic!("expected final");
    };
    assert_eq!(first.verdict, QualityVerdict::Acceptable);
    assert!((1500..1600).contains(&first.elapsed_ms), "{}", first.elapsed_ms);

    // Recognizer splits the same burst; no audio in between
    tokio::time::advance(Duration::from_millis(2000)).await;
    upstream.finalize("and I saw a big dog", 0.9).await;
    let SessionEvent::Final(second) = next(&mut handle).await else {
        panic!("expected final");
    };
    assert_eq!(second.verdict, QualityVerdict::Acceptable);
    assert!((2000..2100).contains(&second.elapsed_ms), "{}", second.elapsed_ms);
}

#[tokio::test]
async fn oversized_timeouts_do_not_kill_the_session() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let session = SessionConfig {
        connect_timeout: Duration::MAX,
        idle_timeout: Duration::from_secs(u64::MAX),
        drain_timeout: Duration::MAX,
        ..SessionConfig::default()
    };
    let handle = SessionHandle::spawn("s1", recognizer, session);
    let (input, mut events, task) = handle.into_parts();

    input.audio(Bytes::from_static(b"pcm")).await.unwrap();
    assert_eq!(events.recv().await, Some(SessionEvent::Connected));
    let mut upstream = connections.recv().await.unwrap();
    upstream.next_audio().await;

    upstream.partial("hello", 0.8).await;
    assert!(matches!(events.recv().await, Some(SessionEvent::Partial(_))));

    input.stop().await.unwrap();
    upstream.expect_finish().await;
    drop(upstream);
    assert_eq!(events.recv().await, Some(SessionEvent::Closed));

    drop(input);
    timeout(Duration::from_secs(5), task)
        .await
        .expect("session task still running")
        .expect("session task panicked");
}

#[tokio::test]
async fn three_chunks_one_final_then_stop_closes_once() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let mut handle = SessionHandle::spawn("s1", recognizer, config());
    let input = handle.sender();

    for chunk in [&b"chunk-1"[..], b"chunk-2", b"chunk-3"] {
        input.audio(Bytes::copy_from_slice(chunk)).await.unwrap();
    }
    assert_eq!(next(&mut handle).await, SessionEvent::Connected);

    let mut upstream = connections.recv().await.unwrap();
    for expected in [&b"chunk-1"[..], b"chunk-2", b"chunk-3"] {
        assert_eq!(&upstream.next_audio().await[..], expected);
    }

    upstream.finalize("I can jump really high", 0.9).await;
    assert!(matches!(next(&mut handle).await, SessionEvent::Final(_)));
    assert!(quiet(&mut handle).await);

    input.stop().await.unwrap();
    upstream.expect_finish().await;
    drop(upstream);

    assert_eq!(next(&mut handle).await, SessionEvent::Closed);
    assert!(quiet(&mut handle).await);
    assert_eq!(handle.state(), SessionState::Idle);
}
