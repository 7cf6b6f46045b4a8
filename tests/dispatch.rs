//! Dispatcher integration tests
//!
//! Drive the whole pipeline with pushed transcripts and a recording sink.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use voxpanel::config::{DocumentFormat, parse_document};
use voxpanel::voice::{ChannelSource, Transcript};
use voxpanel::{Dispatcher, DispatcherStatus, Error, Result, RetryPolicy, TranscriptSource};

mod common;

use common::{RecordingSink, config};

/// Feed `utterances` through a fresh dispatcher and wait for it to finish
async fn dispatch(json: &str, utterances: &[&str]) -> (RecordingSink, voxpanel::DispatcherHandle) {
    let sink = RecordingSink::new();
    let (dispatcher, handle) = Dispatcher::new(&config(json), Box::new(sink.clone())).unwrap();

    let (sender, source) = ChannelSource::pair();
    for utterance in utterances {
        sender.send(*utterance).await.unwrap();
    }
    drop(sender);

    tokio::time::timeout(Duration::from_secs(10), dispatcher.run(Box::new(source)))
        .await
        .expect("dispatcher finished");
    (sink, handle)
}

fn last_frame(sink: &RecordingSink) -> Vec<String> {
    sink.log().lines().last().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_show_ip_end_to_end() {
    let json = r#"{"commands": {"show ip": {"action": "show_ip"}}}"#;
    let (sink, handle) = dispatch(json, &["pi show ip"]).await;

    let frame = last_frame(&sink);
    assert_eq!(frame.len(), 2);
    assert_eq!(frame[0], "IP Address:");
    assert!(!frame[1].is_empty());

    let log = sink.log();
    assert_eq!(log.lines()[0], vec!["Voice Ready", "Say 'pi ...'"]);
    assert!(log.statuses.contains(&DispatcherStatus::Heard));
    assert!(log.statuses.contains(&DispatcherStatus::Executing("show ip".to_string())));
    assert!(log.statuses.contains(&DispatcherStatus::Result));
    assert!(log.shut_down);

    let history = handle.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].command.as_deref(), Some("show ip"));
}

#[tokio::test]
async fn test_unknown_command_frame() {
    let (sink, handle) = dispatch(r#"{"commands": {}}"#, &["pi do a barrel roll"]).await;

    assert_eq!(last_frame(&sink), vec!["Unknown command", "do a barrel roll"]);
    assert!(sink.log().statuses.contains(&DispatcherStatus::Unknown));
    assert_eq!(handle.history()[0].command, None);
}

#[tokio::test]
async fn test_custom_unknown_text() {
    let (sink, _) = dispatch(
        r#"{"messages": {"unknown_command": "Huh?"}}"#,
        &["pi fly"],
    )
    .await;

    assert_eq!(last_frame(&sink), vec!["Huh?", "fly"]);
}

#[tokio::test]
async fn test_error_responses_replace_unknown_text() {
    let (sink, _) = dispatch(
        r#"{"messages": {"unknown_command": "Huh?", "error_responses": ["Say again?"]}}"#,
        &["pi fly"],
    )
    .await;

    assert_eq!(last_frame(&sink), vec!["Say again?", "fly"]);
}

#[tokio::test]
async fn test_transcripts_without_wake_word_are_ignored() {
    let (sink, handle) = dispatch(
        r#"{"commands": {"clear": {"action": "clear_display"}}}"#,
        &["hello there", "pipe dream"],
    )
    .await;

    assert_eq!(sink.log().frames.len(), 1, "only the startup frame");
    assert!(handle.history().is_empty());
}

#[tokio::test]
async fn test_debug_transcripts_shows_unmatched_text() {
    let (sink, _) = dispatch(r#"{"voice": {"debug_transcripts": true}}"#, &["hello there"]).await;

    assert_eq!(last_frame(&sink), vec!["Heard:", "hello there"]);
}

#[tokio::test]
async fn test_partial_transcripts_do_nothing() {
    let sink = RecordingSink::new();
    let json = r#"{"commands": {"clear": {"action": "clear_display"}}}"#;
    let (dispatcher, handle) = Dispatcher::new(&config(json), Box::new(sink.clone())).unwrap();

    let (sender, source) = ChannelSource::pair();
    sender.push(Transcript::partial("pi clear")).await.unwrap();
    drop(sender);
    dispatcher.run(Box::new(source)).await;

    assert!(handle.history().is_empty());
    assert!(!sink.log().statuses.contains(&DispatcherStatus::Processing));
}

#[tokio::test]
async fn test_clear_display_renders_blank_frame() {
    let json = r#"{"commands": {"clear": {"action": "clear_display"}}}"#;
    let (sink, _) = dispatch(json, &["pi clear"]).await;

    assert!(sink.log().frames.last().unwrap().is_blank());
}

#[tokio::test]
async fn test_busy_queue_keeps_one() {
    let json = r#"{"commands": {
        "first": {"action": "run_command", "command": "sleep 0.3; echo first",
            "display_format": ["{output}"]},
        "second": {"action": "run_command", "command": "echo second",
            "display_format": ["{output}"]},
        "third": {"action": "run_command", "command": "echo third", "display_format": ["{output}"]}
    }}"#;
    let (sink, handle) = dispatch(json, &["pi first", "pi second", "pi third"]).await;

    let frames = sink.log().lines();
    assert!(frames.contains(&vec!["first".to_string()]));
    assert!(frames.contains(&vec!["second".to_string()]));
    assert!(!frames.contains(&vec!["third".to_string()]));

    let ran: Vec<_> = handle.history().into_iter().map(|e| e.utterance).collect();
    assert_eq!(ran, vec!["first", "second"]);
}

#[tokio::test]
async fn test_busy_drop_policy() {
    let json = r#"{
        "advanced": {"busy_policy": "drop"},
        "commands": {
            "first": {"action": "run_command", "command": "sleep 0.3; echo first",
                "display_format": ["{output}"]},
            "second": {"action": "run_command", "command": "echo second",
                "display_format": ["{output}"]}
        }
    }"#;
    let (sink, handle) = dispatch(json, &["pi first", "pi second"]).await;

    assert_eq!(last_frame(&sink), vec!["first"]);
    assert_eq!(handle.history().len(), 1);
}

#[tokio::test]
async fn test_timeout_frame() {
    let json = r#"{"commands": {"hang": {"action": "run_command", "command": "sleep 5",
        "timeout": 0.2}}}"#;
    let (sink, _) = dispatch(json, &["pi hang"]).await;

    assert_eq!(last_frame(&sink), vec!["Timed out", "hang"]);
}

#[tokio::test]
async fn test_argument_reaches_command_as_spoken() {
    let json = r#"{"commands": {"say": {"action": "run_command",
        "command": "echo \"$1|$VOXPANEL_ARG\"", "display_format": ["{output}", "{arg}"]}}}"#;
    let (sink, _) = dispatch(json, &["pi say Hello, World!", "pi say -10"]).await;

    let frames = sink.log().lines();
    let spoken = vec!["Hello, World!|Hello, World!".to_string(), "Hello, World!".to_string()];
    assert!(frames.contains(&spoken));
    assert_eq!(last_frame(&sink), vec!["-10|-10", "-10"]);
}

#[tokio::test]
async fn test_timed_out_command_leaves_nothing_running() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("late");
    let json = serde_json::json!({
        "commands": {
            "hang": {
                "action": "run_command",
                "command": format!("sh -c 'sleep 1; touch \"{}\"'; true", marker.display()),
                "timeout": 0.2
            }
        }
    })
    .to_string();
    let (sink, _) = dispatch(&json, &["pi hang"]).await;

    assert_eq!(last_frame(&sink), vec!["Timed out", "hang"]);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_hidden_errors_show_generic_frame() {
    let json = r#"{"commands": {"broken": {"action": "run_command",
        "command": "echo secret >&2; exit 3", "show_errors": false}}}"#;
    let (sink, _) = dispatch(json, &["pi broken"]).await;

    assert_eq!(last_frame(&sink), vec!["Command failed", "broken"]);
}

#[tokio::test]
async fn test_shown_errors_use_stderr() {
    let json = r#"{"commands": {"broken": {"action": "run_command",
        "command": "echo boom >&2; exit 1"}}}"#;
    let (sink, _) = dispatch(json, &["pi broken"]).await;

    assert_eq!(last_frame(&sink), vec!["Error:", "boom"]);
}

#[tokio::test]
async fn test_reload_applies_to_next_utterance() {
    let sink = RecordingSink::new();
    let json = r#"{"commands": {"alpha": {"action": "custom_message", "message": "A"}}}"#;
    let (dispatcher, handle) = Dispatcher::new(&config(json), Box::new(sink.clone())).unwrap();

    let doc = parse_document(
        r#"{"commands": {"beta": {"action": "custom_message", "message": "B"}}}"#,
        DocumentFormat::Json,
    )
    .unwrap();
    assert_ok!(handle.reload(&doc));

    let (sender, source) = ChannelSource::pair();
    sender.send("pi beta").await.unwrap();
    sender.send("pi alpha").await.unwrap();
    drop(sender);
    dispatcher.run(Box::new(source)).await;

    let frames = sink.log().lines();
    assert!(frames.contains(&vec!["B".to_string()]));
    assert_eq!(frames.last().unwrap(), &vec!["Unknown command".to_string(), "alpha".to_string()]);
}

#[tokio::test]
async fn test_invalid_reload_keeps_commands() {
    let sink = RecordingSink::new();
    let json = r#"{"commands": {"alpha": {"action": "custom_message", "message": "A"}}}"#;
    let (dispatcher, handle) = Dispatcher::new(&config(json), Box::new(sink.clone())).unwrap();

    let doc = parse_document(
        r#"{"commands": {
            "beta": {"action": "custom_message", "message": "B", "aliases": ["same"]},
            "gamma": {"action": "custom_message", "message": "C", "aliases": ["same"]}
        }}"#,
        DocumentFormat::Json,
    )
    .unwrap();
    assert_err!(handle.reload(&doc));

    let (sender, source) = ChannelSource::pair();
    sender.send("pi alpha").await.unwrap();
    drop(sender);
    dispatcher.run(Box::new(source)).await;

    assert_eq!(sink.log().lines().last().unwrap(), &vec!["A".to_string()]);
}

#[tokio::test]
async fn test_shutdown_stops_running_command() {
    let sink = RecordingSink::new();
    let json = r#"{"commands": {"hang": {"action": "run_command", "command": "sleep 30",
        "timeout": 60}}}"#;
    let (dispatcher, handle) = Dispatcher::new(&config(json), Box::new(sink.clone())).unwrap();

    let (sender, source) = ChannelSource::pair();
    sender.send("pi hang").await.unwrap();
    let task = tokio::spawn(dispatcher.run(Box::new(source)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("stopped promptly")
        .unwrap();
    assert!(sink.log().shut_down);
    drop(sender);
}

/// Source that fails once, reconnects, then replays its lines
struct FlakySource {
    failed: bool,
    lines: VecDeque<&'static str>,
}

#[async_trait]
impl TranscriptSource for FlakySource {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn next_transcript(&mut self) -> Result<Option<Transcript>> {
        if !self.failed {
            self.failed = true;
            return Err(Error::Transcript("dropped".to_string()));
        }
        Ok(self.lines.pop_front().map(Transcript::final_text))
    }

    async fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_source_failure_reconnects() {
    let sink = RecordingSink::new();
    let json = r#"{"commands": {"hello": {"action": "custom_message", "message": "hi"}}}"#;
    let (dispatcher, _handle) = Dispatcher::new(&config(json), Box::new(sink.clone())).unwrap();
    let dispatcher =
        dispatcher.with_reconnect_policy(RetryPolicy::attempts(2, Duration::from_millis(1)));

    let source = FlakySource {
        failed: false,
        lines: VecDeque::from(["pi hello"]),
    };
    tokio::time::timeout(Duration::from_secs(5), dispatcher.run(Box::new(source)))
        .await
        .expect("dispatcher finished");

    let log = sink.log();
    assert_eq!(log.lines().last().unwrap(), &vec!["hi".to_string()]);
    assert!(!log.statuses.contains(&DispatcherStatus::ListeningUnavailable));
}

/// Source that never works
struct DeadSource;

#[async_trait]
impl TranscriptSource for DeadSource {
    fn name(&self) -> &'static str {
        "dead"
    }

    async fn next_transcript(&mut self) -> Result<Option<Transcript>> {
        Err(Error::Transcript("no engine".to_string()))
    }

    async fn reconnect(&mut self) -> Result<()> {
        Err(Error::Transcript("still no engine".to_string()))
    }
}

#[tokio::test]
async fn test_exhausted_reconnects_show_unavailable() {
    let sink = RecordingSink::new();
    let (dispatcher, handle) = Dispatcher::new(&config("{}"), Box::new(sink.clone())).unwrap();
    let dispatcher = dispatcher.with_reconnect_policy(RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    });
    let task = tokio::spawn(dispatcher.run(Box::new(DeadSource)));

    let mut unavailable = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if sink.log().statuses.contains(&DispatcherStatus::ListeningUnavailable) {
            unavailable = true;
            break;
        }
    }
    handle.shutdown();
    task.await.unwrap();

    assert!(unavailable);
    assert_eq!(
        sink.log().lines().last().unwrap(),
        &vec!["Listening".to_string(), "unavailable".to_string()]
    );
}

#[tokio::test]
async fn test_reload_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voice_config.json");
    let alpha = r#"{"commands": {"alpha": {"action": "custom_message", "message": "A"}}}"#;
    std::fs::write(&path, alpha).unwrap();

    let config = voxpanel::Config::load(&path).unwrap();
    let sink = RecordingSink::new();
    let (dispatcher, handle) = Dispatcher::new(&config, Box::new(sink.clone())).unwrap();

    let beta = r#"{"commands": {"beta": {"action": "custom_message", "message": "B"}}}"#;
    std::fs::write(&path, beta).unwrap();
    assert_ok!(handle.reload_file());
    assert!(handle.commands().get("beta").is_some());

    std::fs::write(&path, r#"{"commands": {"gamma": {"action": "launch_rocket"}}}"#).unwrap();
    assert!(matches!(handle.reload_file(), Err(Error::Validation(_))));
    assert!(handle.commands().get("beta").is_some());

    let (sender, source) = ChannelSource::pair();
    sender.send("pi beta").await.unwrap();
    drop(sender);
    dispatcher.run(Box::new(source)).await;

    assert_eq!(sink.log().lines().last().unwrap(), &vec!["B".to_string()]);
}
