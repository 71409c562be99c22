//! End-to-end session tests against fake pipeline tools.

#![cfg(unix)]

mod common;

use castwarden::{
    PipelineExit, PipelineStatus, Session, SessionConfig, SessionState, SignalKind,
    TerminationReason,
};
use common::{launch_with_script, EXITS_WITH_1, IGNORES_SIGTERM, RUNS_FOREVER};
use std::time::Duration;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_missing_tool_settles_as_spawn_failure() {
    let config = SessionConfig::builder()
        .tool("/nonexistent/castwarden-ffmpeg")
        .display(":1")
        .publish_url("rtmp://ingest.example.net/live")
        .size(1280, 720)
        .build()
        .unwrap();

    let session = Session::launch(config);
    let outcome = tokio::time::timeout(TEST_TIMEOUT, session.wait())
        .await
        .expect("spawn failure should settle immediately");

    assert!(matches!(outcome.reason, TerminationReason::SpawnFailed(_)));
    assert_eq!(outcome.exit, None);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(*session.state().borrow(), SessionState::Terminated);
    assert_eq!(session.pipeline_status(), PipelineStatus::NotStarted);

    // Requests after the fact go nowhere
    assert!(!session.stop(SignalKind::Terminate));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_ends_session_after_max_duration() {
    let (_tool, session) = launch_with_script(RUNS_FOREVER, |c| c.max_duration_secs(5));
    assert_eq!(*session.state().borrow(), SessionState::Running);

    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(*session.state().borrow(), SessionState::Running);
    assert_eq!(session.pipeline_status(), PipelineStatus::Running);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let outcome = session.wait().await;

    assert_eq!(outcome.reason, TerminationReason::WatchdogExpired);
    assert!(matches!(outcome.exit, Some(PipelineExit::Signal(_))));
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(*session.state().borrow(), SessionState::Terminated);
}

#[tokio::test]
async fn test_spontaneous_exit_is_reported() {
    let (_tool, session) = launch_with_script(EXITS_WITH_1, |c| c);

    let outcome = tokio::time::timeout(TEST_TIMEOUT, session.wait())
        .await
        .unwrap();

    assert_eq!(
        outcome.reason,
        TerminationReason::ProcessExited(PipelineExit::Code(1))
    );
    assert_eq!(outcome.exit, Some(PipelineExit::Code(1)));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(session.pipeline_status(), PipelineStatus::ExitedNormally(1));
}

#[tokio::test]
async fn test_repeated_stop_requests_yield_one_outcome() {
    let (_tool, session) = launch_with_script(RUNS_FOREVER, |c| c);

    assert!(session.stop(SignalKind::Terminate));
    assert!(session.stop(SignalKind::Interrupt));
    assert!(session.stop(SignalKind::Terminate));

    let outcome = tokio::time::timeout(TEST_TIMEOUT, session.wait())
        .await
        .unwrap();

    assert!(matches!(outcome.reason, TerminationReason::ExternalSignal(_)));
    assert_eq!(outcome.exit, Some(PipelineExit::Signal(libc::SIGTERM)));
    assert_eq!(outcome.exit_code(), 0);

    // Every waiter sees the same outcome
    let again = session.wait().await;
    assert_eq!(again, outcome);
}

#[tokio::test]
async fn test_stubborn_pipeline_is_killed_after_grace() {
    let (_tool, session) = launch_with_script(IGNORES_SIGTERM, |c| c.grace_secs(1));
    // Let the shell install its trap before asking it to stop.
    tokio::time::sleep(Duration::from_millis(300)).await;

    session.stop(SignalKind::Request);
    let outcome = tokio::time::timeout(TEST_TIMEOUT, session.wait())
        .await
        .unwrap();

    assert_eq!(
        outcome.reason,
        TerminationReason::ExternalSignal(SignalKind::Request)
    );
    assert_eq!(outcome.exit, Some(PipelineExit::Signal(libc::SIGKILL)));
    assert_eq!(*session.state().borrow(), SessionState::Terminated);
}

#[tokio::test]
async fn test_state_subscribers_see_termination() {
    let (_tool, session) = launch_with_script(RUNS_FOREVER, |c| c);
    let mut state = session.state();

    session.stop(SignalKind::Hangup);
    let seen = tokio::time::timeout(TEST_TIMEOUT, state.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .map(|s| *s)
        .unwrap();
    assert_eq!(seen, SessionState::Terminated);
}
