use super::*;

#[test]
fn backoff_doubles_and_caps_at_60s() {
    let now = Instant::now();
    let mut state = ReconnectState::immediate(now);
    assert_eq!(state.current_backoff, Duration::from_secs(1));

    state.schedule_failure(now);
    assert_eq!(state.current_backoff, Duration::from_secs(2));

    state.schedule_failure(now);
    assert_eq!(state.current_backoff, Duration::from_secs(4));

    for _ in 0..10 {
        state.schedule_failure(now);
    }
    assert_eq!(state.current_backoff, Duration::from_secs(60));
}

#[test]
fn immediate_state_is_due_now() {
    let now = Instant::now();
    let state = ReconnectState::immediate(now);
    assert!(state.is_due(now));
}

#[test]
fn schedule_failure_pushes_next_attempt_into_the_future() {
    let now = Instant::now();
    let mut state = ReconnectState::immediate(now);
    state.schedule_failure(now);
    assert!(!state.is_due(now));
    assert!(state.is_due(now + Duration::from_secs(2)));
}
