use super::*;

fn failed(times: u32, first: DateTime<Utc>) -> RetryState {
    let mut state = RetryState::default();
    for _ in 0..times {
        state.record_failure(first);
    }
    state
}

#[test]
fn test_no_retry() {
    let now = Utc::now();
    assert_eq!(RetryPolicy::NoRetry.next_delay(&failed(1, now), now), None);
}

#[test]
fn test_fixed_interval_allows_max_count_retries() {
    let now = Utc::now();
    let policy = RetryPolicy::fixed(Duration::from_millis(10), 3);

    assert_eq!(policy.next_delay(&failed(1, now), now), Some(Duration::from_millis(10)));
    assert_eq!(policy.next_delay(&failed(2, now), now), Some(Duration::from_millis(10)));
    assert_eq!(policy.next_delay(&failed(3, now), now), Some(Duration::from_millis(10)));
    // fourth failure: 1 initial attempt + 3 retries are used up
    assert_eq!(policy.next_delay(&failed(4, now), now), None);
}

#[test]
fn test_exponential_doubles_and_caps() {
    let now = Utc::now();
    let policy = RetryPolicy::exponential(
        Duration::from_secs(1),
        Duration::from_secs(5),
        Duration::from_secs(3600),
    );

    assert_eq!(policy.next_delay(&failed(1, now), now), Some(Duration::from_secs(1)));
    assert_eq!(policy.next_delay(&failed(2, now), now), Some(Duration::from_secs(2)));
    assert_eq!(policy.next_delay(&failed(3, now), now), Some(Duration::from_secs(4)));
    assert_eq!(policy.next_delay(&failed(4, now), now), Some(Duration::from_secs(5)));
    assert_eq!(policy.next_delay(&failed(40, now), now), Some(Duration::from_secs(5)));
}

#[test]
fn test_exponential_gives_up_after_total_duration() {
    let first = Utc::now();
    let policy = RetryPolicy::exponential(
        Duration::from_secs(10),
        Duration::from_secs(60),
        Duration::from_secs(120),
    );
    let state = failed(2, first);

    assert!(policy.next_delay(&state, first + chrono::Duration::seconds(30)).is_some());
    assert_eq!(policy.next_delay(&state, first + chrono::Duration::seconds(115)), None);
}

#[test]
fn test_record_failure_keeps_first_timestamp() {
    let first = Utc::now();
    let mut state = RetryState::default();
    state.record_failure(first);
    state.record_failure(first + chrono::Duration::seconds(5));

    assert_eq!(state.failures, 2);
    assert_eq!(state.first_failure_at, Some(first));

    state.reset();
    assert_eq!(state, RetryState::default());
}

#[test]
fn test_exponential_zero_sleep_is_floored() {
    let now = Utc::now();
    let policy = RetryPolicy::exponential(Duration::ZERO, Duration::ZERO, Duration::from_secs(1));

    assert_eq!(policy.next_delay(&failed(1, now), now), Some(Duration::from_millis(1)));
    assert_eq!(policy.next_delay(&failed(5, now), now), Some(Duration::from_millis(1)));
}

#[test]
fn test_from_config() {
    let policy = RetryPolicy::from(&RetryPolicyConfig::Fixed {
        interval_ms: 250,
        max_count: 2,
    });
    assert_eq!(policy, RetryPolicy::fixed(Duration::from_millis(250), 2));
    assert_eq!(RetryPolicy::from(&RetryPolicyConfig::None), RetryPolicy::NoRetry);
}
