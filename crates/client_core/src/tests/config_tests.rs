use super::*;

#[test]
fn local_timings_default_to_ai_delay_and_restart_delay() {
    let timings = LocalTimings::default();
    assert_eq!(timings.ai_delay, Duration::from_millis(400));
    assert_eq!(timings.restart_delay, Duration::from_secs(3));
}

#[test]
fn retry_delays_grow_by_factor() {
    let policy = RetryPolicy {
        attempts: 5,
        initial_delay: Duration::from_millis(100),
        factor: 3,
    };
    assert_eq!(policy.delay_before(1), Duration::from_millis(100));
    assert_eq!(policy.delay_before(2), Duration::from_millis(300));
    assert_eq!(policy.delay_before(3), Duration::from_millis(900));
}

#[test]
fn no_retry_policy_tries_once() {
    assert_eq!(RetryPolicy::none().attempts, 1);
}


#[test]
fn client_config_defaults() {
    let config = ClientConfig::default();
    assert_eq!(config.local, LocalTimings::default());
    assert_eq!(config.retry, RetryPolicy::default());
    assert_eq!(config.waiting_query_limit, 5);
    assert_eq!(config.ai_seed, None);
}
