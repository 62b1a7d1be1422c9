
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_channel::close_code::{CLOSE_NORMAL, CLOSE_SERVICE_RESTART};
use chat_channel::{
    ChannelError, ChannelOptions, ChannelRegistry, CloseInfo, ConnectionState, FallbackReason,
    MessageHandler, RetryCounts,
};
use fixture::{test_config, wait_for_state, wait_until, FakeConnect};

fn recording_handler() -> (Arc<MessageHandler>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Arc<MessageHandler> = Arc::new(move |payload| {
        sink.lock().unwrap().push(payload);
        Ok(())
    });
    (handler, seen)
}

#[tokio::test]
async fn sends_before_connected_flush_in_enqueue_order() {
    let (connect, state) = FakeConnect::new();
    state.hold_connects();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    handle.send("first");
    handle.send("second");
    handle.send("third");
    assert_eq!(state.connect_attempts(), 0);

    state.release_connect();
    wait_for_state(&handle, ConnectionState::Connected).await;
    wait_until("queued payloads flushed", || state.sent().len() == 3).await;

    assert_eq!(state.sent(), ["first", "second", "third"]);
    assert_eq!(state.connect_attempts(), 1);
}

#[tokio::test]
async fn sends_racing_the_connect_flush_transmit_after_queued_payloads() {
    let (connect, state) = FakeConnect::new();
    state.hold_connects();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    handle.send("q1");
    handle.send("q2");

    // Park the flush on its first transmission, then race new sends in
    // while the queued payloads are still draining.
    state.hold_sends();
    state.release_connect();
    wait_for_state(&handle, ConnectionState::Connected).await;
    handle.send("r3");
    handle.send("r4");

    state.release_sends();
    wait_until("raced payloads transmitted", || state.sent().len() == 4).await;
    assert_eq!(state.sent(), ["q1", "q2", "r3", "r4"]);
}

#[tokio::test]
async fn sends_while_connected_transmit_in_order() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;

    handle.send("a");
    handle.send("b");
    handle.send("c");
    wait_until("live sends transmitted", || state.sent().len() == 3).await;
    assert_eq!(state.sent(), ["a", "b", "c"]);
}

#[tokio::test]
async fn reopening_a_stable_channel_reuses_the_transport() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (first_handler, first_seen) = recording_handler();
    let handle = registry.open("/chat/42", first_handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;
    wait_until("channel stable", || handle.is_stable()).await;

    let (second_handler, second_seen) = recording_handler();
    let reopened = registry.open("/chat/42", second_handler, ChannelOptions::default());

    assert!(Arc::ptr_eq(&handle, &reopened));
    assert_eq!(state.connect_attempts(), 1);

    // The new consumer is attached to the existing transport.
    state.push_message("hello");
    wait_until("message reaches new consumer", || {
        second_seen.lock().unwrap().len() == 1
    })
    .await;
    assert!(first_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reopening_a_stable_channel_attaches_the_new_fallback() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let stale_calls: Arc<Mutex<Vec<FallbackReason>>> = Arc::new(Mutex::new(Vec::new()));
    let stale_sink = Arc::clone(&stale_calls);
    let (handler, _seen) = recording_handler();
    let handle = registry.open(
        "/chat/42",
        handler,
        ChannelOptions {
            subprotocols: Vec::new(),
            on_fallback: Some(Arc::new(move |reason, _counts| {
                stale_sink.lock().unwrap().push(reason);
            })),
        },
    );
    wait_for_state(&handle, ConnectionState::Connected).await;
    wait_until("channel stable", || handle.is_stable()).await;

    let fresh_calls: Arc<Mutex<Vec<FallbackReason>>> = Arc::new(Mutex::new(Vec::new()));
    let fresh_sink = Arc::clone(&fresh_calls);
    let (handler, _seen) = recording_handler();
    let reopened = registry.open(
        "/chat/42",
        handler,
        ChannelOptions {
            subprotocols: Vec::new(),
            on_fallback: Some(Arc::new(move |reason, _counts| {
                fresh_sink.lock().unwrap().push(reason);
            })),
        },
    );
    assert!(Arc::ptr_eq(&handle, &reopened));

    state.push_close(CloseInfo::new(4401, "unauthorized"));
    wait_for_state(&handle, ConnectionState::Error).await;

    assert_eq!(
        *fresh_calls.lock().unwrap(),
        [FallbackReason::Rejected { close_code: 4401 }]
    );
    assert!(stale_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rapid_remounts_collapse_into_one_connection_attempt() {
    let (connect, state) = FakeConnect::new();
    let config = test_config().with_connect_debounce(Duration::from_millis(20));
    let registry = ChannelRegistry::with_connector(config, connect);

    // Three mount/unmount cycles in the same tick; no await in between.
    let (handler_a, _) = recording_handler();
    let (handler_b, _) = recording_handler();
    let (handler_c, _) = recording_handler();
    let _first = registry.open("/chat/42", handler_a, ChannelOptions::default());
    let _second = registry.open("/chat/42", handler_b, ChannelOptions::default());
    let survivor = registry.open("/chat/42", handler_c, ChannelOptions::default());

    wait_for_state(&survivor, ConnectionState::Connected).await;
    assert_eq!(state.connect_attempts(), 1);
}

#[tokio::test]
async fn abnormal_close_reconnects_after_backoff() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;

    state.push_close(CloseInfo::abnormal("connection reset"));
    wait_until("reconnect attempted", || state.connect_attempts() == 2).await;
    wait_for_state(&handle, ConnectionState::Connected).await;
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;

    state.push_close(CloseInfo::new(CLOSE_NORMAL, "bye"));
    wait_for_state(&handle, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.connect_attempts(), 1);
    assert_ne!(handle.state(), ConnectionState::Error);
}

#[tokio::test]
async fn rejection_reaches_error_state_and_fallback() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let fallback_calls: Arc<Mutex<Vec<(FallbackReason, RetryCounts)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let fallback_sink = Arc::clone(&fallback_calls);
    let options = ChannelOptions {
        subprotocols: Vec::new(),
        on_fallback: Some(Arc::new(move |reason, counts| {
            fallback_sink.lock().unwrap().push((reason, counts));
        })),
    };

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, options);
    wait_for_state(&handle, ConnectionState::Connected).await;

    state.push_close(CloseInfo::new(4401, "unauthorized"));
    wait_for_state(&handle, ConnectionState::Error).await;

    let calls = fallback_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, FallbackReason::Rejected { close_code: 4401 });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.connect_attempts(), 1);
}

#[tokio::test]
async fn close_suppresses_retries_and_callbacks() {
    let (connect, state) = FakeConnect::new();
    state.fail_connects(true);
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_until("first attempt made", || state.connect_attempts() >= 1).await;

    handle.close();
    wait_for_state(&handle, ConnectionState::Disconnected).await;
    let attempts_at_close = state.connect_attempts();

    // Well past every pending backoff delay in the test config.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.connect_attempts(), attempts_at_close);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn restart_close_waits_for_health_before_reconnecting() {
    let (connect, state) = FakeConnect::new();
    state.set_healthy(false);
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;

    state.push_close(CloseInfo::new(CLOSE_SERVICE_RESTART, "deploying"));
    wait_until("several failed probes", || state.health_probes() >= 2).await;
    assert_eq!(state.connect_attempts(), 1);

    state.set_healthy(true);
    wait_until("health-gated reconnect", || state.connect_attempts() == 2).await;
    wait_for_state(&handle, ConnectionState::Connected).await;
}

#[tokio::test]
async fn inbound_batches_preserve_order_and_isolate_failures() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Arc<MessageHandler> = Arc::new(move |payload| {
        let event: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|err| ChannelError::MalformedPayload(err.to_string()))?;
        let text = event["text"].as_str().unwrap_or_default().to_string();
        sink.lock().unwrap().push(text);
        Ok(())
    });

    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;

    state.push_message(r#"{"text":"m1"}"#);
    state.push_message("not json");
    state.push_message(r#"{"text":"m2"}"#);
    state.push_message(r#"{"text":"m3"}"#);

    wait_until("good payloads delivered", || seen.lock().unwrap().len() == 3).await;
    assert_eq!(*seen.lock().unwrap(), ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn inbound_buffered_at_transport_loss_is_delivered() {
    let (connect, state) = FakeConnect::new();
    // A batch interval the test will never reach: only the loss path can
    // deliver these payloads.
    let config = test_config().with_batch_interval(Duration::from_secs(30));
    let registry = ChannelRegistry::with_connector(config, connect);

    let (handler, seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, ChannelOptions::default());
    wait_for_state(&handle, ConnectionState::Connected).await;
    // Let the interval's immediate first tick pass with an empty buffer.
    tokio::time::sleep(Duration::from_millis(20)).await;

    state.push_message("m1");
    state.push_message("m2");
    state.push_close(CloseInfo::abnormal("connection reset"));

    wait_until("buffered payloads delivered", || {
        seen.lock().unwrap().len() == 2
    })
    .await;
    assert_eq!(*seen.lock().unwrap(), ["m1", "m2"]);
    wait_until("reconnect attempted", || state.connect_attempts() == 2).await;
}

#[tokio::test]
async fn empty_logical_path_performs_no_network_action() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let handle = registry.open("", handler, ChannelOptions::default());

    assert_eq!(handle.state(), ConnectionState::Disconnected);
    handle.send("dropped");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.connect_attempts(), 0);
}

#[tokio::test]
async fn opening_a_different_path_tears_down_the_prior_channel() {
    let (connect, state) = FakeConnect::new();
    let registry = ChannelRegistry::with_connector(test_config(), connect);

    let (handler, _seen) = recording_handler();
    let first = registry.open("/chat/1", handler, ChannelOptions::default());
    wait_for_state(&first, ConnectionState::Connected).await;

    let (handler, _seen) = recording_handler();
    let second = registry.open("/chat/2", handler, ChannelOptions::default());
    wait_for_state(&second, ConnectionState::Connected).await;

    assert!(first.is_closed());
    assert_eq!(state.connect_attempts(), 2);
    assert_eq!(state.normal_closes(), 1);
}

#[tokio::test]
async fn retry_budget_exhaustion_reports_attempt_counts() {
    let (connect, state) = FakeConnect::new();
    state.fail_connects(true);
    let config = test_config().with_retry_limits(2, 20);
    let registry = ChannelRegistry::with_connector(config, connect);

    let fallback_calls: Arc<Mutex<Vec<(FallbackReason, RetryCounts)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let fallback_sink = Arc::clone(&fallback_calls);
    let options = ChannelOptions {
        subprotocols: Vec::new(),
        on_fallback: Some(Arc::new(move |reason, counts| {
            fallback_sink.lock().unwrap().push((reason, counts));
        })),
    };

    let (handler, _seen) = recording_handler();
    let handle = registry.open("/chat/42", handler, options);

    // Cycle budget of 2: initial attempt plus two retries, then give up.
    wait_for_state(&handle, ConnectionState::Error).await;
    let calls = fallback_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, FallbackReason::RetryBudgetExhausted);
    assert_eq!(calls[0].1.cycle, 2);
    assert_eq!(state.connect_attempts(), 3);
}
