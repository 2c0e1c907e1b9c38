mod common;

use churn_common::EndpointSpec;
use churn_harness::fleet::broken::BrokenSet;
use churn_harness::fleet::consumers::ConsumerSet;
use churn_harness::fleet::failing::FailingSet;
use churn_harness::fleet::publishers::PublisherSet;
use churn_harness::fleet::DisconnectPolicy;
use churn_harness::{HarnessError, Outcome, Verdict, Verifier};
use common::FakeClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

const RUN: u64 = 42;

fn spec(uri: &str, queue: Option<&str>, interval_ms: Option<u64>, count: usize) -> EndpointSpec {
    EndpointSpec {
        uri: uri.to_string(),
        queue_name: queue.map(str::to_string),
        send_interval_ms: interval_ms,
        count,
    }
}

fn strict() -> Arc<DisconnectPolicy> {
    Arc::new(DisconnectPolicy::new(false))
}

#[tokio::test(start_paused = true)]
async fn test_publishers_feed_consumers_in_order() {
    let client = Arc::new(FakeClient::default());
    let (outcome, mut verdicts) = Outcome::channel();
    let verifier = Arc::new(Verifier::new(RUN));

    let consumers = ConsumerSet::new(
        Arc::clone(&client),
        vec![spec("amqp://proxy/", Some("q1"), None, 1)],
        Arc::clone(&verifier),
        500,
        strict(),
        outcome.clone(),
    );
    let publishers = PublisherSet::new(
        Arc::clone(&client),
        vec![spec("amqp://proxy/", Some("q1"), Some(10), 3)],
        RUN,
        strict(),
        outcome.clone(),
    );

    consumers.start();
    assert!(consumers.started());
    publishers.start();
    assert_eq!(publishers.len(), 3);
    assert!(publishers.started());

    tokio::time::sleep(Duration::from_millis(95)).await;
    publishers.stop();

    for id in 0..3 {
        let sent = publishers.get(id).unwrap().last_sent_index();
        assert!(sent >= 5, "publisher {} only sent {}", id, sent);
        assert_eq!(verifier.last_received(id), sent);
    }
    assert!(verdicts.try_verdict().is_none());
}

#[tokio::test]
async fn test_publishers_not_started_until_all_connected() {
    let client = Arc::new(FakeClient::refusing(&["down"]));
    let policy = Arc::new(DisconnectPolicy::new(true));
    let (outcome, _verdicts) = Outcome::channel();

    let publishers = PublisherSet::new(
        client,
        vec![
            spec("amqp://proxy/up", Some("q"), Some(1000), 2),
            spec("amqp://proxy/down", Some("q"), Some(1000), 1),
        ],
        RUN,
        policy,
        outcome,
    );
    publishers.start();

    assert_eq!(publishers.len(), 3);
    assert!(!publishers.started());
    assert!(publishers.get(0).unwrap().is_connected());
    assert!(!publishers.get(2).unwrap().is_connected());
    publishers.stop();
}

#[tokio::test]
async fn test_consumers_not_started_while_one_is_refused() {
    let client = Arc::new(FakeClient::refusing(&["down"]));
    let (outcome, _verdicts) = Outcome::channel();

    let consumers = ConsumerSet::new(
        client,
        vec![
            spec("amqp://proxy/", Some("q1"), None, 1),
            spec("amqp://proxy/down", Some("q2"), None, 1),
        ],
        Arc::new(Verifier::new(RUN)),
        500,
        Arc::new(DisconnectPolicy::new(true)),
        outcome,
    );
    consumers.start();

    assert_eq!(consumers.len(), 2);
    assert!(!consumers.started());
}

#[tokio::test]
async fn test_publisher_ids_are_sequential_across_specs() {
    let client = Arc::new(FakeClient::default());
    let (outcome, _verdicts) = Outcome::channel();

    let publishers = PublisherSet::new(
        client,
        vec![
            spec("amqp://proxy/", Some("a"), Some(1000), 2),
            spec("amqp://proxy/foo", Some("b"), Some(1000), 3),
        ],
        RUN,
        strict(),
        outcome,
    );
    publishers.start();

    for id in 0..5 {
        assert_eq!(publishers.get(id).unwrap().id(), id);
    }
    assert!(publishers.get(5).is_none());
    publishers.stop();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_send_halts_loop_without_closing() {
    let client = Arc::new(FakeClient::default());
    client.reject_publishes();
    let (outcome, mut verdicts) = Outcome::channel();

    let publishers = PublisherSet::new(
        Arc::clone(&client),
        vec![spec("amqp://proxy/", Some("q"), Some(1), 1)],
        RUN,
        strict(),
        outcome,
    );
    publishers.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(publishers.get(0).unwrap().last_sent_index(), 1);
    assert!(publishers.started());
    assert!(client.opened()[0].closed_at().is_none());
    assert!(verdicts.try_verdict().is_none());
}

#[tokio::test]
async fn test_unexpected_disconnect_fails_run() {
    let client = Arc::new(FakeClient::default());
    let (outcome, mut verdicts) = Outcome::channel();
    let consumers = ConsumerSet::new(
        Arc::clone(&client),
        vec![spec("amqp://proxy/", Some("q"), None, 1)],
        Arc::new(Verifier::new(RUN)),
        500,
        strict(),
        outcome,
    );
    consumers.start();

    client.opened()[0].drop_link("CONNECTION_FORCED");

    match verdicts.try_verdict() {
        Some(Verdict::Failed(HarnessError::UnexpectedDisconnect { population, id, .. })) => {
            assert_eq!(population, "consumer");
            assert_eq!(id, 0);
        }
        other => panic!("expected unexpected-disconnect failure, got {:?}", other),
    }
    // Latched: a dropped client still counts as started
    assert!(consumers.started());
}

#[tokio::test]
async fn test_tolerated_disconnect_does_not_fail() {
    let client = Arc::new(FakeClient::default());
    let (outcome, mut verdicts) = Outcome::channel();
    let policy = Arc::new(DisconnectPolicy::new(false));
    let consumers = ConsumerSet::new(
        Arc::clone(&client),
        vec![spec("amqp://proxy/", Some("q"), None, 1)],
        Arc::new(Verifier::new(RUN)),
        500,
        Arc::clone(&policy),
        outcome,
    );
    consumers.start();

    policy.set_expecting_disconnects(true);
    client.opened()[0].drop_link("CONNECTION_FORCED");

    assert!(verdicts.try_verdict().is_none());
}

#[tokio::test]
async fn test_consumer_reports_out_of_order_delivery() {
    let client = Arc::new(FakeClient::default());
    let (outcome, mut verdicts) = Outcome::channel();
    let consumers = ConsumerSet::new(
        Arc::clone(&client),
        vec![spec("amqp://proxy/", Some("q"), None, 1)],
        Arc::new(Verifier::new(RUN)),
        500,
        strict(),
        outcome.clone(),
    );
    consumers.start();

    use churn_harness::client::{ChannelSetup, ClientConnection, MessageClient};
    use churn_harness::fleet::SteadyObserver;
    use churn_harness::parser::envelope::Envelope;

    let observer = Arc::new(SteadyObserver::new("publisher", 0, strict(), outcome));
    let raw = client.connect("amqp://proxy/", ChannelSetup::publish_to("q"), observer);
    for index in [1, 2, 4] {
        let payload = Envelope::new(index, 0, RUN).to_json().unwrap();
        raw.publish("q", payload).await.unwrap();
    }

    match verdicts.try_verdict() {
        Some(Verdict::Failed(HarnessError::OutOfOrder {
            expected, received, ..
        })) => {
            assert_eq!(expected, 3);
            assert_eq!(received, 4);
        }
        other => panic!("expected OutOfOrder failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_population_never_connects() {
    let client = Arc::new(FakeClient::refusing(&["bar", "nonexistent"]));
    let (outcome, mut verdicts) = Outcome::channel();

    let failing = FailingSet::new(
        client,
        vec![
            spec("amqp://proxy/bar", None, None, 10),
            spec("amqp://proxy/nonexistent", None, None, 15),
        ],
        outcome,
    );
    failing.start();

    assert_eq!(failing.len(), 25);
    assert_eq!(failing.connect_count(), 0);
    assert_eq!(failing.disconnected_count(), 25);
    assert!(verdicts.try_verdict().is_none());
}

#[tokio::test]
async fn test_failing_connection_that_connects_fails_run() {
    let client = Arc::new(FakeClient::default());
    let (outcome, mut verdicts) = Outcome::channel();

    let failing = FailingSet::new(
        client,
        vec![spec("amqp://host/nonexistent", None, None, 1)],
        outcome,
    );
    failing.start();

    match verdicts.try_verdict() {
        Some(Verdict::Failed(HarnessError::UnexpectedConnect { population, id })) => {
            assert_eq!(population, "failing");
            assert_eq!(id, 0);
        }
        other => panic!("expected unexpected-connect failure, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_broken_clients_closed_within_kill_window() {
    let client = Arc::new(FakeClient::refusing(&["broken"]));
    let (outcome, mut verdicts) = Outcome::channel();

    let broken = BrokenSet::new(
        Arc::clone(&client),
        Vec::new(),
        vec![
            spec("amqp://proxy/broken", None, None, 50),
            spec("amqp://proxy/broken2", None, None, 50),
        ],
        10_000,
        outcome,
    );
    broken.start();
    assert_eq!(broken.len(), 100);

    let longest = broken.max_drawn_kill_delay().unwrap();
    assert!(longest <= Duration::from_millis(10_000));

    tokio::time::sleep(Duration::from_millis(10_001)).await;

    for conn in client.opened() {
        let closed_at = conn.closed_at().expect("closed by its kill timer");
        let lived = closed_at - conn.opened_at;
        assert!(lived >= Duration::from_millis(1));
        assert!(lived <= Duration::from_millis(10_000));
    }
    assert_eq!(broken.connect_count(), 0);
    assert!(verdicts.try_verdict().is_none());
}

#[tokio::test]
async fn test_broken_client_that_connects_fails_run() {
    let client = Arc::new(FakeClient::default());
    let (outcome, mut verdicts) = Outcome::channel();

    let broken = BrokenSet::new(
        client,
        Vec::new(),
        vec![spec("amqp://proxy/broken", None, None, 1)],
        10_000,
        outcome,
    );
    broken.start();

    assert!(matches!(
        verdicts.try_verdict(),
        Some(Verdict::Failed(HarnessError::UnexpectedConnect {
            population: "broken",
            ..
        }))
    ));
}

#[tokio::test]
async fn test_severing_server_closes_accepted_sockets() {
    let client = Arc::new(FakeClient::default());
    let (outcome, _verdicts) = Outcome::channel();

    let broken = BrokenSet::new(client, vec![0, 0], Vec::new(), 50, outcome);
    let bound = broken.start_serving().await.unwrap();
    assert_eq!(bound.len(), 2);

    for addr in bound {
        let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("peer closed within the kill window");
        // Orderly close reads as EOF, a reset as an error
        match read {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        }
    }
}
