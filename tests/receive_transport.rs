// tests/receive_transport.rs

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use mom_transport::{
    // ---
    pipe_fn,
    Address,
    AgentState,
    ConnectHandle,
    DeliveryMetrics,
    EndpointContext,
    Envelope,
    Error,
    InMemoryQueue,
    InMemoryReceiveTransport,
    MessageSource,
    QueueConsumer,
    ReceiveEndpointContext,
    ReceivePipe,
    ReceiveTransportCompleted,
    ReceiveTransportFaulted,
    ReceiveTransportObserver,
    ReceiveTransportReady,
    Result,
    TransportMessage,
};

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct LifecycleRecorder {
    log: Log,
    completed: Mutex<Vec<ReceiveTransportCompleted>>,
    faulted: Mutex<Vec<ReceiveTransportFaulted>>,
    ready_gate: Option<Arc<Notify>>,
}

#[async_trait::async_trait]
impl ReceiveTransportObserver for LifecycleRecorder {
    async fn ready(&self, _event: &ReceiveTransportReady) -> Result<()> {
        if let Some(gate) = &self.ready_gate {
            gate.notified().await;
        }
        self.log.lock().unwrap().push("ready".into());
        Ok(())
    }

    async fn completed(&self, event: &ReceiveTransportCompleted) -> Result<()> {
        self.log.lock().unwrap().push("completed".into());
        self.completed.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn faulted(&self, event: &ReceiveTransportFaulted) -> Result<()> {
        self.faulted.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Observer whose completion handler always fails.
#[derive(Default)]
struct FailingCompletion {
    calls: Mutex<usize>,
}

#[async_trait::async_trait]
impl ReceiveTransportObserver for FailingCompletion {
    async fn completed(&self, _event: &ReceiveTransportCompleted) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        Err(Error::Observer("completion sink unavailable".into()))
    }
}

/// Source that hands its consumer to the test instead of pushing messages itself.
struct ManualSource {
    address: Address,
    consumer: Mutex<Option<Arc<dyn QueueConsumer>>>,
    log: Log,
}

impl ManualSource {
    fn new(log: Log) -> Self {
        Self {
            address: Address::from("manual"),
            consumer: Mutex::new(None),
            log,
        }
    }

    fn consumer(&self) -> Arc<dyn QueueConsumer> {
        self.consumer
            .lock()
            .unwrap()
            .clone()
            .expect("no consumer connected")
    }
}

impl MessageSource for ManualSource {
    fn address(&self) -> &Address {
        &self.address
    }

    fn connect_consumer(&self, consumer: Arc<dyn QueueConsumer>) -> Result<ConnectHandle> {
        *self.consumer.lock().unwrap() = Some(consumer);
        let log = Arc::clone(&self.log);
        Ok(ConnectHandle::new(move || {
            log.lock().unwrap().push("disconnect".into());
        }))
    }
}

fn message(body: &'static [u8]) -> Arc<TransportMessage> {
    Arc::new(TransportMessage::new(Envelope::new(
        Address::from("input"),
        Bytes::from_static(body),
    )))
}

fn rejecting(body: &'static [u8]) -> Arc<dyn ReceivePipe> {
    pipe_fn(move |message| async move {
        if message.body().as_ref() == body {
            return Err(Error::Dispatch("rejected".into()));
        }
        Ok(())
    })
}

/// Pipe that blocks until `gate` is notified.
fn gated(gate: Arc<Notify>, entered: Arc<Notify>) -> Arc<dyn ReceivePipe> {
    pipe_fn(move |_message| {
        let gate = Arc::clone(&gate);
        let entered = Arc::clone(&entered);
        async move {
            entered.notify_one();
            gate.notified().await;
            Ok(())
        }
    })
}

async fn wait_for_metrics(
    transport: &InMemoryReceiveTransport,
    expected: impl Fn(DeliveryMetrics) -> bool,
) {
    timeout(WAIT, async {
        while !expected(transport.delivery_metrics()) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("metrics never reached the expected value");
}

#[tokio::test]
async fn end_to_end_counts_failed_attempts_and_reports_completion() {
    // ---
    init_tracing();
    // Arrange
    // ---
    let queue = Arc::new(InMemoryQueue::new("input", 1));
    let endpoint = Arc::new(EndpointContext::new("input", rejecting(b"m2")));
    let recorder = Arc::new(LifecycleRecorder::default());
    let _observer = endpoint.connect_receive_transport_observer(recorder.clone());

    let transport = InMemoryReceiveTransport::new("input", queue.clone(), endpoint);
    let handle = transport.start().expect("start failed");
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();

    let m1 = message(b"m1");
    let m2 = message(b"m2");

    // ---
    // Act
    // ---
    queue.send_message(Arc::clone(&m1)).unwrap();
    queue.send_message(Arc::clone(&m2)).unwrap();
    wait_for_metrics(&transport, |m| m.delivery_count == 2 && m.faulted_count == 1).await;

    handle.stop(&CancellationToken::new()).await.expect("stop failed");

    // ---
    // Assert
    // ---
    assert_eq!(m1.delivery_count(), 0);
    assert_eq!(m2.delivery_count(), 1);
    assert_eq!(transport.state(), AgentState::Stopped);

    let completed = recorder.completed.lock().unwrap().clone();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].input_address, Address::from("input"));
    assert_eq!(completed[0].metrics.delivery_count, 2);
    assert_eq!(completed[0].metrics.faulted_count, 1);
    assert_eq!(completed[0].metrics.concurrent_delivery_count, 1);
}

#[tokio::test]
async fn messages_wait_for_readiness() {
    // ---
    init_tracing();
    // Arrange
    // ---
    let gate = Arc::new(Notify::new());
    let queue = Arc::new(InMemoryQueue::new("input", 4));
    let endpoint = Arc::new(EndpointContext::new("input", rejecting(b"never")));
    let recorder = Arc::new(LifecycleRecorder {
        ready_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    });
    let _observer = endpoint.connect_receive_transport_observer(recorder.clone());

    let transport = InMemoryReceiveTransport::new("input", queue.clone(), endpoint);
    queue
        .send(Envelope::new(Address::from("input"), Bytes::from_static(b"early")))
        .unwrap();

    // ---
    // Act
    // ---
    let handle = transport.start().expect("start failed");
    sleep(Duration::from_millis(50)).await;

    // ---
    // Assert
    // ---
    assert_eq!(transport.state(), AgentState::NotReady);
    assert_eq!(transport.delivery_metrics().delivery_count, 0);

    gate.notify_one();
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();
    wait_for_metrics(&transport, |m| m.delivery_count == 1).await;
    assert_eq!(*recorder.log.lock().unwrap(), vec!["ready".to_string()]);

    handle.stop(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn failed_deliveries_increment_the_same_message() {
    // ---
    init_tracing();
    let queue = Arc::new(InMemoryQueue::new("input", 1));
    let endpoint = Arc::new(EndpointContext::new("input", rejecting(b"poison")));
    let transport = InMemoryReceiveTransport::new("input", queue.clone(), endpoint);
    let handle = transport.start().unwrap();
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();

    let poison = message(b"poison");
    for expected in 1..=3u64 {
        queue.send_message(Arc::clone(&poison)).unwrap();
        wait_for_metrics(&transport, |m| m.faulted_count == expected).await;
    }
    handle.stop(&CancellationToken::new()).await.unwrap();

    assert_eq!(poison.delivery_count(), 3);
    assert!(poison.is_redelivered());
}

#[tokio::test]
async fn messages_after_stop_are_discarded() {
    // ---
    init_tracing();
    let log = Log::default();
    let source = Arc::new(ManualSource::new(Arc::clone(&log)));
    let endpoint = Arc::new(EndpointContext::new("manual", rejecting(b"x")));
    let transport = InMemoryReceiveTransport::new("manual", source.clone(), endpoint);

    let handle = transport.start().unwrap();
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();
    let consumer = source.consumer();
    handle.stop(&CancellationToken::new()).await.unwrap();

    let late = message(b"x");
    timeout(WAIT, consumer.consume(Arc::clone(&late), &CancellationToken::new()))
        .await
        .expect("consume hung after stop");

    assert_eq!(late.delivery_count(), 0);
    assert_eq!(transport.delivery_metrics().delivery_count, 0);
}

#[tokio::test]
async fn messages_before_ready_are_discarded_when_stopped_first() {
    // ---
    init_tracing();
    let log = Log::default();
    let gate = Arc::new(Notify::new());
    let source = Arc::new(ManualSource::new(Arc::clone(&log)));
    let endpoint = Arc::new(EndpointContext::new("manual", rejecting(b"x")));
    let recorder = Arc::new(LifecycleRecorder {
        ready_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    });
    let _observer = endpoint.connect_receive_transport_observer(recorder.clone());
    let transport = InMemoryReceiveTransport::new("manual", source.clone(), endpoint);

    let handle = transport.start().unwrap();
    let consumer = source.consumer();
    let early = message(b"x");
    let pending = tokio::spawn({
        let early = Arc::clone(&early);
        async move { consumer.consume(early, &CancellationToken::new()).await }
    });

    handle.stop(&CancellationToken::new()).await.unwrap();
    timeout(WAIT, pending).await.unwrap().unwrap();

    assert!(matches!(transport.ready().await, Err(Error::AgentStopped)));
    assert_eq!(early.delivery_count(), 0);
    assert_eq!(transport.delivery_metrics().delivery_count, 0);

    gate.notify_one();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(*recorder.log.lock().unwrap(), vec!["completed".to_string()]);
}

#[tokio::test]
async fn stop_drains_then_disconnects_then_completes() {
    // ---
    init_tracing();
    // Arrange
    // ---
    let log = Log::default();
    let gate = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    let source = Arc::new(ManualSource::new(Arc::clone(&log)));
    let endpoint = Arc::new(EndpointContext::new(
        "manual",
        gated(Arc::clone(&gate), Arc::clone(&entered)),
    ));
    let recorder = Arc::new(LifecycleRecorder {
        log: Arc::clone(&log),
        ..Default::default()
    });
    let _observer = endpoint.connect_receive_transport_observer(recorder.clone());
    let transport = InMemoryReceiveTransport::new("manual", source.clone(), endpoint);

    let handle = transport.start().unwrap();
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();

    let consumer = source.consumer();
    let in_flight = tokio::spawn(async move {
        consumer.consume(message(b"slow"), &CancellationToken::new()).await
    });
    timeout(WAIT, entered.notified()).await.unwrap();

    // ---
    // Act
    // ---
    let stopping = tokio::spawn(async move { handle.stop(&CancellationToken::new()).await });
    sleep(Duration::from_millis(50)).await;

    // ---
    // Assert
    // ---
    assert!(!stopping.is_finished());
    assert_eq!(transport.state(), AgentState::Stopping);
    assert!(log.lock().unwrap().iter().all(|entry| entry != "disconnect"));

    gate.notify_one();
    timeout(WAIT, stopping).await.unwrap().unwrap().unwrap();
    timeout(WAIT, in_flight).await.unwrap().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["ready".to_string(), "disconnect".to_string(), "completed".to_string()]
    );
    assert_eq!(recorder.completed.lock().unwrap()[0].metrics.delivery_count, 1);
}

#[tokio::test]
async fn every_connected_observer_gets_one_completion() {
    // ---
    init_tracing();
    // Arrange
    // ---
    let queue = Arc::new(InMemoryQueue::new("input", 1));
    let endpoint = Arc::new(EndpointContext::new("input", rejecting(b"never")));
    let first = Arc::new(LifecycleRecorder::default());
    let failing = Arc::new(FailingCompletion::default());
    let last = Arc::new(LifecycleRecorder::default());
    let _first = endpoint.connect_receive_transport_observer(first.clone());
    let _failing = endpoint.connect_receive_transport_observer(failing.clone());
    let _last = endpoint.connect_receive_transport_observer(last.clone());

    let transport = InMemoryReceiveTransport::new("input", queue.clone(), endpoint);
    let handle = transport.start().unwrap();
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();
    queue.send_message(message(b"m1")).unwrap();
    wait_for_metrics(&transport, |m| m.delivery_count == 1).await;

    // ---
    // Act
    // ---
    handle.stop(&CancellationToken::new()).await.expect("stop failed");

    // ---
    // Assert
    // ---
    assert_eq!(*failing.calls.lock().unwrap(), 1);
    for recorder in [&first, &last] {
        let completed = recorder.completed.lock().unwrap().clone();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].metrics.delivery_count, 1);
        assert_eq!(
            *recorder.log.lock().unwrap(),
            vec!["ready".to_string(), "completed".to_string()]
        );
    }
}

#[tokio::test]
async fn cancelled_stop_still_stops_and_completes() {
    // ---
    init_tracing();
    let log = Log::default();
    let gate = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    let source = Arc::new(ManualSource::new(Arc::clone(&log)));
    let endpoint = Arc::new(EndpointContext::new(
        "manual",
        gated(Arc::clone(&gate), Arc::clone(&entered)),
    ));
    let recorder = Arc::new(LifecycleRecorder::default());
    let _observer = endpoint.connect_receive_transport_observer(recorder.clone());
    let transport = InMemoryReceiveTransport::new("manual", source.clone(), endpoint);

    let handle = transport.start().unwrap();
    timeout(WAIT, transport.ready()).await.unwrap().unwrap();
    let consumer = source.consumer();
    let in_flight = tokio::spawn(async move {
        consumer.consume(message(b"stuck"), &CancellationToken::new()).await
    });
    timeout(WAIT, entered.notified()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let result = handle.stop(&token).await;

    assert!(matches!(result, Err(Error::StopCancelled { in_flight: 1 })));
    assert_eq!(transport.state(), AgentState::Stopped);
    assert_eq!(recorder.completed.lock().unwrap().len(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["disconnect".to_string()]);

    gate.notify_one();
    timeout(WAIT, in_flight).await.unwrap().unwrap();
}

#[tokio::test]
async fn start_failure_faults_and_notifies_observers() {
    // ---
    init_tracing();
    let queue = Arc::new(InMemoryQueue::new("input", 1));
    queue.shutdown();

    let endpoint = Arc::new(EndpointContext::new("input", rejecting(b"x")));
    let recorder = Arc::new(LifecycleRecorder::default());
    let _observer = endpoint.connect_receive_transport_observer(recorder.clone());
    let transport = InMemoryReceiveTransport::new("input", queue, endpoint);

    assert!(matches!(transport.start(), Err(Error::Connect(_))));
    assert!(matches!(transport.ready().await, Err(Error::StartupFailed(_))));
    assert_eq!(transport.completed().await, AgentState::Faulted);

    timeout(WAIT, async {
        while recorder.faulted.lock().unwrap().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("faulted event never published");
    assert_eq!(
        recorder.faulted.lock().unwrap()[0].input_address,
        Address::from("input")
    );
}
