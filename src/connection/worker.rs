//! Connection worker: one sensor session at a time, each on its own task

use crate::bus::EventBus;
use crate::transport::{LineLink, TransportConnector};
use carwatch_shared::LifecycleEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Phase of a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Connected,
    TornDown,
}

/// Session state shared between the worker and its task
#[derive(Debug)]
struct SessionState {
    address: String,
    phase: Mutex<SessionPhase>,
}

impl SessionState {
    fn new(address: String) -> Self {
        Self {
            address,
            phase: Mutex::new(SessionPhase::Connecting),
        }
    }

    fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    fn is_live(&self) -> bool {
        self.phase() != SessionPhase::TornDown
    }

    /// Move to Connected unless teardown already won
    fn mark_connected(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == SessionPhase::Connecting {
            *phase = SessionPhase::Connected;
            true
        } else {
            false
        }
    }

    /// Tear down and announce it; only the first caller publishes
    fn finish(&self, bus: &EventBus) {
        {
            let mut phase = self.phase.lock();
            if *phase == SessionPhase::TornDown {
                return;
            }
            *phase = SessionPhase::TornDown;
        }
        bus.publish(LifecycleEvent::Disconnected {
            address: self.address.clone(),
        });
    }
}

struct Session {
    state: Arc<SessionState>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Drives at most one session to a sensor.
///
/// Starting a new session stops the previous one first, so the worker never
/// owns two streams. Every session ends with exactly one `Disconnected`
/// event, whether the link failed, the peer hung up or `stop` was called.
pub struct ConnectionWorker {
    connector: Arc<dyn TransportConnector>,
    bus: Arc<EventBus>,
    stop_grace: Duration,
    session: Option<Session>,
}

impl ConnectionWorker {
    pub fn new(connector: Arc<dyn TransportConnector>, bus: Arc<EventBus>, stop_grace: Duration) -> Self {
        Self {
            connector,
            bus,
            stop_grace,
            session: None,
        }
    }

    /// Start a session to `address`, replacing any current one
    pub async fn start(&mut self, address: &str) {
        self.stop().await;

        let state = Arc::new(SessionState::new(address.to_string()));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run_session(
            self.connector.clone(),
            self.bus.clone(),
            state.clone(),
            stop_rx,
        ));

        self.session = Some(Session {
            state,
            stop_tx: Some(stop_tx),
            task,
        });
    }

    /// True while the current session targets `address` and is not torn down
    pub fn is_connected_to(&self, address: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state.address == address && s.state.is_live())
    }

    /// True while any session is not torn down
    pub fn is_live(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state.is_live())
    }

    /// Address and phase of the current session, if any
    pub fn current(&self) -> Option<(String, SessionPhase)> {
        self.session
            .as_ref()
            .map(|s| (s.state.address.clone(), s.state.phase()))
    }

    /// Stop the current session and wait for its task.
    ///
    /// Idempotent. If the task does not wind down within the grace period it
    /// is aborted; either way it is gone when this returns.
    pub async fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(stop_tx) = session.stop_tx.take() {
            // Err just means the task already finished
            let _ = stop_tx.send(());
        }

        match timeout(self.stop_grace, &mut session.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[Worker] Session task for {} failed: {}", session.state.address, e),
            Err(_) => {
                warn!(
                    "[Worker] Session for {} did not stop within {:?}, aborting",
                    session.state.address, self.stop_grace
                );
                session.task.abort();
                let _ = session.task.await;
            }
        }

        session.state.finish(&self.bus);
    }
}

/// Body of one session task
async fn run_session(
    connector: Arc<dyn TransportConnector>,
    bus: Arc<EventBus>,
    state: Arc<SessionState>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let address = state.address.clone();
    bus.publish(LifecycleEvent::Connecting {
        address: address.clone(),
    });

    let stream = tokio::select! {
        result = connector.connect(&address) => match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[Worker] {} connect to {} failed: {}", connector.name(), address, e);
                state.finish(&bus);
                return;
            }
        },
        _ = &mut stop_rx => {
            debug!("[Worker] Stop requested while connecting to {}", address);
            state.finish(&bus);
            return;
        }
    };

    if !state.mark_connected() {
        return;
    }
    info!("[Worker] Connected to {} via {}", address, connector.name());
    bus.publish(LifecycleEvent::Connected {
        address: address.clone(),
    });

    let mut link = LineLink::new(stream);
    loop {
        tokio::select! {
            result = link.receive() => match result {
                Ok(raw) => bus.publish(LifecycleEvent::TelemetryReceived { raw }),
                Err(e) => {
                    warn!("[Worker] Link to {} lost: {}", address, e);
                    break;
                }
            },
            _ = &mut stop_rx => {
                debug!("[Worker] Stop requested for {}", address);
                break;
            }
        }
    }

    if let Err(e) = link.close().await {
        debug!("[Worker] Closing link to {}: {}", address, e);
    }
    state.finish(&bus);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventFilter;
    use crate::transport::testing::MockConnector;
    use carwatch_shared::EventKind;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc::UnboundedReceiver;

    const ADDR_A: &str = "00:11:22:33:44:55";
    const ADDR_B: &str = "66:77:88:99:AA:BB";

    fn setup() -> (
        ConnectionWorker,
        Arc<MockConnector>,
        UnboundedReceiver<(String, tokio::io::DuplexStream)>,
        UnboundedReceiver<LifecycleEvent>,
    ) {
        let bus = Arc::new(EventBus::new());
        let (_, events) = bus.subscribe_channel(EventFilter::all());
        let (connector, peers) = MockConnector::new();
        let worker = ConnectionWorker::new(connector.clone(), bus, Duration::from_secs(1));
        (worker, connector, peers, events)
    }

    async fn next_event(events: &mut UnboundedReceiver<LifecycleEvent>) -> LifecycleEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed")
    }

    fn count_disconnects(events: &mut UnboundedReceiver<LifecycleEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if event.kind() == EventKind::Disconnected {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_session_forwards_lines_then_disconnects_on_peer_close() {
        let (mut worker, _connector, mut peers, mut events) = setup();

        worker.start(ADDR_A).await;
        assert!(worker.is_connected_to(ADDR_A));
        assert!(!worker.is_connected_to(ADDR_B));

        let (address, mut peer) = peers.recv().await.expect("no connection");
        assert_eq!(address, ADDR_A);

        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::Connecting { address: ADDR_A.into() }
        );
        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::Connected { address: ADDR_A.into() }
        );

        peer.write_all(b"42\nnope\n").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::TelemetryReceived { raw: "42".into() }
        );
        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::TelemetryReceived { raw: "nope".into() }
        );

        drop(peer);
        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::Disconnected { address: ADDR_A.into() }
        );
        assert!(!worker.is_connected_to(ADDR_A));

        // Stopping a session that already ended publishes nothing more
        worker.stop().await;
        assert_eq!(count_disconnects(&mut events), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut worker, _connector, mut peers, mut events) = setup();

        worker.stop().await;

        worker.start(ADDR_A).await;
        let (_, _peer) = peers.recv().await.expect("no connection");

        worker.stop().await;
        assert!(!worker.is_connected_to(ADDR_A));
        worker.stop().await;

        assert_eq!(count_disconnects(&mut events), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_single_disconnect() {
        let (mut worker, connector, _peers, mut events) = setup();
        connector.make_unreachable(ADDR_A);

        worker.start(ADDR_A).await;

        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::Connecting { address: ADDR_A.into() }
        );
        assert_eq!(
            next_event(&mut events).await,
            LifecycleEvent::Disconnected { address: ADDR_A.into() }
        );
        assert!(!worker.is_connected_to(ADDR_A));
        assert!(!worker.is_live());

        worker.stop().await;
        assert_eq!(count_disconnects(&mut events), 0);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_start_replaces_previous_session() {
        let (mut worker, connector, mut peers, mut events) = setup();

        worker.start(ADDR_A).await;
        let (_, _peer_a) = peers.recv().await.expect("no connection to A");

        worker.start(ADDR_B).await;
        let (address, _peer_b) = peers.recv().await.expect("no connection to B");
        assert_eq!(address, ADDR_B);

        assert!(!worker.is_connected_to(ADDR_A));
        assert!(worker.is_connected_to(ADDR_B));
        assert_eq!(connector.attempts(), 2);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let a_gone = seen
            .iter()
            .position(|e| *e == LifecycleEvent::Disconnected { address: ADDR_A.into() })
            .expect("A never disconnected");
        let b_starts = seen
            .iter()
            .position(|e| *e == LifecycleEvent::Connecting { address: ADDR_B.into() })
            .expect("B never started");
        assert!(a_gone < b_starts);
    }

    /// Link that never delivers data and never finishes shutting down
    struct WedgedStream;

    impl tokio::io::AsyncRead for WedgedStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    impl tokio::io::AsyncWrite for WedgedStream {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    struct WedgedConnector;

    #[async_trait::async_trait]
    impl TransportConnector for WedgedConnector {
        async fn connect(
            &self,
            _address: &str,
        ) -> Result<crate::transport::BoxedStream, crate::transport::TransportError> {
            Ok(Box::new(WedgedStream))
        }

        fn name(&self) -> &'static str {
            "Wedged"
        }
    }

    #[tokio::test]
    async fn test_stop_aborts_session_after_grace() {
        let bus = Arc::new(EventBus::new());
        let (_, mut events) = bus.subscribe_channel(EventFilter::all());
        let grace = Duration::from_millis(100);
        let mut worker = ConnectionWorker::new(Arc::new(WedgedConnector), bus, grace);

        worker.start(ADDR_A).await;
        while next_event(&mut events).await.kind() != EventKind::Connected {}

        let started = tokio::time::Instant::now();
        worker.stop().await;
        let took = started.elapsed();

        assert!(took >= grace, "returned before the grace period: {:?}", took);
        assert!(took < Duration::from_secs(1), "stop hung for {:?}", took);
        assert!(!worker.is_live());
        assert!(!worker.is_connected_to(ADDR_A));
        assert_eq!(count_disconnects(&mut events), 1);

        worker.stop().await;
        assert_eq!(count_disconnects(&mut events), 0);
    }

    #[tokio::test]
    async fn test_current_reports_phase() {
        let (mut worker, _connector, mut peers, mut events) = setup();
        assert!(worker.current().is_none());

        worker.start(ADDR_A).await;
        let (_, _peer) = peers.recv().await.expect("no connection");
        while next_event(&mut events).await.kind() != EventKind::Connected {}

        assert_eq!(
            worker.current(),
            Some((ADDR_A.to_string(), SessionPhase::Connected))
        );
    }
}
