//! Background service: owns the worker, the estimator and the command loop

use super::notifier::Notifier;
use super::preferences::PreferenceStore;
use crate::bus::{EventBus, EventFilter, SubscriptionId};
use crate::connection::ConnectionWorker;
use crate::transport::{pick_default, AdapterStatus, DeviceDirectory, TransportConnector};
use carwatch_shared::defaults::{ALERT_BODY, ALERT_TITLE, DEVICE_NAMES, MINIMUM_THRESHOLD};
use carwatch_shared::{now_ms, Estimator, EventKind, LifecycleEvent, Verdict};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Control commands accepted by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Connect to a device by name or address
    SetDevice(String),
    CloseConnection,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Connecting,
    Active,
    Disconnected,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Idle => "idle",
            ServiceState::Connecting => "connecting",
            ServiceState::Active => "active",
            ServiceState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub address: Option<String>,
    pub confidence: i32,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long a stopping session may take before its task is aborted
    pub stop_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// External collaborators the service calls out to
pub struct Collaborators {
    pub directory: Arc<dyn DeviceDirectory>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Session state tracked from bus events
#[derive(Debug)]
struct Tracked {
    state: ServiceState,
    address: Option<String>,
}

/// A session that ended, with the estimate as it stood at that moment
#[derive(Debug)]
struct EndedSession {
    address: String,
    estimate: Estimator,
    at_ms: u64,
}

enum VerdictJob {
    Evaluate(EndedSession),
    Finish,
}

type CommandSlot = Arc<Mutex<Option<mpsc::UnboundedSender<ServiceCommand>>>>;

/// Cloneable entry point for controlling and observing a running service
#[derive(Clone)]
pub struct ServiceHandle {
    commands: CommandSlot,
    bus: Arc<EventBus>,
    estimator: Arc<Mutex<Estimator>>,
    tracked: Arc<Mutex<Tracked>>,
}

impl ServiceHandle {
    /// Ask the service to connect to `device` (name or address).
    ///
    /// Returns false once the service has stopped accepting commands.
    pub fn set_device(&self, device: impl Into<String>) -> bool {
        self.send(ServiceCommand::SetDevice(device.into()))
    }

    pub fn close_connection(&self) -> bool {
        self.send(ServiceCommand::CloseConnection)
    }

    pub fn stop_service(&self) -> bool {
        self.send(ServiceCommand::Stop)
    }

    /// Queue a command. Once `Stop` is queued every later send returns false,
    /// so nothing is accepted that the service would not execute.
    pub fn send(&self, command: ServiceCommand) -> bool {
        let mut slot = self.commands.lock();
        let Some(tx) = slot.as_ref() else {
            return false;
        };

        let stopping = command == ServiceCommand::Stop;
        let sent = tx.send(command).is_ok();
        if stopping || !sent {
            *slot = None;
        }
        sent
    }

    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(filter, handler)
    }

    pub fn subscribe_channel(
        &self,
        filter: impl Into<EventFilter>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        self.bus.subscribe_channel(filter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn status(&self) -> ServiceStatus {
        let tracked = self.tracked.lock();
        ServiceStatus {
            state: tracked.state,
            address: tracked.address.clone(),
            confidence: self.estimator.lock().confidence(),
        }
    }
}

/// Orchestrates sessions and turns their endings into verdicts.
///
/// The run loop only executes commands. Readings reach the estimator through
/// a bus subscription on the worker's task, and the same subscription
/// snapshots the estimate the instant a session ends. Verdicts are then
/// evaluated on their own task, which is the only place preferences are read
/// and alerts are raised, so slow storage never holds up a command.
pub struct BackgroundService {
    bus: Arc<EventBus>,
    worker: ConnectionWorker,
    collaborators: Collaborators,
    estimator: Arc<Mutex<Estimator>>,
    tracked: Arc<Mutex<Tracked>>,
    commands: mpsc::UnboundedReceiver<ServiceCommand>,
    verdict_tx: mpsc::UnboundedSender<VerdictJob>,
    verdict_rx: Option<mpsc::UnboundedReceiver<VerdictJob>>,
    stop_grace: Duration,
    subscriptions: Vec<SubscriptionId>,
}

impl BackgroundService {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        collaborators: Collaborators,
        config: ServiceConfig,
    ) -> (Self, ServiceHandle) {
        let bus = Arc::new(EventBus::new());
        let estimator = Arc::new(Mutex::new(Estimator::new()));
        let tracked = Arc::new(Mutex::new(Tracked {
            state: ServiceState::Idle,
            address: None,
        }));
        let (verdict_tx, verdict_rx) = mpsc::unbounded_channel();

        // Registered before anyone else so observers see the updated estimate
        let tracker = {
            let estimator = estimator.clone();
            let tracked = tracked.clone();
            let verdict_tx = verdict_tx.clone();
            bus.subscribe(
                EventFilter::only([
                    EventKind::TelemetryReceived,
                    EventKind::Connecting,
                    EventKind::Connected,
                    EventKind::Disconnected,
                ]),
                move |event| track(event, &estimator, &tracked, &verdict_tx),
            )
        };

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let worker = ConnectionWorker::new(connector, bus.clone(), config.stop_grace);

        let handle = ServiceHandle {
            commands: Arc::new(Mutex::new(Some(commands_tx))),
            bus: bus.clone(),
            estimator: estimator.clone(),
            tracked: tracked.clone(),
        };

        let service = Self {
            bus,
            worker,
            collaborators,
            estimator,
            tracked,
            commands,
            verdict_tx,
            verdict_rx: Some(verdict_rx),
            stop_grace: config.stop_grace,
            subscriptions: vec![tracker],
        };
        (service, handle)
    }

    /// Run until stopped or until every handle is dropped.
    ///
    /// `initial` names the first device to connect to; without it the
    /// startup device is resolved from the directory and preferences.
    pub async fn run(mut self, initial: Option<String>) {
        info!("[Service] Starting");

        let verdicts = self.verdict_rx.take().map(|jobs| {
            let judge = Judge {
                bus: self.bus.clone(),
                estimator: self.estimator.clone(),
                tracked: self.tracked.clone(),
                preferences: self.collaborators.preferences.clone(),
                notifier: self.collaborators.notifier.clone(),
            };
            tokio::spawn(judge.run(jobs))
        });

        let target = match initial.filter(|a| !a.is_empty()) {
            Some(device) => Some(device),
            None => self.resolve_startup_target().await,
        };
        if let Some(device) = target {
            self.set_device(&device).await;
        }

        while let Some(command) = self.commands.recv().await {
            match command {
                ServiceCommand::SetDevice(device) => self.set_device(&device).await,
                ServiceCommand::CloseConnection => {
                    info!("[Service] Closing connection");
                    self.worker.stop().await;
                }
                ServiceCommand::Stop => break,
            }
        }

        self.shutdown(verdicts).await;
    }

    async fn resolve_startup_target(&self) -> Option<String> {
        let directory = &self.collaborators.directory;

        if directory.adapter_status().await == AdapterStatus::Disabled {
            warn!("[Service] Bluetooth adapter unavailable");
            self.bus.publish(LifecycleEvent::BluetoothDisabled);
            return None;
        }

        let paired = directory.paired_devices().await;
        if paired.is_empty() {
            warn!("[Service] No paired devices");
            self.bus.publish(LifecycleEvent::NoDevicesPaired);
            return None;
        }

        let preferences = self.collaborators.preferences.clone();
        let saved = spawn_blocking(move || preferences.default_address())
            .await
            .unwrap_or_else(|e| {
                warn!("[Service] Reading default device failed: {}", e);
                None
            });

        match pick_default(&paired, saved.as_deref()) {
            Some(address) => Some(address),
            None => {
                let query = saved.unwrap_or_else(|| DEVICE_NAMES.join(", "));
                warn!("[Service] No startup device among {} paired", paired.len());
                self.bus.publish(LifecycleEvent::DeviceNotFound { query });
                None
            }
        }
    }

    async fn set_device(&mut self, device: &str) {
        if device.is_empty() || self.worker.is_connected_to(device) {
            debug!("[Service] Ignoring connect to {:?}", device);
            return;
        }

        let Some(address) = self.collaborators.directory.resolve_address(device).await else {
            warn!("[Service] Device {} not found", device);
            self.bus.publish(LifecycleEvent::DeviceNotFound {
                query: device.to_string(),
            });
            return;
        };

        if self.worker.is_connected_to(&address) {
            debug!("[Service] Already connected to {}", address);
            return;
        }

        info!("[Service] Switching to {}", address);
        self.worker.start(&address).await;
    }

    async fn shutdown(mut self, verdicts: Option<JoinHandle<()>>) {
        info!("[Service] Stopping");

        self.worker.stop().await;

        // Jobs queued by the stop above are judged before Finish is seen
        let _ = self.verdict_tx.send(VerdictJob::Finish);
        if let Some(mut task) = verdicts {
            match timeout(self.stop_grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("[Service] Verdict task failed: {}", e),
                Err(_) => {
                    warn!("[Service] Pending verdicts not done within {:?}, dropping them", self.stop_grace);
                    task.abort();
                }
            }
        }

        self.bus.publish(LifecycleEvent::ApplicationStopped);
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        info!("[Service] Stopped");
    }
}

/// Evaluates ended sessions in the order they ended
struct Judge {
    bus: Arc<EventBus>,
    estimator: Arc<Mutex<Estimator>>,
    tracked: Arc<Mutex<Tracked>>,
    preferences: Arc<dyn PreferenceStore>,
    notifier: Arc<dyn Notifier>,
}

impl Judge {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<VerdictJob>) {
        while let Some(job) = jobs.recv().await {
            match job {
                VerdictJob::Evaluate(ended) => self.evaluate(ended).await,
                VerdictJob::Finish => break,
            }
        }
    }

    async fn evaluate(&self, ended: EndedSession) {
        let preferences = self.preferences.clone();
        let threshold = spawn_blocking(move || preferences.minimum_threshold())
            .await
            .unwrap_or_else(|e| {
                warn!("[Service] Reading threshold failed: {}, using {}", e, MINIMUM_THRESHOLD);
                MINIMUM_THRESHOLD
            });

        let mut boosted = ended.estimate.clone();
        let verdict = boosted.on_disconnect_at(threshold, ended.at_ms);
        {
            // A reading from a newer session takes precedence over the boost
            let mut live = self.estimator.lock();
            if *live == ended.estimate {
                *live = boosted;
            }
        }
        info!(address = %ended.address, threshold, verdict = ?verdict, "[Service] Session ended");

        match verdict {
            Verdict::NotClosed { confidence } => {
                self.bus.publish(LifecycleEvent::CarNotClosed { confidence });
                let notifier = self.notifier.clone();
                if let Err(e) = spawn_blocking(move || notifier.notify(ALERT_TITLE, ALERT_BODY)).await {
                    warn!("[Service] Notifier failed: {}", e);
                }
            }
            Verdict::Closed { confidence } => {
                self.bus.publish(LifecycleEvent::CarClosed { confidence });
            }
        }

        let mut tracked = self.tracked.lock();
        if tracked.state == ServiceState::Disconnected
            && tracked.address.as_deref() == Some(ended.address.as_str())
        {
            tracked.state = ServiceState::Idle;
        }
    }
}

/// Keep the estimator and the state snapshot in step with the bus
fn track(
    event: &LifecycleEvent,
    estimator: &Mutex<Estimator>,
    tracked: &Mutex<Tracked>,
    verdicts: &mpsc::UnboundedSender<VerdictJob>,
) {
    match event {
        LifecycleEvent::TelemetryReceived { raw } => {
            if estimator.lock().on_telemetry(raw).is_none() {
                debug!("[Service] Ignoring malformed reading {:?}", raw);
            }
        }
        LifecycleEvent::Connecting { address } => {
            let mut tracked = tracked.lock();
            tracked.state = ServiceState::Connecting;
            tracked.address = Some(address.clone());
        }
        LifecycleEvent::Connected { address } => {
            let mut tracked = tracked.lock();
            tracked.state = ServiceState::Active;
            tracked.address = Some(address.clone());
        }
        LifecycleEvent::Disconnected { address } => {
            {
                let mut tracked = tracked.lock();
                if tracked.address.as_deref() == Some(address.as_str()) {
                    tracked.state = ServiceState::Disconnected;
                }
            }
            let ended = EndedSession {
                address: address.clone(),
                estimate: estimator.lock().clone(),
                at_ms: now_ms(),
            };
            if verdicts.send(VerdictJob::Evaluate(ended)).is_err() {
                debug!("[Service] Verdict task gone, not judging {}", address);
            }
        }
        _ => {}
    }
}
