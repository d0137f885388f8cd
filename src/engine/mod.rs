//! Mapping & dispatch engine
//!
//! One producer task per event source feeds a bounded [`EventQueue`]. A single
//! dispatcher loop owns the [`Dispatcher`] and [`BindingResolver`] and waits
//! on, in priority order: shutdown, commands, mapping table changes, the next
//! flush or learn deadline, and the queue. Adapter sends run inline on that
//! loop, so a flush never races a fresh send for the same binding.

pub mod queue;
pub mod source;
pub mod telemetry;


use crate::adapter::AdapterRegistry;
use crate::dispatch::{Dispatch, DispatchConfig, Dispatcher};
use crate::error::{BackendError, EngineError, MappingError};
use crate::event::{ControlEvent, ControlIdentity};
use crate::mapping::{Binding, BindingResolver, LearnCapture, MappingStore, MappingTable, Resolution};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub use queue::{EventQueue, PushOutcome};
pub use source::EventSource;
pub use telemetry::{Telemetry, TelemetryEvent, TelemetryKind};

/// Callback invoked with every learn capture
pub type LearnListener = Arc<dyn Fn(&LearnCapture) + Send + Sync>;

/// Commands buffered between handles and the dispatcher loop
const COMMAND_CAPACITY: usize = 32;

/// Engine tuning, the `engine:` section of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Continuous events buffered before the oldest is dropped
    pub queue_capacity: usize,
    /// Discrete events buffered before producers wait
    pub discrete_reserve: usize,
    /// Absolute redundant-flush threshold
    pub epsilon: f64,
    /// Relative redundant-flush threshold
    pub relative_epsilon: f64,
    pub send_timeout_ms: u64,
    /// Report events for unbound controls on the telemetry channel
    pub report_unbound: bool,
    pub unbound_report_interval_ms: u64,
    pub telemetry_capacity: usize,
    /// Default learn capture window
    pub learn_window_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            discrete_reserve: 32,
            epsilon: 0.001,
            relative_epsilon: 0.001,
            send_timeout_ms: 250,
            report_unbound: false,
            unbound_report_interval_ms: 1000,
            telemetry_capacity: 256,
            learn_window_ms: 1500,
        }
    }
}

impl EngineSettings {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            epsilon: self.epsilon,
            relative_epsilon: self.relative_epsilon,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn learn_window(&self) -> Duration {
        Duration::from_millis(self.learn_window_ms)
    }
}

/// Live counters shared by producers and the dispatcher loop
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    malformed: AtomicU64,
    unbound: AtomicU64,
}

/// Snapshot of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Events accepted into the queue
    pub received: u64,
    /// Continuous events dropped because the queue was full
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
    pub malformed: u64,
    pub unbound: u64,
    /// Telemetry events lost to a full channel
    pub telemetry_dropped: u64,
}

enum EngineCommand {
    EnterLearn {
        session: u64,
        window: Duration,
        reply: oneshot::Sender<LearnCapture>,
    },
    CancelLearn {
        session: u64,
    },
    SetLearnListener(Option<LearnListener>),
    ResetDispatchState {
        reply: oneshot::Sender<usize>,
    },
}

struct Shared {
    settings: EngineSettings,
    store: MappingStore,
    adapters: AdapterRegistry,
    queue: Arc<EventQueue>,
    telemetry: Telemetry,
    stats: Arc<StatsCounters>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    shutdown_tx: watch::Sender<bool>,
    producers: Mutex<Vec<JoinHandle<()>>>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    next_session: AtomicU64,
}

/// Resolves once shutdown is requested or the engine handle is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Entry point: builds and starts the engine
pub struct Engine;

impl Engine {
    /// Start the dispatcher loop on the current runtime
    ///
    /// Returns the control handle and the telemetry receiver.
    pub fn start(
        settings: EngineSettings,
        table: MappingTable,
        adapters: AdapterRegistry,
    ) -> (EngineHandle, mpsc::Receiver<TelemetryEvent>) {
        let store = MappingStore::new(table);
        let queue = Arc::new(EventQueue::new(settings.queue_capacity, settings.discrete_reserve));
        let (telemetry, telemetry_rx) = Telemetry::channel(settings.telemetry_capacity);
        let stats = Arc::new(StatsCounters::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatch_loop = DispatchLoop {
            dispatcher: Dispatcher::new(settings.dispatch_config()),
            resolver: BindingResolver::new(Duration::from_millis(settings.unbound_report_interval_ms)),
            store: store.clone(),
            adapters: adapters.clone(),
            telemetry: telemetry.clone(),
            stats: stats.clone(),
            send_timeout: settings.send_timeout(),
            report_unbound: settings.report_unbound,
            learn_reply: None,
            learn_listener: None,
        };
        let task = tokio::spawn(dispatch_loop.run(
            queue.clone(),
            store.subscribe(),
            cmd_rx,
            shutdown_rx,
        ));

        info!(
            "Engine started ({} bindings, queue {}+{})",
            store.snapshot().len(),
            settings.queue_capacity,
            settings.discrete_reserve
        );

        let shared = Shared {
            settings,
            store,
            adapters,
            queue,
            telemetry,
            stats,
            cmd_tx,
            shutdown_tx,
            producers: Mutex::new(Vec::new()),
            dispatcher_task: Mutex::new(Some(task)),
            next_session: AtomicU64::new(1),
        };
        (
            EngineHandle {
                shared: Arc::new(shared),
            },
            telemetry_rx,
        )
    }
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    pub fn is_running(&self) -> bool {
        !*self.shared.shutdown_tx.borrow()
    }

    /// Register an event source and start its producer task
    pub fn add_source<S: EventSource + 'static>(&self, source: S) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::Stopped);
        }
        let handle = source::spawn_producer(
            Box::new(source),
            self.shared.queue.clone(),
            self.shared.telemetry.clone(),
            self.shared.stats.clone(),
            self.shared.shutdown_tx.subscribe(),
        );
        self.shared.producers.lock().push(handle);
        Ok(())
    }

    /// Inject an already normalized event
    pub async fn submit(&self, event: ControlEvent) -> Result<(), EngineError> {
        source::enqueue(&self.shared.queue, &self.shared.stats, event).await
    }

    /// Mapping store backing this engine
    pub fn mappings(&self) -> &MappingStore {
        &self.shared.store
    }

    pub fn replace_table(&self, table: MappingTable) {
        self.shared.store.replace_table(table);
    }

    pub fn add_binding(&self, binding: Binding) -> Result<Option<Arc<Binding>>, MappingError> {
        self.shared.store.add_binding(binding)
    }

    pub fn remove_binding(&self, identity: &ControlIdentity) -> Option<Arc<Binding>> {
        self.shared.store.remove_binding(identity)
    }

    pub fn set_binding_enabled(&self, identity: &ControlIdentity, enabled: bool) -> bool {
        self.shared.store.set_enabled(identity, enabled)
    }

    pub fn get_bindings(&self) -> Vec<Binding> {
        self.shared.store.get_bindings()
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.shared.adapters
    }

    async fn command(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.shared
            .cmd_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Arm learn mode
    ///
    /// The next event for an unbound control starts a capture lasting
    /// `window` (the configured default when `None`). A new session replaces
    /// any running one.
    pub async fn enter_learn_mode(&self, window: Option<Duration>) -> Result<LearnHandle, EngineError> {
        let session = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        let window = window.unwrap_or_else(|| self.shared.settings.learn_window());
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::EnterLearn {
            session,
            window,
            reply,
        })
        .await?;
        Ok(LearnHandle {
            session,
            engine: self.clone(),
            rx,
        })
    }

    /// Register (or clear) a callback invoked with every learn capture
    pub async fn set_learn_listener(&self, listener: Option<LearnListener>) -> Result<(), EngineError> {
        self.command(EngineCommand::SetLearnListener(listener)).await
    }

    /// Drop all per-binding throttle state without sending pending values
    ///
    /// Returns the number of pending values discarded.
    pub async fn reset_dispatch_state(&self) -> Result<usize, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::ResetDispatchState { reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub fn stats(&self) -> EngineStats {
        let s = &self.shared.stats;
        EngineStats {
            received: s.received.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            sent: s.sent.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            malformed: s.malformed.load(Ordering::Relaxed),
            unbound: s.unbound.load(Ordering::Relaxed),
            telemetry_dropped: self.shared.telemetry.dropped(),
        }
    }

    /// Stop the engine
    ///
    /// Producers stop, pending flushes are discarded without being sent, the
    /// queue is closed and every adapter is shut down. Idempotent.
    pub async fn shutdown(&self) {
        if self.shared.shutdown_tx.send_replace(true) {
            return;
        }
        info!("Engine shutting down...");
        self.shared.queue.close();

        let producers: Vec<_> = self.shared.producers.lock().drain(..).collect();
        for producer in producers {
            if let Err(e) = producer.await {
                warn!("Producer task failed: {}", e);
            }
        }

        let task = self.shared.dispatcher_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Dispatcher task failed: {}", e);
            }
        }

        if let Err(errors) = self.shared.adapters.shutdown_all().await {
            warn!("{} adapter(s) failed to shut down", errors.len());
        }
        info!("Engine stopped");
    }
}

/// Pending learn session
pub struct LearnHandle {
    session: u64,
    engine: EngineHandle,
    rx: oneshot::Receiver<LearnCapture>,
}

impl LearnHandle {
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Cancel this session. No capture will be delivered.
    pub async fn cancel(&self) -> Result<(), EngineError> {
        self.engine
            .command(EngineCommand::CancelLearn {
                session: self.session,
            })
            .await
    }

    /// Wait for the capture
    ///
    /// `None` if the session was cancelled, replaced, or the engine stopped.
    pub async fn captured(self) -> Option<LearnCapture> {
        self.rx.await.ok()
    }
}

struct DispatchLoop {
    dispatcher: Dispatcher,
    resolver: BindingResolver,
    store: MappingStore,
    adapters: AdapterRegistry,
    telemetry: Telemetry,
    stats: Arc<StatsCounters>,
    send_timeout: Duration,
    report_unbound: bool,
    learn_reply: Option<(u64, oneshot::Sender<LearnCapture>)>,
    learn_listener: Option<LearnListener>,
}

impl DispatchLoop {
    async fn run(
        mut self,
        queue: Arc<EventQueue>,
        mut mapping_rx: watch::Receiver<Arc<MappingTable>>,
        mut cmd_rx: mpsc::Receiver<EngineCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        mapping_rx.borrow_and_update();
        let mut mappings_open = true;

        loop {
            let deadline = match (self.dispatcher.next_deadline(), self.resolver.learn_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let sleep_target = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                changed = mapping_rx.changed(), if mappings_open => match changed {
                    Ok(()) => {
                        let table = mapping_rx.borrow_and_update().clone();
                        let dropped = self.dispatcher.reconcile(&table);
                        debug!("Mapping table updated ({} bindings, {} states dropped)", table.len(), dropped);
                    }
                    Err(_) => mappings_open = false,
                },
                _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                    self.on_deadline(Instant::now()).await;
                }
                event = queue.pop() => match event {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },
            }
        }

        let discarded = self.dispatcher.clear();
        if discarded > 0 {
            info!("Discarded {} pending value(s) on shutdown", discarded);
        }
        debug!("Dispatcher loop stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::EnterLearn { session, window, reply } => {
                self.resolver.begin_learn(session, window);
                // Replaces any previous session; its handle sees a cancellation
                self.learn_reply = Some((session, reply));
            }
            EngineCommand::CancelLearn { session } => {
                if self.resolver.cancel_learn(session) {
                    self.learn_reply = None;
                }
            }
            EngineCommand::SetLearnListener(listener) => {
                self.learn_listener = listener;
            }
            EngineCommand::ResetDispatchState { reply } => {
                let discarded = self.dispatcher.clear();
                info!("Dispatch state reset ({} pending value(s) discarded)", discarded);
                let _ = reply.send(discarded);
            }
        }
    }

    async fn on_event(&mut self, event: ControlEvent) {
        let now = Instant::now();
        let table = self.store.snapshot();

        match self.resolver.resolve(&table, &event, now) {
            Resolution::Bound(binding) => {
                if let Some(dispatch) = self.dispatcher.on_event(&binding, &event, now) {
                    self.deliver(dispatch).await;
                }
            }
            Resolution::Disabled => {
                trace!("Binding for {} is disabled", event.identity);
            }
            Resolution::Unbound => {
                self.stats.unbound.fetch_add(1, Ordering::Relaxed);
                if self.report_unbound
                    && !self.resolver.is_learning()
                    && self.resolver.should_report_unbound(&event.identity, now)
                {
                    self.telemetry.unbound(&event.identity);
                }
            }
        }

        self.poll_learn(now);
    }

    async fn on_deadline(&mut self, now: Instant) {
        self.poll_learn(now);

        let table = self.store.snapshot();
        for dispatch in self.dispatcher.flush_due(&table, now) {
            self.deliver(dispatch).await;
        }
    }

    fn poll_learn(&mut self, now: Instant) {
        let Some(capture) = self.resolver.poll_learn(now) else {
            return;
        };
        if let Some(listener) = &self.learn_listener {
            listener(&capture);
        }
        if let Some((session, reply)) = self.learn_reply.take() {
            if session == capture.session {
                let _ = reply.send(capture);
            }
        }
    }

    async fn deliver(&mut self, dispatch: Dispatch) {
        let target = &dispatch.binding.target;
        let result = match self.adapters.get(&target.backend_id).await {
            None => Err(BackendError::UnknownAdapter(target.backend_id.clone())),
            Some(adapter) => {
                match tokio::time::timeout(self.send_timeout, adapter.send(&target.parameter, dispatch.value)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout {
                        backend: target.backend_id.clone(),
                        timeout: self.send_timeout,
                    }),
                }
            }
        };

        match result {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{} -> {} = {} ({:?})",
                    dispatch.identity(),
                    target,
                    dispatch.value,
                    dispatch.reason
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.dispatcher.send_failed(dispatch.identity());
                self.telemetry.backend_error(dispatch.identity(), &e);
            }
        }
    }
}
