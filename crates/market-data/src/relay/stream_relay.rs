//! Live stream fan-out.
//!
//! A [`StreamRelay`] subscribes through the router and pushes every event to
//! each attached sink. Under [`BackpressurePolicy::Block`] the relay awaits
//! every sink before pulling the next event. Under [`BackpressurePolicy::Drop`]
//! each sink gets a bounded buffer drained by its own worker task, and events
//! that do not fit are dropped and counted against that sink.
//!
//! A sink that fails `failure_threshold` times in a row is detached and
//! closed; the remaining sinks keep receiving.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::metrics::{RelayMetrics, RelayMetricsSnapshot};
use super::sink::EventSink;
use crate::config::{BackpressurePolicy, RelayConfig};
use crate::errors::{MarketDataError, RelayError, SinkError};
use crate::models::{DataRequest, Payload, TransportKind};
use crate::provider::EventStream;
use crate::router::DataRouter;

/// A sink attached to the relay with its failure streak.
struct SinkBinding {
    sink: Arc<dyn EventSink>,
    consecutive_failures: AtomicU32,
}

impl SinkBinding {
    fn name(&self) -> &str {
        self.sink.name()
    }
}

/// State shared between the relay loop and drop-mode workers.
struct RelayShared {
    metrics: RelayMetrics,
    errors: Mutex<Vec<RelayError>>,
    sinks: Mutex<Vec<Arc<SinkBinding>>>,
    failure_threshold: u32,
}

impl RelayShared {
    fn sinks(&self) -> MutexGuard<'_, Vec<Arc<SinkBinding>>> {
        self.sinks.lock().unwrap_or_else(|poisoned| {
            warn!("Relay sink list lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn errors(&self) -> MutexGuard<'_, Vec<RelayError>> {
        self.errors.lock().unwrap_or_else(|poisoned| {
            warn!("Relay error list lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn attached(&self) -> Vec<Arc<SinkBinding>> {
        self.sinks().clone()
    }

    fn is_attached(&self, binding: &Arc<SinkBinding>) -> bool {
        self.sinks().iter().any(|b| Arc::ptr_eq(b, binding))
    }

    /// Publish one event; returns false once the sink has been detached.
    async fn deliver(&self, binding: &Arc<SinkBinding>, event: &Payload) -> bool {
        match binding.sink.publish(event).await {
            Ok(()) => {
                binding.consecutive_failures.store(0, Ordering::SeqCst);
                self.metrics.record_published();
                true
            }
            Err(e) => {
                self.metrics.record_failed();
                let failures = binding.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    "Sink '{}' publish failed ({} in a row): {}",
                    binding.name(),
                    failures,
                    e
                );
                if failures >= self.failure_threshold {
                    self.detach(binding, failures, e).await;
                    false
                } else {
                    true
                }
            }
        }
    }

    async fn detach(&self, binding: &Arc<SinkBinding>, failures: u32, last_error: SinkError) {
        let removed = {
            let mut sinks = self.sinks();
            let before = sinks.len();
            sinks.retain(|b| !Arc::ptr_eq(b, binding));
            sinks.len() != before
        };
        if !removed {
            return;
        }

        let err = RelayError {
            sink: binding.name().to_string(),
            consecutive_failures: failures,
            last_error: last_error.message,
        };
        error!("{}", err);
        self.errors().push(err);

        if let Err(e) = binding.sink.close().await {
            warn!("Failed to close detached sink '{}': {}", binding.name(), e);
        }
    }
}

/// Per-sink buffer and the worker draining it.
struct Lane {
    binding: Arc<SinkBinding>,
    tx: mpsc::Sender<Payload>,
    worker: JoinHandle<()>,
}

enum Dispatcher {
    Block,
    Drop { buffer_size: usize, lanes: Vec<Lane> },
}

impl Dispatcher {
    fn new(config: &RelayConfig) -> Self {
        match config.backpressure {
            BackpressurePolicy::Block => Self::Block,
            BackpressurePolicy::Drop => Self::Drop {
                buffer_size: config.buffer_size,
                lanes: Vec::new(),
            },
        }
    }

    /// Fan one event out. Returns false when no sinks remain.
    async fn dispatch(&mut self, shared: &Arc<RelayShared>, event: Payload) -> bool {
        match self {
            Self::Block => {
                for binding in shared.attached() {
                    shared.deliver(&binding, &event).await;
                }
            }
            Self::Drop { buffer_size, lanes } => {
                sync_lanes(shared, lanes, *buffer_size);
                lanes.retain(|lane| match lane.tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        shared.metrics.record_dropped(lane.binding.name());
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
        }
        !shared.sinks().is_empty()
    }

    /// Let workers drain their buffers, or abort them once cancelled.
    async fn finish(self, token: &CancellationToken) {
        let Self::Drop { lanes, .. } = self else {
            return;
        };
        for lane in lanes {
            let Lane {
                binding,
                tx,
                mut worker,
            } = lane;
            drop(tx);
            if token.is_cancelled() {
                worker.abort();
                continue;
            }
            tokio::select! {
                _ = token.cancelled() => worker.abort(),
                result = &mut worker => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!("Relay worker for sink '{}' panicked", binding.name());
                        }
                    }
                }
            }
        }
    }
}

/// Align worker lanes with the attached sinks.
fn sync_lanes(shared: &Arc<RelayShared>, lanes: &mut Vec<Lane>, buffer_size: usize) {
    lanes.retain(|lane| shared.is_attached(&lane.binding));
    for binding in shared.attached() {
        if lanes.iter().any(|lane| Arc::ptr_eq(&lane.binding, &binding)) {
            continue;
        }
        let (tx, mut rx) = mpsc::channel::<Payload>(buffer_size);
        let worker_shared = shared.clone();
        let worker_binding = binding.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !worker_shared.deliver(&worker_binding, &event).await {
                    break;
                }
            }
        });
        lanes.push(Lane {
            binding,
            tx,
            worker,
        });
    }
}

enum PumpOutcome {
    Ended,
    Cancelled,
    NoSinks,
    Upstream(MarketDataError),
}

/// Fans a live stream out to pluggable sinks.
pub struct StreamRelay {
    router: Arc<DataRouter>,
    config: RelayConfig,
    shared: Arc<RelayShared>,
    shutdown: CancellationToken,
    active: tokio::sync::Mutex<()>,
}

impl StreamRelay {
    pub fn new(router: Arc<DataRouter>, config: RelayConfig) -> Result<Self, MarketDataError> {
        config.validate()?;
        Ok(Self {
            router,
            shared: Arc::new(RelayShared {
                metrics: RelayMetrics::new(),
                errors: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
                failure_threshold: config.failure_threshold,
            }),
            config,
            shutdown: CancellationToken::new(),
            active: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Attach a sink. Names must be unique within the relay.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> Result<(), MarketDataError> {
        if self.shutdown.is_cancelled() {
            return Err(MarketDataError::InvalidRequest {
                message: "relay has been stopped".to_string(),
            });
        }
        let mut sinks = self.shared.sinks();
        if sinks.iter().any(|b| b.name() == sink.name()) {
            return Err(MarketDataError::configuration(format!(
                "sink '{}' is already attached",
                sink.name()
            )));
        }
        info!("Attached sink '{}'", sink.name());
        sinks.push(Arc::new(SinkBinding {
            sink,
            consecutive_failures: AtomicU32::new(0),
        }));
        Ok(())
    }

    /// Detach a sink without closing it.
    pub fn remove_sink(&self, name: &str) -> Option<Arc<dyn EventSink>> {
        let mut sinks = self.shared.sinks();
        let index = sinks.iter().position(|b| b.name() == name)?;
        Some(sinks.remove(index).sink.clone())
    }

    /// Names of the attached sinks, in attach order.
    pub fn sinks(&self) -> Vec<String> {
        self.shared
            .sinks()
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    pub fn metrics(&self) -> RelayMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Every sink detachment recorded so far.
    pub fn relay_errors(&self) -> Vec<RelayError> {
        self.shared.errors().clone()
    }

    /// Relay a live stream until it ends, fails, or [`stop`](Self::stop) is called.
    ///
    /// Returns `Err(Relay)` when the last sink was detached during this run.
    /// The upstream stream is cancelled on every exit path; sinks stay
    /// attached until `stop`.
    pub async fn relay(&self, request: &DataRequest) -> Result<(), MarketDataError> {
        if request.transport() != TransportKind::Ws {
            return Err(MarketDataError::InvalidRequest {
                message: format!("relay requires the ws transport, got {}", request.transport()),
            });
        }
        if self.shutdown.is_cancelled() {
            return Err(MarketDataError::InvalidRequest {
                message: "relay has been stopped".to_string(),
            });
        }

        let _active = self.active.lock().await;
        if self.shared.sinks().is_empty() {
            return Err(MarketDataError::configuration("relay has no sinks attached"));
        }

        let token = self.shutdown.child_token();
        let baseline = self.shared.errors().len();
        let mut dispatcher = Dispatcher::new(&self.config);
        let result = self.run(request, &token, &mut dispatcher).await;
        dispatcher.finish(&token).await;

        match result {
            Ok(PumpOutcome::NoSinks) => {
                let detached = self.shared.errors().get(baseline..).and_then(|e| e.last().cloned());
                match detached {
                    Some(err) => Err(err.into()),
                    None => {
                        info!("Relay stopped: every sink was removed");
                        Ok(())
                    }
                }
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Cancel the running relay and close every attached sink.
    ///
    /// Waits for the relay loop to finish cleanup. Later calls are no-ops.
    pub async fn stop(&self) -> Result<(), MarketDataError> {
        self.shutdown.cancel();
        let _active = self.active.lock().await;

        let sinks: Vec<Arc<SinkBinding>> = self.shared.sinks().drain(..).collect();
        let mut failures = Vec::new();
        for binding in sinks {
            if let Err(e) = binding.sink.close().await {
                warn!("Failed to close sink '{}': {}", binding.name(), e);
                failures.push(format!("{}: {}", binding.name(), e.message));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::new(failures.join("; ")).into())
        }
    }

    async fn run(
        &self,
        request: &DataRequest,
        token: &CancellationToken,
        dispatcher: &mut Dispatcher,
    ) -> Result<PumpOutcome, MarketDataError> {
        let mut reconnects = 0;
        loop {
            let opened = tokio::select! {
                _ = token.cancelled() => return Ok(PumpOutcome::Cancelled),
                opened = self.router.route_stream(request) => opened,
            };
            let error = match opened {
                Ok(mut stream) => {
                    let outcome = self.pump(&mut stream, token, dispatcher).await;
                    if let Err(e) = stream.cancel().await {
                        warn!("Failed to close upstream stream {}: {}", stream.label(), e);
                    }
                    match outcome {
                        PumpOutcome::Upstream(e) => e,
                        other => return Ok(other),
                    }
                }
                Err(e) if reconnects == 0 => return Err(e),
                Err(e) => e,
            };

            if !error.is_retryable() || reconnects >= self.config.max_reconnects {
                return Err(error);
            }
            reconnects += 1;
            self.shared.metrics.record_reconnect();
            warn!(
                "Upstream stream failed ({}), reconnecting {}/{}",
                error, reconnects, self.config.max_reconnects
            );
            let delay = error.retry_after().unwrap_or(self.config.reconnect_delay());
            tokio::select! {
                _ = token.cancelled() => return Ok(PumpOutcome::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump(
        &self,
        stream: &mut EventStream,
        token: &CancellationToken,
        dispatcher: &mut Dispatcher,
    ) -> PumpOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return PumpOutcome::Cancelled,
                next = stream.next() => next,
            };
            let event = match next {
                None => return PumpOutcome::Ended,
                Some(Err(e)) => return PumpOutcome::Upstream(e),
                Some(Ok(event)) => event,
            };
            self.shared.metrics.record_event();

            let alive = tokio::select! {
                biased;
                _ = token.cancelled() => return PumpOutcome::Cancelled,
                alive = dispatcher.dispatch(&self.shared, event) => alive,
            };
            if !alive {
                return PumpOutcome::NoSinks;
            }
        }
    }
}
