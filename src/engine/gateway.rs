//! Engine gateway: the single authoritative channel to one render engine.
//!
//! The gateway never queues. At most one render is outstanding; a second
//! `render` while busy is rejected with [`EngineError::Busy`] and callers are
//! expected to consult [`EngineGateway::is_busy`] first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{gauge, histogram};
use tokio::sync::{OnceCell, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Capabilities, MemoryUsage, Parameters, QualityPresets, RenderOptions, RenderProgress,
    RenderQuality, RenderRequest, RenderResult, apply_quality_settings,
};
use crate::util::lock::{mutex_lock, rw_read, rw_write};
use crate::util::{ListenerList, SubscriptionId};

use super::error::EngineError;
use super::port::RenderEngine;
use super::protocol::{INIT_REQUEST_ID, InboundMessage, OutboundMessage, RenderPayload};
use super::transport::{EngineTransport, InboundReceiver};

const SOURCE: &str = "engine::gateway";
const METRIC_RENDER_MS: &str = "tessera_render_ms";
const METRIC_ENGINE_MEMORY_PERCENT: &str = "tessera_engine_memory_percent";

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_MEMORY_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MEMORY_WARNING_PERCENT: f64 = 80.0;

/// Gateway tuning.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub presets: QualityPresets,
    /// How long `initialize` waits for `READY`.
    pub init_timeout: Duration,
    /// Slack on top of a render's timeout before the gateway gives up locally.
    pub timeout_grace: Duration,
    pub memory_query_timeout: Duration,
    /// Usage percentage above which memory-warning listeners fire.
    pub memory_warning_percent: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            presets: QualityPresets::default(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            memory_query_timeout: DEFAULT_MEMORY_QUERY_TIMEOUT,
            memory_warning_percent: DEFAULT_MEMORY_WARNING_PERCENT,
        }
    }
}

impl From<&crate::config::Settings> for GatewayConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            presets: settings.quality.clone(),
            init_timeout: settings.engine.init_timeout,
            timeout_grace: settings.engine.timeout_grace,
            memory_query_timeout: settings.engine.memory_query_timeout,
            memory_warning_percent: settings.engine.memory_warning_percent,
        }
    }
}

type RenderOutcome = Result<RenderResult, EngineError>;

struct PendingRender {
    sender: oneshot::Sender<RenderOutcome>,
    timeout_ms: u64,
}

struct GatewayInner {
    config: GatewayConfig,
    transport: Box<dyn EngineTransport>,
    ready: AtomicBool,
    terminated: AtomicBool,
    capabilities: RwLock<Option<Capabilities>>,
    initialized: OnceCell<Capabilities>,
    init_waiter: Mutex<Option<oneshot::Sender<Result<Capabilities, EngineError>>>>,
    pending: DashMap<String, PendingRender>,
    current: Mutex<Option<String>>,
    memory_waiters: Mutex<Vec<oneshot::Sender<MemoryUsage>>>,
    progress_listeners: ListenerList<RenderProgress>,
    memory_warning_listeners: ListenerList<MemoryUsage>,
}

/// Cloneable handle to one engine instance.
///
/// Construction spawns the inbound dispatch task, so it must happen inside a
/// Tokio runtime.
#[derive(Clone)]
pub struct EngineGateway {
    inner: Arc<GatewayInner>,
}

impl EngineGateway {
    pub fn new<T>(transport: T, inbound: InboundReceiver, config: GatewayConfig) -> Self
    where
        T: EngineTransport + 'static,
    {
        let inner = Arc::new(GatewayInner {
            config,
            transport: Box::new(transport),
            ready: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            capabilities: RwLock::new(None),
            initialized: OnceCell::new(),
            init_waiter: Mutex::new(None),
            pending: DashMap::new(),
            current: Mutex::new(None),
            memory_waiters: Mutex::new(Vec::new()),
            progress_listeners: ListenerList::new(SOURCE),
            memory_warning_listeners: ListenerList::new(SOURCE),
        });

        tokio::spawn(dispatch(Arc::downgrade(&inner), inbound));

        Self { inner }
    }

    /// Bring the engine up. Idempotent: concurrent and repeated calls share
    /// the first successful result. A failed attempt may be retried.
    pub async fn initialize(
        &self,
        asset_base_url: Option<String>,
    ) -> Result<Capabilities, EngineError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(EngineError::Terminated);
        }

        let inner = &self.inner;
        inner
            .initialized
            .get_or_try_init(|| inner.run_init(asset_base_url))
            .await
            .cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        mutex_lock(&self.inner.current, SOURCE, "is_busy").is_some()
    }

    /// Id of the request currently in flight.
    pub fn current_request(&self) -> Option<String> {
        mutex_lock(&self.inner.current, SOURCE, "current_request").clone()
    }

    /// Last capability record reported by the engine; `available` tracks
    /// whether the engine is currently ready.
    pub fn capabilities(&self) -> Capabilities {
        let mut capabilities = rw_read(&self.inner.capabilities, SOURCE, "capabilities")
            .clone()
            .unwrap_or_default();
        capabilities.available = capabilities.available && self.is_ready();
        capabilities
    }

    #[instrument(
        skip_all,
        fields(quality = %options.quality.tier(), format = %options.output_format)
    )]
    pub async fn render(
        &self,
        scad_source: String,
        parameters: Parameters,
        options: RenderOptions,
    ) -> Result<RenderResult, EngineError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(EngineError::Terminated);
        }
        if !self.is_ready() {
            return Err(EngineError::NotReady);
        }

        let preset = match &options.quality {
            RenderQuality::Tier(tier) => self.inner.config.presets.get(tier),
            RenderQuality::Preset { preset, .. } => preset.clone(),
        };
        let render_timeout = options.timeout.unwrap_or_else(|| preset.timeout());
        let request = RenderRequest {
            id: format!("render-{}", Uuid::new_v4().simple()),
            scad_source,
            parameters: apply_quality_settings(&parameters, &preset),
            output_format: options.output_format,
            timeout: render_timeout,
            quality: options.quality.tier().clone(),
            project: options.project,
            libraries: options.libraries,
        };

        let receiver = self.inner.begin(&request)?;
        let started = Instant::now();
        debug!(request_id = %request.id, timeout_ms = render_timeout.as_millis() as u64, "Render dispatched");

        if let Err(err) = self
            .inner
            .transport
            .send(OutboundMessage::Render(RenderPayload::from(&request)))
        {
            let error = EngineError::from(err);
            self.inner.settle(&request.id, |_| Err(error));
        }

        let outcome = match timeout(render_timeout + self.inner.config.timeout_grace, receiver).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(EngineError::Terminated),
            Err(_elapsed) => {
                self.inner.expire(&request.id);
                Err(EngineError::Timeout {
                    after_ms: duration_ms(render_timeout),
                })
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let outcome_label = match &outcome {
            Ok(_) => "complete",
            Err(err) => err.kind().as_str(),
        };
        histogram!(
            METRIC_RENDER_MS,
            "quality" => request.quality.to_string(),
            "outcome" => outcome_label
        )
        .record(elapsed_ms);

        match &outcome {
            Ok(result) => info!(
                request_id = %request.id,
                elapsed_ms,
                bytes = result.mesh_data.len(),
                triangles = result.stats.triangle_count,
                "Render complete"
            ),
            Err(err) => warn!(request_id = %request.id, elapsed_ms, error = %err, "Render failed"),
        }

        outcome
    }

    /// Reject the in-flight render immediately and ask the engine to stop it.
    /// The engine's own acknowledgement is ignored when it arrives.
    pub fn cancel(&self) {
        let active = mutex_lock(&self.inner.current, SOURCE, "cancel").clone();
        let Some(request_id) = active else {
            return;
        };

        if let Err(err) = self.inner.transport.send(OutboundMessage::Cancel {
            request_id: request_id.clone(),
        }) {
            warn!(request_id = %request_id, error = %err, "Failed to deliver cancel to engine");
        }

        if self.inner.settle(&request_id, |_| Err(EngineError::Cancelled)) {
            info!(request_id = %request_id, "Render cancelled");
        }
    }

    /// Query engine memory. Resolves immediately as unavailable when the
    /// engine is not ready, and falls back to unavailable on timeout.
    pub async fn memory_usage(&self) -> MemoryUsage {
        if !self.is_ready() {
            return MemoryUsage::unavailable();
        }

        let (sender, receiver) = oneshot::channel();
        mutex_lock(&self.inner.memory_waiters, SOURCE, "memory_usage").push(sender);

        if let Err(err) = self.inner.transport.send(OutboundMessage::GetMemoryUsage {}) {
            warn!(error = %err, "Failed to request engine memory usage");
            return MemoryUsage::unavailable();
        }

        match timeout(self.inner.config.memory_query_timeout, receiver).await {
            Ok(Ok(usage)) => usage,
            _ => MemoryUsage::unavailable(),
        }
    }

    pub fn on_progress<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RenderProgress) + Send + Sync + 'static,
    {
        self.inner.progress_listeners.subscribe(listener)
    }

    /// Fires when a memory report exceeds the configured high-water mark.
    pub fn on_memory_warning<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&MemoryUsage) + Send + Sync + 'static,
    {
        self.inner.memory_warning_listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.progress_listeners.unsubscribe(id)
            || self.inner.memory_warning_listeners.unsubscribe(id)
    }

    /// Tear the channel down and reject everything still outstanding.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Terminating render engine");
        self.inner.transport.terminate();
        self.inner.shutdown(EngineError::Terminated);
    }
}

#[async_trait]
impl RenderEngine for EngineGateway {
    async fn render(
        &self,
        scad_source: String,
        parameters: Parameters,
        options: RenderOptions,
    ) -> Result<RenderResult, EngineError> {
        EngineGateway::render(self, scad_source, parameters, options).await
    }

    fn cancel(&self) {
        EngineGateway::cancel(self);
    }

    fn is_busy(&self) -> bool {
        EngineGateway::is_busy(self)
    }

    fn capabilities(&self) -> Capabilities {
        EngineGateway::capabilities(self)
    }
}

impl GatewayInner {
    async fn run_init(&self, asset_base_url: Option<String>) -> Result<Capabilities, EngineError> {
        if self.ready.load(Ordering::Acquire)
            && let Some(capabilities) = rw_read(&self.capabilities, SOURCE, "run_init").clone()
        {
            return Ok(capabilities);
        }

        let (sender, receiver) = oneshot::channel();
        *mutex_lock(&self.init_waiter, SOURCE, "run_init") = Some(sender);

        info!(asset_base_url = asset_base_url.as_deref(), "Initialising render engine");
        self.transport
            .send(OutboundMessage::Init { asset_base_url })?;

        match timeout(self.config.init_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(EngineError::Terminated),
            Err(_elapsed) => {
                mutex_lock(&self.init_waiter, SOURCE, "run_init.timeout").take();
                Err(EngineError::Timeout {
                    after_ms: duration_ms(self.config.init_timeout),
                })
            }
        }
    }

    fn begin(&self, request: &RenderRequest) -> Result<oneshot::Receiver<RenderOutcome>, EngineError> {
        let mut current = mutex_lock(&self.current, SOURCE, "begin");
        if let Some(active) = current.as_ref() {
            return Err(EngineError::Busy {
                request_id: active.clone(),
            });
        }

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            request.id.clone(),
            PendingRender {
                sender,
                timeout_ms: duration_ms(request.timeout),
            },
        );
        *current = Some(request.id.clone());
        Ok(receiver)
    }

    /// Resolve the pending render `request_id`. Returns false when nothing was
    /// waiting for it (already settled, cancelled, or never issued here).
    fn settle<F>(&self, request_id: &str, outcome: F) -> bool
    where
        F: FnOnce(&PendingRender) -> RenderOutcome,
    {
        let pending = self.pending.remove(request_id).map(|(_, pending)| pending);
        {
            let mut current = mutex_lock(&self.current, SOURCE, "settle");
            if current.as_deref() == Some(request_id) {
                *current = None;
            }
        }

        match pending {
            Some(pending) => {
                let result = outcome(&pending);
                let _ = pending.sender.send(result);
                true
            }
            None => {
                debug!(request_id, "Dropping engine message for settled or unknown request");
                false
            }
        }
    }

    /// Local watchdog fired: forget the request and tell the engine to stop.
    fn expire(&self, request_id: &str) {
        self.pending.remove(request_id);
        {
            let mut current = mutex_lock(&self.current, SOURCE, "expire");
            if current.as_deref() == Some(request_id) {
                *current = None;
            }
        }
        if let Err(err) = self.transport.send(OutboundMessage::Cancel {
            request_id: request_id.to_string(),
        }) {
            debug!(request_id, error = %err, "Cancel after local timeout not delivered");
        }
    }

    fn handle(&self, message: InboundMessage) {
        match message {
            InboundMessage::Ready {
                init_duration_ms,
                mut capabilities,
            } => {
                capabilities.available = true;
                *rw_write(&self.capabilities, SOURCE, "handle.ready") = Some(capabilities.clone());
                self.ready.store(true, Ordering::Release);
                info!(
                    init_duration_ms,
                    version = capabilities.version.as_deref().unwrap_or("unknown"),
                    manifold = capabilities.has_manifold,
                    "Render engine ready"
                );
                if let Some(waiter) = mutex_lock(&self.init_waiter, SOURCE, "handle.ready").take() {
                    let _ = waiter.send(Ok(capabilities));
                }
            }
            InboundMessage::Progress {
                request_id,
                percent,
                message,
            } => {
                debug!(request_id = %request_id, percent, message = %message, "Render progress");
                self.progress_listeners.emit(&RenderProgress {
                    request_id,
                    percent,
                    message,
                });
            }
            InboundMessage::Complete {
                request_id,
                data,
                stats,
            } => {
                let result = RenderResult {
                    request_id: request_id.clone(),
                    mesh_data: data,
                    stats,
                };
                self.settle(&request_id, |_| Ok(result));
            }
            InboundMessage::Error {
                request_id,
                code,
                message,
            } => {
                if request_id == INIT_REQUEST_ID {
                    warn!(code = %code, message = %message, "Render engine failed to initialise");
                    if let Some(waiter) =
                        mutex_lock(&self.init_waiter, SOURCE, "handle.error").take()
                    {
                        let _ = waiter.send(Err(EngineError::render_failed(code, message)));
                    }
                    return;
                }
                self.settle(&request_id, |pending| {
                    Err(EngineError::from_engine(&code, &message, pending.timeout_ms))
                });
            }
            InboundMessage::MemoryUsage {
                used_mb,
                limit_mb,
                percent,
            } => {
                let usage = MemoryUsage {
                    used_mb,
                    limit_mb,
                    percent,
                    available: true,
                };
                gauge!(METRIC_ENGINE_MEMORY_PERCENT).set(percent);

                if percent > self.config.memory_warning_percent {
                    warn!(used_mb, limit_mb, percent, "Render engine memory usage is high");
                    self.memory_warning_listeners.emit(&usage);
                }

                let waiters: Vec<_> =
                    mutex_lock(&self.memory_waiters, SOURCE, "handle.memory").drain(..).collect();
                for waiter in waiters {
                    let _ = waiter.send(usage);
                }
            }
        }
    }

    fn shutdown(&self, error: EngineError) {
        self.ready.store(false, Ordering::Release);

        if let Some(waiter) = mutex_lock(&self.init_waiter, SOURCE, "shutdown").take() {
            let _ = waiter.send(Err(error.clone()));
        }

        let outstanding: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for request_id in outstanding {
            self.settle(&request_id, |_| Err(error.clone()));
        }

        mutex_lock(&self.memory_waiters, SOURCE, "shutdown").clear();
    }
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        self.transport.terminate();
    }
}

async fn dispatch(inner: Weak<GatewayInner>, mut inbound: InboundReceiver) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle(message);
    }

    if let Some(inner) = inner.upgrade()
        && !inner.terminated.load(Ordering::Acquire)
    {
        warn!("Render engine channel closed");
        inner.shutdown(EngineError::Terminated);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
