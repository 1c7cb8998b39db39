use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::cache::{PreviewCache, PreviewCacheConfig, PreviewCacheEntry};
use crate::domain::{
    Fingerprint, LibraryMount, OutputFormat, Parameters, ProjectContext, QualityPreset,
    QualityTier, RenderOptions, RenderQuality, RenderResult, resolve_preview_color,
};
use crate::engine::{EngineError, RenderEngine, wait_until_idle};
use crate::util::lock::mutex_lock;
use crate::util::{ListenerList, SubscriptionId};

use super::error::PreviewError;
use super::presenter::PreviewPresenter;
use super::state::{PreviewFrame, PreviewState};

const SOURCE: &str = "application::preview";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);
const DEFAULT_BUSY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Quiet period after the last parameter change before a render fires.
    pub debounce: Duration,
    /// How often a deferred change re-checks whether the engine is idle.
    pub busy_poll_interval: Duration,
    pub cache: PreviewCacheConfig,
    /// Parameter names that may carry a preview colour, in priority order.
    pub color_params: Vec<String>,
    pub auto_preview: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            busy_poll_interval: DEFAULT_BUSY_POLL_INTERVAL,
            cache: PreviewCacheConfig::default(),
            color_params: Vec::new(),
            auto_preview: true,
        }
    }
}

impl From<&crate::config::Settings> for PreviewConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            debounce: settings.preview.debounce,
            busy_poll_interval: settings.preview.busy_poll_interval,
            cache: PreviewCacheConfig::from(&settings.preview),
            color_params: settings.preview.color_params.clone(),
            auto_preview: settings.preview.auto_preview,
        }
    }
}

struct FullRender {
    fingerprint: Fingerprint,
    result: RenderResult,
}

struct DriverState {
    source: Option<String>,
    project: Option<ProjectContext>,
    libraries: Vec<LibraryMount>,
    /// Bumped on every source change; results from older versions are dropped.
    content_version: u64,
    state: PreviewState,
    /// Fingerprint of the mesh last presented, while it is still fresh.
    current_fingerprint: Option<Fingerprint>,
    /// Whether anything has been presented for the current content.
    has_result: bool,
    latest_parameters: Option<Parameters>,
    pending_parameters: Option<Parameters>,
    in_flight: Option<Fingerprint>,
    debounce: Option<JoinHandle<()>>,
    debounce_generation: u64,
    debounce_interval: Duration,
    busy_watch: Option<JoinHandle<()>>,
    auto_preview: bool,
    quality_override: Option<QualityPreset>,
    /// Bumped on every preview quality change; renders issued under an older
    /// quality never reach the cache.
    quality_generation: u64,
    color_params: Vec<String>,
    last_full: Option<FullRender>,
}

impl DriverState {
    fn transition(&mut self, next: PreviewState) -> Option<PreviewState> {
        if self.state == next {
            return None;
        }
        debug!(
            from = %self.state,
            to = %next,
            content_version = self.content_version,
            "Preview state changed"
        );
        self.state = next;
        Some(next)
    }

    /// State to fall back to when outstanding work is dropped.
    fn settled_state(&self) -> PreviewState {
        if self.has_result {
            PreviewState::Stale
        } else {
            PreviewState::Idle
        }
    }

    fn cancel_debounce(&mut self) {
        self.debounce_generation += 1;
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }

    fn cancel_busy_watch(&mut self) {
        if let Some(handle) = self.busy_watch.take() {
            handle.abort();
        }
    }

    fn preview_options(&self) -> RenderOptions {
        let quality = match &self.quality_override {
            Some(preset) => RenderQuality::Preset {
                tier: QualityTier::Preview,
                preset: preset.clone(),
            },
            None => RenderQuality::Tier(QualityTier::Preview),
        };
        RenderOptions {
            quality,
            ..RenderOptions::preview()
        }
        .with_project(self.project.clone())
        .with_libraries(self.libraries.clone())
    }
}

struct DriverInner {
    engine: Arc<dyn RenderEngine>,
    presenter: Arc<dyn PreviewPresenter>,
    cache: PreviewCache,
    busy_poll_interval: Duration,
    state: Mutex<DriverState>,
    state_listeners: ListenerList<PreviewState>,
    error_listeners: ListenerList<PreviewError>,
}

/// Turns a stream of parameter edits into a small number of preview renders.
///
/// All scheduling goes through Tokio tasks, so every method that may start
/// one (`on_parameter_change`, `set_auto_preview`, `refresh`) must be called
/// from within a runtime.
#[derive(Clone)]
pub struct LivePreviewDriver {
    inner: Arc<DriverInner>,
}

impl LivePreviewDriver {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        presenter: Arc<dyn PreviewPresenter>,
        config: PreviewConfig,
    ) -> Self {
        let state = DriverState {
            source: None,
            project: None,
            libraries: Vec::new(),
            content_version: 0,
            state: PreviewState::Idle,
            current_fingerprint: None,
            has_result: false,
            latest_parameters: None,
            pending_parameters: None,
            in_flight: None,
            debounce: None,
            debounce_generation: 0,
            debounce_interval: config.debounce,
            busy_watch: None,
            auto_preview: config.auto_preview,
            quality_override: None,
            quality_generation: 0,
            color_params: config.color_params,
            last_full: None,
        };

        Self {
            inner: Arc::new(DriverInner {
                engine,
                presenter,
                cache: PreviewCache::new(&config.cache),
                busy_poll_interval: config.busy_poll_interval,
                state: Mutex::new(state),
                state_listeners: ListenerList::new(SOURCE),
                error_listeners: ListenerList::new(SOURCE),
            }),
        }
    }

    pub fn on_parameter_change(&self, parameters: Parameters) {
        self.inner.on_parameter_change(parameters);
    }

    /// Render `parameters` at preview quality right away, bypassing the
    /// debounce timer and the cache lookup.
    pub async fn render_preview(&self, parameters: Parameters) -> Result<(), PreviewError> {
        self.inner.render_preview(parameters).await
    }

    /// Render `parameters` at full quality and remember the result for
    /// [`get_current_full_stl`](Self::get_current_full_stl).
    pub async fn render_full(&self, parameters: Parameters) -> Result<RenderResult, PreviewError> {
        self.inner.render_full(parameters).await
    }

    /// Last full-quality STL, only when it was rendered from `parameters`.
    pub fn get_current_full_stl(&self, parameters: &Parameters) -> Option<RenderResult> {
        let fingerprint = Fingerprint::of(parameters);
        self.inner
            .lock("get_current_full_stl")
            .last_full
            .as_ref()
            .filter(|full| full.fingerprint == fingerprint)
            .map(|full| full.result.clone())
    }

    pub fn set_scad_content(&self, source: impl Into<String>) {
        let source = source.into();
        let mut state = self.inner.lock("set_scad_content");
        if state.source.as_deref() == Some(source.as_str()) {
            return;
        }
        state.source = Some(source);
        self.inner.reset_content(state);
    }

    /// Replace the project files and library mounts that accompany the source.
    pub fn set_project_context(
        &self,
        project: Option<ProjectContext>,
        libraries: Vec<LibraryMount>,
    ) {
        let mut state = self.inner.lock("set_project_context");
        if state.project == project && state.libraries == libraries {
            return;
        }
        state.project = project;
        state.libraries = libraries;
        self.inner.reset_content(state);
    }

    /// Override the preview preset; `None` restores the configured one.
    /// Cached geometry is dropped and a fresh preview is marked stale.
    pub fn set_preview_quality(&self, preset: Option<QualityPreset>) {
        let mut state = self.inner.lock("set_preview_quality");
        state.quality_override = preset;
        state.quality_generation += 1;
        self.inner.cache.clear();

        let change = if state.current_fingerprint.take().is_some() && state.in_flight.is_none() {
            state.transition(PreviewState::Stale)
        } else {
            None
        };
        drop(state);
        self.inner.notify(change);
    }

    /// Drop the debounce timer and any deferred change, and cancel the
    /// preview render in flight.
    pub fn cancel_pending(&self) {
        let mut state = self.inner.lock("cancel_pending");
        state.cancel_debounce();
        state.cancel_busy_watch();
        state.pending_parameters = None;
        let cancel_engine = state.in_flight.is_some();

        let change = if state.state == PreviewState::Pending {
            let next = state.settled_state();
            state.transition(next)
        } else {
            None
        };
        drop(state);

        if cancel_engine {
            self.inner.engine.cancel();
        }
        self.inner.notify(change);
    }

    pub fn set_auto_preview(&self, enabled: bool) {
        let mut state = self.inner.lock("set_auto_preview");
        if state.auto_preview == enabled {
            return;
        }
        state.auto_preview = enabled;
        info!(enabled, "Auto preview toggled");

        if !enabled {
            let scheduled = state.debounce.is_some() || state.busy_watch.is_some();
            state.cancel_debounce();
            state.cancel_busy_watch();
            let change = if scheduled {
                state.pending_parameters = state.latest_parameters.clone();
                let next = if state.has_result {
                    PreviewState::Stale
                } else {
                    PreviewState::Pending
                };
                state.transition(next)
            } else {
                None
            };
            drop(state);
            self.inner.notify(change);
            return;
        }

        let resume = match state.state {
            PreviewState::Stale | PreviewState::Pending => state
                .pending_parameters
                .take()
                .or_else(|| state.latest_parameters.clone()),
            _ => None,
        };
        drop(state);

        if let Some(parameters) = resume {
            self.inner.on_parameter_change(parameters);
        }
    }

    /// Re-run the latest parameters through the pipeline, even if the
    /// preview currently matches them.
    pub fn refresh(&self) {
        let latest = {
            let mut state = self.inner.lock("refresh");
            state.current_fingerprint = None;
            state.latest_parameters.clone()
        };
        if let Some(parameters) = latest {
            self.inner.on_parameter_change(parameters);
        }
    }

    pub fn state(&self) -> PreviewState {
        self.inner.lock("state").state
    }

    pub fn content_version(&self) -> u64 {
        self.inner.lock("content_version").content_version
    }

    pub fn is_auto_preview(&self) -> bool {
        self.inner.lock("is_auto_preview").auto_preview
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn set_debounce(&self, debounce: Duration) {
        self.inner.lock("set_debounce").debounce_interval = debounce;
    }

    pub fn set_color_params(&self, color_params: Vec<String>) {
        self.inner.lock("set_color_params").color_params = color_params;
    }

    /// Colour the current preview should be tinted with.
    pub fn preview_color(&self) -> Option<String> {
        let state = self.inner.lock("preview_color");
        resolve_preview_color(&state.color_params, state.latest_parameters.as_ref())
    }

    pub fn on_state_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&PreviewState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.subscribe(listener)
    }

    /// Fires for every preview render failure. Cancellation is not a failure.
    pub fn on_render_error<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&PreviewError) + Send + Sync + 'static,
    {
        self.inner.error_listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.state_listeners.unsubscribe(id) || self.inner.error_listeners.unsubscribe(id)
    }
}

impl DriverInner {
    fn lock(&self, op: &'static str) -> MutexGuard<'_, DriverState> {
        mutex_lock(&self.state, SOURCE, op)
    }

    fn notify(&self, change: Option<PreviewState>) {
        if let Some(state) = change {
            self.state_listeners.emit(&state);
        }
    }

    fn on_parameter_change(self: &Arc<Self>, parameters: Parameters) {
        let fingerprint = Fingerprint::of(&parameters);
        let mut state = self.lock("on_parameter_change");
        state.latest_parameters = Some(parameters.clone());

        if !state.auto_preview {
            state.cancel_debounce();
            state.pending_parameters = Some(parameters);
            let next = if state.has_result {
                PreviewState::Stale
            } else {
                PreviewState::Pending
            };
            let change = state.transition(next);
            drop(state);
            self.notify(change);
            return;
        }

        if state.current_fingerprint.as_ref() == Some(&fingerprint) {
            state.cancel_debounce();
            state.pending_parameters = None;
            let change = if state.in_flight.is_none() {
                state.transition(PreviewState::Current)
            } else {
                None
            };
            drop(state);
            self.notify(change);
            return;
        }

        if let Some(entry) = self.cache.get(&fingerprint) {
            state.cancel_debounce();
            state.pending_parameters = None;
            let version = state.content_version;
            let frame = PreviewFrame {
                fingerprint: fingerprint.clone(),
                mesh_data: entry.mesh_data,
                stats: entry.stats,
                color: resolve_preview_color(&state.color_params, Some(&parameters)),
                from_cache: true,
            };
            drop(state);

            match self.presenter.present(&frame) {
                Ok(()) => {
                    let mut state = self.lock("on_parameter_change.cached");
                    if state.content_version != version {
                        return;
                    }
                    state.current_fingerprint = Some(fingerprint.clone());
                    state.has_result = true;
                    let change = if state.in_flight.is_none() {
                        state.transition(PreviewState::Current)
                    } else {
                        None
                    };
                    drop(state);
                    debug!(fingerprint = %fingerprint, "Preview served from cache");
                    self.notify(change);
                    return;
                }
                Err(err) => {
                    warn!(
                        fingerprint = %fingerprint,
                        error = %err,
                        "Cached preview failed to load; evicting"
                    );
                    self.cache.remove(&fingerprint);
                }
            }

            state = self.lock("on_parameter_change.evicted");
            let still_latest = state
                .latest_parameters
                .as_ref()
                .is_some_and(|latest| Fingerprint::of(latest) == fingerprint);
            if state.content_version != version || !still_latest {
                return;
            }
        }

        if self.engine.is_busy() {
            state.cancel_debounce();
            state.pending_parameters = Some(parameters);
            let change = state.transition(PreviewState::Pending);
            self.ensure_busy_watch(&mut state);
            drop(state);
            self.notify(change);
            return;
        }

        state.pending_parameters = None;
        self.schedule_debounce(&mut state);
        let change = state.transition(PreviewState::Pending);
        drop(state);
        self.notify(change);
    }

    fn schedule_debounce(self: &Arc<Self>, state: &mut DriverState) {
        state.cancel_debounce();
        let generation = state.debounce_generation;
        let version = state.content_version;
        let deadline = Instant::now() + state.debounce_interval;
        let weak = Arc::downgrade(self);

        state.debounce = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_debounce(generation, version);
            }
        }));
    }

    fn fire_debounce(self: &Arc<Self>, generation: u64, version: u64) {
        let mut state = self.lock("fire_debounce");
        if state.debounce_generation != generation || state.content_version != version {
            return;
        }
        state.debounce = None;

        let Some(parameters) = state.latest_parameters.clone() else {
            return;
        };

        if self.engine.is_busy() {
            state.pending_parameters = Some(parameters);
            self.ensure_busy_watch(&mut state);
            return;
        }
        drop(state);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are reported through the error listeners.
            let _ = inner.render_preview(parameters).await;
        });
    }

    fn ensure_busy_watch(self: &Arc<Self>, state: &mut DriverState) {
        if state
            .busy_watch
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.busy_poll_interval;
        let version = state.content_version;

        state.busy_watch = Some(tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.engine.is_busy() {
                    continue;
                }
                inner.resume_pending(version);
                return;
            }
        }));
    }

    fn resume_pending(self: &Arc<Self>, version: u64) {
        let pending = {
            let mut state = self.lock("resume_pending");
            state.busy_watch = None;
            if state.content_version != version {
                return;
            }
            state.pending_parameters.take()
        };

        if let Some(parameters) = pending {
            debug!("Engine idle; resuming deferred preview");
            self.on_parameter_change(parameters);
        }
    }

    async fn render_preview(self: &Arc<Self>, parameters: Parameters) -> Result<(), PreviewError> {
        let fingerprint = Fingerprint::of(&parameters);
        let issued = {
            let mut state = self.lock("render_preview");
            match state.source.clone() {
                Some(source) => {
                    state.in_flight = Some(fingerprint.clone());
                    Ok((
                        source,
                        state.content_version,
                        state.quality_generation,
                        state.preview_options(),
                        state.transition(PreviewState::Rendering),
                    ))
                }
                None => Err(state.transition(PreviewState::Error)),
            }
        };
        let (source, version, quality_generation, options) = match issued {
            Ok((source, version, quality_generation, options, change)) => {
                self.notify(change);
                (source, version, quality_generation, options)
            }
            Err(change) => {
                self.notify(change);
                let err = PreviewError::NoContent;
                self.error_listeners.emit(&err);
                return Err(err);
            }
        };

        info!(fingerprint = %fingerprint, content_version = version, "Rendering preview");
        let outcome = self
            .engine
            .render(source, parameters.clone(), options)
            .await;

        let mut state = self.lock("render_preview.settle");
        if state.content_version != version {
            debug!(
                content_version = version,
                current_version = state.content_version,
                "Discarding preview rendered for outdated content"
            );
            return Ok(());
        }
        state.in_flight = None;

        let result = match outcome {
            Ok(result) => result,
            Err(EngineError::Cancelled) => {
                let next = state.settled_state();
                let change = state.transition(next);
                drop(state);
                info!(fingerprint = %fingerprint, "Preview render cancelled");
                self.notify(change);
                return Err(EngineError::Cancelled.into());
            }
            Err(err @ EngineError::Busy { .. }) => {
                state.pending_parameters = Some(parameters);
                let change = state.transition(PreviewState::Pending);
                self.ensure_busy_watch(&mut state);
                drop(state);
                debug!(fingerprint = %fingerprint, "Engine taken by another caller; preview deferred");
                self.notify(change);
                return Err(err.into());
            }
            Err(err) => {
                let change = state.transition(PreviewState::Error);
                drop(state);
                warn!(fingerprint = %fingerprint, error = %err, "Preview render failed");
                self.notify(change);
                let err = PreviewError::from(err);
                self.error_listeners.emit(&err);
                return Err(err);
            }
        };

        if state.quality_generation != quality_generation {
            let next = if state.pending_parameters.is_some() || state.debounce.is_some() {
                PreviewState::Pending
            } else {
                PreviewState::Stale
            };
            let change = state.transition(next);
            drop(state);
            debug!(fingerprint = %fingerprint, "Discarding preview rendered at a replaced quality");
            self.notify(change);
            return Ok(());
        }

        self.cache.insert(PreviewCacheEntry::new(
            fingerprint.clone(),
            result.mesh_data.clone(),
            result.stats.clone(),
        ));

        let latest = state.latest_parameters.as_ref().map(Fingerprint::of);
        if latest.as_ref() != Some(&fingerprint) {
            let change = if latest.is_some() && latest == state.current_fingerprint {
                state.transition(PreviewState::Current)
            } else {
                None
            };
            drop(state);
            debug!(fingerprint = %fingerprint, "Preview superseded while rendering; cached only");
            self.notify(change);
            return Ok(());
        }

        let frame = PreviewFrame {
            fingerprint: fingerprint.clone(),
            mesh_data: result.mesh_data,
            stats: result.stats,
            color: resolve_preview_color(&state.color_params, Some(&parameters)),
            from_cache: false,
        };
        drop(state);

        if let Err(err) = self.presenter.present(&frame) {
            warn!(fingerprint = %fingerprint, error = %err, "Preview could not be presented");
            let change = {
                let mut state = self.lock("render_preview.present_failed");
                if state.content_version != version {
                    return Ok(());
                }
                state.transition(PreviewState::Error)
            };
            self.notify(change);
            let err = PreviewError::from(err);
            self.error_listeners.emit(&err);
            return Err(err);
        }

        let mut state = self.lock("render_preview.presented");
        if state.content_version != version {
            return Ok(());
        }
        state.current_fingerprint = Some(fingerprint);
        state.has_result = true;
        let next = if state.pending_parameters.is_some() || state.debounce.is_some() {
            PreviewState::Pending
        } else {
            PreviewState::Current
        };
        let change = state.transition(next);
        drop(state);
        self.notify(change);
        Ok(())
    }

    async fn render_full(&self, parameters: Parameters) -> Result<RenderResult, PreviewError> {
        let (source, options, version) = {
            let state = self.lock("render_full");
            let source = state.source.clone().ok_or(PreviewError::NoContent)?;
            let options = RenderOptions::full(OutputFormat::Stl)
                .with_project(state.project.clone())
                .with_libraries(state.libraries.clone());
            (source, options, state.content_version)
        };

        wait_until_idle(self.engine.as_ref(), self.busy_poll_interval).await;

        let fingerprint = Fingerprint::of(&parameters);
        info!(fingerprint = %fingerprint, content_version = version, "Rendering full quality");
        let result = self.engine.render(source, parameters, options).await?;

        let mut state = self.lock("render_full.settle");
        if state.content_version == version {
            state.last_full = Some(FullRender {
                fingerprint,
                result: result.clone(),
            });
        } else {
            debug!(content_version = version, "Full render finished for outdated content");
        }
        Ok(result)
    }

    /// Drop everything derived from the previous source. Consumes the guard
    /// so listener and engine calls happen unlocked.
    fn reset_content(&self, mut state: MutexGuard<'_, DriverState>) {
        state.content_version += 1;
        state.cancel_debounce();
        state.cancel_busy_watch();
        state.pending_parameters = None;
        state.current_fingerprint = None;
        state.has_result = false;
        state.last_full = None;
        let cancel_engine = state.in_flight.take().is_some();
        self.cache.clear();
        info!(content_version = state.content_version, "Model content changed; preview reset");

        let change = state.transition(PreviewState::Idle);
        drop(state);

        if cancel_engine {
            self.engine.cancel();
        }
        self.notify(change);
    }
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = state.debounce.take() {
            handle.abort();
        }
        if let Some(handle) = state.busy_watch.take() {
            handle.abort();
        }
    }
}
