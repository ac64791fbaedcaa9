//! Declarative request lifecycle controller.
//!
//! A [`FetchController`] owns one request declaration (URL, options, mode
//! flags) and drives the idle → loading → settled lifecycle for it. Consumers
//! normally re-trigger by replacing the declaration with [`update`]; an
//! imperative [`trigger`] is also exposed. Every transition is pushed to the
//! registered hooks and broadcast to subscribers, and a generation counter
//! guarantees that a superseded request can never overwrite the state of a
//! later one, no matter how late its response arrives.
//!
//! [`update`]: FetchController::update
//! [`trigger`]: FetchController::trigger

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

pub mod error;
pub mod render;
pub mod transport;
pub mod types;

pub use error::FetchError;
pub use types::{
    DecodeError, DecodeMode, FetchRequest, FetchSnapshot, FetchState, OptionsSource, Payload,
    RequestOptions, ResponseParts,
};

use transport::{HttpTransport, Transport};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Reactive inputs of a controller, replaced wholesale by
/// [`FetchController::update`].
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    pub url: Option<String>,
    pub options: OptionsSource,
    /// Suppress automatic issuance; [`FetchController::trigger`] becomes the
    /// only path to a request.
    pub manual: bool,
    pub decode: DecodeMode,
    /// Memoize settled outcomes by URL and replay them instead of re-issuing
    /// network calls.
    pub cache: bool,
}

impl FetchConfig {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

pub type ChangeHook = Arc<dyn Fn(&FetchSnapshot) + Send + Sync>;
pub type DataChangeHook = Arc<dyn Fn(&Payload, Option<&Payload>) -> Option<Payload> + Send + Sync>;

/// Observer callbacks, fixed at construction. Hooks run on the controller's
/// execution path and must not block.
#[derive(Clone, Default)]
pub struct FetchHooks {
    /// Runs on every transition, declaration-only changes and post-shutdown
    /// settlements included.
    pub on_change: Option<ChangeHook>,
    /// Runs when an accepted settlement carries a payload that differs from
    /// the current data; a `Some` return value replaces the committed data.
    pub on_data_change: Option<DataChangeHook>,
}

impl FetchHooks {
    pub fn with_on_change(mut self, hook: impl Fn(&FetchSnapshot) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(hook));
        self
    }

    pub fn with_on_data_change(
        mut self,
        hook: impl Fn(&Payload, Option<&Payload>) -> Option<Payload> + Send + Sync + 'static,
    ) -> Self {
        self.on_data_change = Some(Arc::new(hook));
        self
    }
}

/// Decoded outcome of a received response, as stored in the replay cache.
#[derive(Debug, Clone)]
struct SettledResponse {
    payload: Payload,
    parts: ResponseParts,
}

type SharedOutcome = Shared<BoxFuture<'static, Result<SettledResponse, FetchError>>>;

/// A proposed state transition. Fields a patch does not name are left
/// untouched when it is merged into the current state.
enum StatePatch {
    Loading,
    Settled(SettledResponse),
    Failed(FetchError),
}

impl StatePatch {
    fn apply_to(&self, state: &mut FetchState) {
        match self {
            StatePatch::Loading => state.loading = Some(true),
            StatePatch::Settled(settled) => {
                state.loading = Some(false);
                if settled.parts.ok() {
                    state.data = Some(settled.payload.clone());
                    state.error = None;
                } else {
                    state.data = None;
                    state.error = Some(FetchError::Status {
                        status: settled.parts.status,
                        payload: settled.payload.clone(),
                    });
                }
                state.response = Some(settled.parts.clone());
            }
            StatePatch::Failed(error) => {
                state.loading = Some(false);
                state.data = None;
                state.error = Some(error.clone());
            }
        }
    }

    /// Payload this patch would place into `data`, for the data-change hook.
    fn incoming_data(&self) -> Option<&Payload> {
        match self {
            StatePatch::Settled(settled) if settled.parts.ok() => Some(&settled.payload),
            _ => None,
        }
    }
}

struct ControllerState {
    config: FetchConfig,
    state: FetchState,
    cache: HashMap<String, SharedOutcome>,
    /// Settlements below this generation are stale and discarded.
    accepted_floor: u64,
}

impl ControllerState {
    fn request(&self) -> FetchRequest {
        FetchRequest {
            url: self.config.url.clone(),
            options: self.config.options.clone(),
        }
    }

    fn snapshot(&self) -> FetchSnapshot {
        FetchSnapshot {
            request: self.request(),
            state: self.state.clone(),
        }
    }
}

pub struct FetchController {
    transport: Arc<dyn Transport>,
    hooks: FetchHooks,
    inner: Mutex<ControllerState>,
    /// Next generation to hand out; one allocation per issuance.
    issued: AtomicU64,
    live: AtomicBool,
    events: broadcast::Sender<FetchSnapshot>,
}

impl FetchController {
    pub async fn start(config: FetchConfig) -> Arc<Self> {
        Self::start_with_hooks(config, FetchHooks::default()).await
    }

    pub async fn start_with_hooks(config: FetchConfig, hooks: FetchHooks) -> Arc<Self> {
        Self::start_with_transport(config, hooks, Arc::new(HttpTransport::new())).await
    }

    pub async fn start_with_transport(
        config: FetchConfig,
        hooks: FetchHooks,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let controller = Arc::new(Self {
            transport,
            hooks,
            inner: Mutex::new(ControllerState {
                config,
                state: FetchState::default(),
                cache: HashMap::new(),
                accepted_floor: 0,
            }),
            issued: AtomicU64::new(0),
            live: AtomicBool::new(true),
            events,
        });

        {
            let inner = controller.inner.lock().await;
            info!(
                url = ?inner.config.url,
                manual = inner.config.manual,
                cache = inner.config.cache,
                "fetch: controller started"
            );
            controller.emit_declared(&inner);
            if !inner.config.manual {
                if let Some(url) = inner.config.url.clone() {
                    controller.spawn_auto_trigger(url, inner.config.options.clone());
                }
            }
        }
        controller
    }

    /// Replace the declaration. Observers are notified even when no request
    /// is issued; a request fires only when the URL changed to a declared
    /// value and the new declaration is not manual. An options-only change
    /// never auto-triggers.
    pub async fn update(self: &Arc<Self>, config: FetchConfig) {
        let due = {
            let mut inner = self.inner.lock().await;
            let url_changed = inner.config.url != config.url;
            debug!(url = ?config.url, url_changed, "fetch: declaration updated");
            let due = if url_changed && !config.manual {
                config
                    .url
                    .clone()
                    .map(|url| (url, config.options.clone()))
            } else {
                None
            };
            inner.config = config;
            self.emit_declared(&inner);
            due
        };
        if let Some((url, options)) = due {
            self.spawn_auto_trigger(url, options);
        }
    }

    /// Issue (or replay) a request now.
    ///
    /// `url` falls back to the declared URL and `options` to the declared
    /// options; a deferred options thunk is evaluated here, exactly once.
    /// The return value is this call's own settled view even when a later
    /// trigger has already superseded it. Transport failures come back as
    /// `Err`, after observers have already seen the failure state.
    pub async fn trigger(
        &self,
        url: Option<String>,
        options: Option<OptionsSource>,
    ) -> Result<FetchState, FetchError> {
        let (url, options, decode, cache_enabled) = {
            let inner = self.inner.lock().await;
            let url = match url.or_else(|| inner.config.url.clone()) {
                Some(url) => url,
                None => return Err(FetchError::MissingUrl),
            };
            let options = options.unwrap_or_else(|| inner.config.options.clone());
            (url, options, inner.config.decode, inner.config.cache)
        };
        let options = options.resolve();
        let generation = self.issued.fetch_add(1, Ordering::SeqCst);

        enum Issue {
            Fresh(SharedOutcome),
            Replay(SharedOutcome),
        }

        let issue = {
            let mut inner = self.inner.lock().await;
            let cached = if cache_enabled {
                inner.cache.get(&url).cloned()
            } else {
                None
            };
            match cached {
                Some(outcome) => Issue::Replay(outcome),
                None => {
                    let outcome = self.request_outcome(url.clone(), options, decode);
                    if cache_enabled {
                        inner.cache.insert(url.clone(), outcome.clone());
                    }
                    Issue::Fresh(outcome)
                }
            }
        };

        let outcome = match issue {
            Issue::Replay(outcome) => {
                debug!(url = %url, generation, "fetch: replaying cached outcome");
                outcome.await
            }
            Issue::Fresh(outcome) => {
                debug!(url = %url, generation, "fetch: issuing request");
                self.apply(&StatePatch::Loading, Some(generation)).await;
                outcome.await
            }
        };

        match outcome {
            Ok(settled) => {
                let patch = StatePatch::Settled(settled);
                self.apply(&patch, Some(generation)).await;
                let mut view = FetchState::default();
                patch.apply_to(&mut view);
                Ok(view)
            }
            Err(error) => {
                self.apply(&StatePatch::Failed(error.clone()), Some(generation))
                    .await;
                Err(error)
            }
        }
    }

    pub async fn state(&self) -> FetchState {
        self.inner.lock().await.state.clone()
    }

    pub async fn request(&self) -> FetchRequest {
        self.inner.lock().await.request()
    }

    /// Committed transitions only; nothing is delivered after shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<FetchSnapshot> {
        self.events.subscribe()
    }

    /// Freeze committed state and stop the event channel. In-flight requests
    /// still settle and still reach the change hook.
    pub fn shutdown(&self) {
        self.live.store(false, Ordering::SeqCst);
        info!("fetch: controller shut down");
    }

    /// Issue the request decided on by the evaluator. The URL and options
    /// are the ones captured at decision time, so a declaration replaced
    /// before this task runs cannot redirect it.
    fn spawn_auto_trigger(self: &Arc<Self>, url: String, options: OptionsSource) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = controller.trigger(Some(url), Some(options)).await {
                warn!("fetch: auto-triggered request failed: {err}");
            }
        });
    }

    /// Build the shareable outcome future for one fresh issuance. Nothing
    /// runs until the future is first polled, which happens only after the
    /// loading transition has been applied.
    fn request_outcome(
        &self,
        url: String,
        options: RequestOptions,
        decode: DecodeMode,
    ) -> SharedOutcome {
        let transport = Arc::clone(&self.transport);
        async move {
            match transport.execute(&url, &options).await {
                Ok(response) => {
                    let payload = match &response.body {
                        Ok(body) => decode.decode(body),
                        Err(err) => Payload::Undecodable(DecodeError {
                            mode: decode,
                            reason: format!("{err:#}"),
                        }),
                    };
                    Ok(SettledResponse {
                        payload,
                        parts: response.parts,
                    })
                }
                Err(err) => Err(FetchError::Transport {
                    message: format!("{err:#}"),
                }),
            }
        }
        .boxed()
        .shared()
    }

    /// Sequencer: gate on the generation, merge the patch, notify, commit.
    ///
    /// Runs entirely inside the state lock so observers see transitions in
    /// acceptance order.
    async fn apply(&self, patch: &StatePatch, generation: Option<u64>) {
        let mut inner = self.inner.lock().await;
        if let Some(generation) = generation {
            if generation < inner.accepted_floor {
                debug!(
                    generation,
                    floor = inner.accepted_floor,
                    "fetch: discarding stale transition"
                );
                return;
            }
            // Only a settlement raises the floor; a loading transition must
            // not block its own request's outcome.
            if !matches!(patch, StatePatch::Loading) {
                inner.accepted_floor = generation + 1;
            }
        }

        let mut next = inner.state.clone();
        patch.apply_to(&mut next);

        // The data-change hook runs first and may transform what gets
        // committed; the change notification still carries the untransformed
        // value.
        let mut committed = next.clone();
        if let Some(on_data_change) = &self.hooks.on_data_change {
            if let Some(incoming) = patch.incoming_data() {
                if inner.state.data.as_ref() != Some(incoming) {
                    if let Some(replacement) = on_data_change(incoming, inner.state.data.as_ref()) {
                        committed.data = Some(replacement);
                    }
                }
            }
        }

        let request = inner.request();
        if let Some(on_change) = &self.hooks.on_change {
            on_change(&FetchSnapshot {
                request: request.clone(),
                state: next,
            });
        }

        if self.live.load(Ordering::SeqCst) {
            inner.state = committed.clone();
            let _ = self.events.send(FetchSnapshot {
                request,
                state: committed,
            });
        }
    }

    /// Declaration-change notification; caller holds the state lock.
    fn emit_declared(&self, inner: &ControllerState) {
        let snapshot = inner.snapshot();
        if let Some(on_change) = &self.hooks.on_change {
            on_change(&snapshot);
        }
        if self.live.load(Ordering::SeqCst) {
            let _ = self.events.send(snapshot);
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
