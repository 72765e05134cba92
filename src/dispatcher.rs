//! Dispatcher - binds topic handlers to the bus and serves deliveries.
//!
//! The bus sidecar discovers subscriptions with `GET /dapr/subscribe` and
//! then delivers each event as `POST <route>`. The dispatcher answers with
//! the bus instruction for that delivery:
//!
//! ```text
//! handler result           | status
//! -------------------------|---------
//! Ok(())                   | SUCCESS
//! Err(retry = true)        | RETRY
//! Err(retry = false)       | DROP
//! stopping / task panicked | RETRY
//! ```
//!
//! # Lifecycle
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::register(handlers::all(likes, comments, videos))?;
//! let running = dispatcher.start(addr).await?;
//! shutdown.wait().await;
//! running.stop(Duration::from_secs(30)).await?;
//! ```
//!
//! Every delivery runs on its own task; handlers never share a lock through
//! the dispatcher, so deliveries on the same or different topics proceed in
//! parallel.

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::HandleError;
use crate::event::TopicEvent;
use crate::handlers::{Subscription, TopicHandler};
use crate::shutdown::ShutdownSignal;

/// Route the sidecar queries for subscriptions.
pub const SUBSCRIBE_ROUTE: &str = "/dapr/subscribe";

const RESERVED_ROUTES: [&str; 3] = [SUBSCRIBE_ROUTE, "/health", "/metrics"];

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no topic handlers to register")]
    NoHandlers,

    #[error("topic '{0}' is already registered")]
    DuplicateTopic(String),

    #[error("route '{0}' is already registered")]
    DuplicateRoute(String),

    #[error("invalid route '{0}'")]
    InvalidRoute(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(String),

    #[error("in-flight deliveries did not finish within {0:?}")]
    DrainTimeout(Duration),
}

/// Bus instruction for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Success,
    Retry,
    Drop,
}

impl From<&Result<(), HandleError>> for DeliveryStatus {
    fn from(result: &Result<(), HandleError>) -> Self {
        match result {
            Ok(()) => DeliveryStatus::Success,
            Err(e) if e.retry => DeliveryStatus::Retry,
            Err(_) => DeliveryStatus::Drop,
        }
    }
}

/// Subscription as advertised to the sidecar.
#[derive(Debug, Clone, Serialize)]
struct SubscriptionEntry {
    #[serde(flatten)]
    subscription: Subscription,
    #[serde(rename = "deadLetterTopic", skip_serializing_if = "Option::is_none")]
    dead_letter_topic: Option<String>,
}

/// CloudEvent fields the dispatcher reads; everything else is ignored.
#[derive(Debug, Deserialize)]
struct CloudEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    pubsubname: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    data_base64: Option<String>,
}

struct Binding {
    subscription: Subscription,
    handler: Arc<dyn TopicHandler>,
}

/// Delivery counters, exposed on `/metrics`.
struct Metrics {
    received: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn record(&self, status: DeliveryStatus) {
        let counter = match status {
            DeliveryStatus::Success => &self.succeeded,
            DeliveryStatus::Retry => &self.retried,
            DeliveryStatus::Drop => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Shared between the HTTP handlers and the [`RunningDispatcher`].
struct DispatchState {
    bindings: Vec<Binding>,
    /// route -> index into `bindings`
    routes: HashMap<String, usize>,
    dead_letter_topic: Option<String>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    /// Fired when the drain deadline passes; running handlers are dropped.
    cancel: ShutdownSignal,
    metrics: Metrics,
}

/// Decrements the in-flight count when a delivery finishes or is cancelled.
struct InFlight<'a>(&'a DispatchState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a DispatchState) -> Self {
        state.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl DispatchState {
    fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.bindings
            .iter()
            .map(|b| SubscriptionEntry {
                subscription: b.subscription.clone(),
                dead_letter_topic: self.dead_letter_topic.clone(),
            })
            .collect()
    }

    async fn deliver(&self, route: &str, body: Bytes) -> DeliveryStatus {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);

        let status = self.deliver_inner(route, body).await;
        self.metrics.record(status);
        status
    }

    async fn deliver_inner(&self, route: &str, body: Bytes) -> DeliveryStatus {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(route = %route, "Dispatcher stopping, asking bus to redeliver");
            return DeliveryStatus::Retry;
        }

        let Some(binding) = self.routes.get(route).map(|&i| &self.bindings[i]) else {
            warn!(route = %route, "No handler registered for route");
            return DeliveryStatus::Drop;
        };

        let _in_flight = InFlight::enter(self);
        let event = topic_event(&binding.subscription, &body);

        debug!(
            event_id = %event.id,
            topic = %event.topic,
            route = %route,
            "Dispatching event"
        );

        // A panicking handler must not take the connection down with it.
        let handler = binding.handler.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                result = handler.handle(&event) => Some(DeliveryStatus::from(&result)),
                _ = cancel.recv() => None,
            }
        });

        match task.await {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(route = %route, "Delivery cancelled at shutdown deadline");
                DeliveryStatus::Retry
            }
            Err(e) => {
                error!(route = %route, error = %e, "Handler task failed");
                DeliveryStatus::Retry
            }
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Build the per-delivery event from a request body.
///
/// CloudEvent bodies are unwrapped; anything else is passed on as the raw
/// payload so the handler's decoder decides what to do with it.
fn topic_event(subscription: &Subscription, body: &[u8]) -> TopicEvent {
    let cloud_event = serde_json::from_slice::<Value>(body)
        .ok()
        .filter(|v| v.get("specversion").is_some())
        .and_then(|v| serde_json::from_value::<CloudEvent>(v).ok());

    let Some(ce) = cloud_event else {
        return TopicEvent::new(
            uuid::Uuid::new_v4().to_string(),
            subscription.topic.as_str(),
            subscription.pubsub_name.as_str(),
            body,
        );
    };

    if let Some(topic) = ce.topic.as_deref().filter(|t| *t != subscription.topic) {
        warn!(
            event_topic = %topic,
            subscribed_topic = %subscription.topic,
            "Event topic does not match its route"
        );
    }

    let data = match (ce.data, ce.data_base64) {
        (Some(Value::String(s)), _) => s.into_bytes(),
        (Some(value), _) => serde_json::to_vec(&value).unwrap_or_default(),
        (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .unwrap_or_else(|e| {
                warn!(error = %e, "CloudEvent data_base64 is not valid base64");
                Vec::new()
            }),
        (None, None) => Vec::new(),
    };

    TopicEvent::new(
        ce.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        ce.topic.unwrap_or_else(|| subscription.topic.clone()),
        ce.pubsubname
            .unwrap_or_else(|| subscription.pubsub_name.clone()),
        data,
    )
}

fn validate_route(route: &str) -> Result<(), DispatchError> {
    let valid = route.starts_with('/')
        && route.len() > 1
        && !route.contains(['{', '}', ':', '*'])
        && !RESERVED_ROUTES.contains(&route);

    if valid {
        Ok(())
    } else {
        Err(DispatchError::InvalidRoute(route.to_string()))
    }
}

/// Registered handler set, ready to start serving.
pub struct Dispatcher {
    bindings: Vec<Binding>,
    dead_letter_topic: Option<String>,
}

impl Dispatcher {
    /// Bind every handler under its subscription.
    ///
    /// Fails on the first duplicate topic, duplicate route or invalid route;
    /// nothing is served in that case.
    pub fn register(handlers: Vec<Arc<dyn TopicHandler>>) -> Result<Self, DispatchError> {
        if handlers.is_empty() {
            return Err(DispatchError::NoHandlers);
        }

        let mut topics = HashSet::new();
        let mut routes = HashSet::new();
        let mut bindings = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let subscription = handler.subscription();

            validate_route(&subscription.route)?;
            if !topics.insert(subscription.topic.clone()) {
                return Err(DispatchError::DuplicateTopic(subscription.topic));
            }
            if !routes.insert(subscription.route.clone()) {
                return Err(DispatchError::DuplicateRoute(subscription.route));
            }

            debug!(
                pubsub = %subscription.pubsub_name,
                topic = %subscription.topic,
                route = %subscription.route,
                "Registering topic handler"
            );
            bindings.push(Binding {
                subscription,
                handler,
            });
        }

        info!(handler_count = bindings.len(), "Topic handlers registered");

        Ok(Self {
            bindings,
            dead_letter_topic: None,
        })
    }

    /// Ask the bus to forward dropped events to `topic`.
    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    pub fn handler_count(&self) -> usize {
        self.bindings.len()
    }

    /// Topics in registration order.
    pub fn topics(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .map(|b| b.subscription.topic.as_str())
            .collect()
    }

    fn into_state(self) -> Arc<DispatchState> {
        let routes = self
            .bindings
            .iter()
            .enumerate()
            .map(|(i, b)| (b.subscription.route.clone(), i))
            .collect();

        Arc::new(DispatchState {
            bindings: self.bindings,
            routes,
            dead_letter_topic: self.dead_letter_topic,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            cancel: ShutdownSignal::new(),
            metrics: Metrics::new(),
        })
    }

    /// Bind `addr` and start serving deliveries in the background.
    pub async fn start(self, addr: SocketAddr) -> Result<RunningDispatcher, DispatchError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| DispatchError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let state = self.into_state();
        let app = app(state.clone());
        let shutdown = ShutdownSignal::new();
        let server_shutdown = shutdown.clone();

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.recv().await })
                .await
        });

        info!(
            addr = %local_addr,
            topics = ?state.bindings.iter().map(|b| &b.subscription.topic).collect::<Vec<_>>(),
            "Subscriber listening"
        );

        Ok(RunningDispatcher {
            local_addr,
            state,
            shutdown,
            server,
        })
    }
}

fn app(state: Arc<DispatchState>) -> Router {
    let mut app = Router::new()
        .route(SUBSCRIBE_ROUTE, get(subscribe))
        .route("/health", get(health))
        .route("/metrics", get(metrics));

    for binding in &state.bindings {
        app = app.route(&binding.subscription.route, post(deliver));
    }

    app.fallback(unrouted).with_state(state)
}

async fn subscribe(State(state): State<Arc<DispatchState>>) -> Json<Vec<SubscriptionEntry>> {
    Json(state.subscriptions())
}

async fn deliver(State(state): State<Arc<DispatchState>>, uri: Uri, body: Bytes) -> Json<Value> {
    let status = state.deliver(uri.path(), body).await;
    Json(json!({ "status": status }))
}

/// POSTs to unbound paths still get a bus answer; anything else is a 404.
async fn unrouted(
    State(state): State<Arc<DispatchState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return StatusCode::NOT_FOUND.into_response();
    }
    let status = state.deliver(uri.path(), body).await;
    Json(json!({ "status": status })).into_response()
}

async fn health(State(state): State<Arc<DispatchState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "accepting": state.accepting.load(Ordering::SeqCst),
    }))
}

async fn metrics(State(state): State<Arc<DispatchState>>) -> Json<Value> {
    let m = &state.metrics;
    let uptime = m.uptime_seconds();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": format_uptime(uptime),
        "deliveries": {
            "received": m.received.load(Ordering::Relaxed),
            "succeeded": m.succeeded.load(Ordering::Relaxed),
            "retried": m.retried.load(Ordering::Relaxed),
            "dropped": m.dropped.load(Ordering::Relaxed),
            "in_flight": state.in_flight.load(Ordering::SeqCst),
        },
    }))
}

fn format_uptime(secs: u64) -> String {
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60),
    }
}

/// A dispatcher that is accepting deliveries.
pub struct RunningDispatcher {
    local_addr: SocketAddr,
    state: Arc<DispatchState>,
    shutdown: ShutdownSignal,
    server: JoinHandle<std::io::Result<()>>,
}

impl RunningDispatcher {
    /// Address actually bound (useful when started on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting deliveries and drain in-flight ones.
    ///
    /// Deliveries arriving after this call are answered with `RETRY`. If the
    /// drain outlasts `deadline`, running handlers are cancelled (their
    /// deliveries answer `RETRY`), the server task is aborted and
    /// [`DispatchError::DrainTimeout`] is returned. No handler is still
    /// running once this returns.
    pub async fn stop(self, deadline: Duration) -> Result<(), DispatchError> {
        let RunningDispatcher {
            state,
            shutdown,
            server,
            ..
        } = self;

        info!(
            in_flight = state.in_flight.load(Ordering::SeqCst),
            deadline_secs = deadline.as_secs_f64(),
            "Stopping subscriber"
        );

        state.accepting.store(false, Ordering::SeqCst);
        shutdown.trigger();

        let abort = server.abort_handle();
        let drain = async {
            let served = server.await;
            state.wait_idle().await;
            served
        };

        match tokio::time::timeout(deadline, drain).await {
            Ok(Ok(Ok(()))) => {
                let m = &state.metrics;
                info!(
                    received = m.received.load(Ordering::Relaxed),
                    succeeded = m.succeeded.load(Ordering::Relaxed),
                    retried = m.retried.load(Ordering::Relaxed),
                    dropped = m.dropped.load(Ordering::Relaxed),
                    "Subscriber stopped"
                );
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(DispatchError::Serve(e)),
            Ok(Err(e)) => Err(DispatchError::Task(e.to_string())),
            Err(_) => {
                warn!(
                    in_flight = state.in_flight.load(Ordering::SeqCst),
                    "Shutdown deadline reached, cancelling in-flight deliveries"
                );
                state.cancel.trigger();
                abort.abort();
                state.wait_idle().await;
                Err(DispatchError::DrainTimeout(deadline))
            }
        }
    }
}
