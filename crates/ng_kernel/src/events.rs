//! In-process event bus: fire-and-forget notification plus sequential
//! asynchronous pipelines ("hooks").
//!
//! Event names follow `namespace/action` (`player/spawned`), hook names add a
//! phase prefix (`before:player/save`). Listener and hook lists are kept
//! separately and are created on first subscription to a name.
//!
//! `emit` is synchronous and iterates over a snapshot of the listener list
//! taken before the first listener runs, so listeners may subscribe or
//! unsubscribe freely while being dispatched.

use crate::error::EventError;
use crate::utils::panic_message;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, error};

// ============================================================================
// Listeners and Hooks
// ============================================================================

type ListenerFn = dyn Fn(&[Value]) -> Result<(), EventError> + Send + Sync;
type HookFn = dyn Fn(Value) -> BoxFuture<'static, Result<Option<Value>, EventError>> + Send + Sync;

/// A synchronous event listener.
///
/// Identity is by reference: two clones of the same `Listener` are equal for
/// [`EventBus::off`], two listeners built from identical closures are not.
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<(), EventError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn call(&self, args: &[Value]) -> Result<(), EventError> {
        (self.0)(args)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Listener").field(&self.id()).finish()
    }
}

/// One asynchronous stage of a pipeline.
///
/// A stage returns `Ok(Some(value))` to replace the running value and
/// `Ok(None)` to leave it unchanged.
#[derive(Clone)]
pub struct Hook(Arc<HookFn>);

impl Hook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, EventError>> + Send + 'static,
    {
        Self(Arc::new(move |value| f(value).boxed()))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn call(&self, value: Value) -> BoxFuture<'static, Result<Option<Value>, EventError>> {
        (self.0)(value)
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Hook").field(&self.id()).finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

enum Target {
    Listener(Listener),
    Hook(Hook),
}

/// Handle returned by [`EventBus::on`], [`EventBus::once`] and
/// [`EventBus::hook`].
///
/// Dropping it leaves the subscription in place; call
/// [`Subscription::unsubscribe`] to remove exactly the subscribed callback.
pub struct Subscription {
    bus: Weak<BusInner>,
    name: String,
    target: Target,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        match self.target {
            Target::Listener(listener) => inner.remove_listener(&self.name, listener.id()),
            Target::Hook(hook) => inner.remove_hook(&self.name, hook.id()),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("name", &self.name).finish()
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Default)]
struct BusInner {
    listeners: DashMap<String, Vec<Listener>>,
    hooks: DashMap<String, Vec<Hook>>,
}

impl BusInner {
    fn remove_listener(&self, event: &str, id: usize) {
        if let Some(mut list) = self.listeners.get_mut(event) {
            if let Some(index) = list.iter().position(|l| l.id() == id) {
                list.remove(index);
            }
        }
    }

    fn remove_hook(&self, name: &str, id: usize) {
        if let Some(mut list) = self.hooks.get_mut(name) {
            if let Some(index) = list.iter().position(|h| h.id() == id) {
                list.remove(index);
            }
        }
    }
}

/// Counters describing the current subscriptions on a bus.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Number of event names with a listener list
    pub events: usize,
    /// Total listeners across all events
    pub listeners: usize,
    /// Total pipeline stages across all hooks
    pub hooks: usize,
}

/// Publish/subscribe bus shared by the kernel and every registered module.
///
/// `EventBus` is a cheap handle; clones share the same listener and hook
/// lists.
///
/// # Examples
///
/// ```rust
/// use ng_kernel::EventBus;
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let bus = EventBus::new();
/// bus.hook("before:player/save", |mut data| async move {
///     data["saved"] = json!(true);
///     Ok(Some(data))
/// });
///
/// let out = bus.pipe("before:player/save", json!({ "id": 7 })).await;
/// assert_eq!(out["saved"], json!(true));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("stats", &self.stats())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the listener list of `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on_listener(event, Listener::new(callback))
    }

    /// Appends an existing [`Listener`], keeping its identity for [`EventBus::off`].
    pub fn on_listener(&self, event: &str, listener: Listener) -> Subscription {
        self.inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(listener.clone());

        Subscription {
            bus: Arc::downgrade(&self.inner),
            name: event.to_string(),
            target: Target::Listener(listener),
        }
    }

    /// Subscribes a callback that fires at most once.
    ///
    /// The wrapper removes itself from the list before running `callback`,
    /// so a re-entrant `emit` of the same event from inside the callback
    /// does not fire it again.
    pub fn once<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: FnOnce(&[Value]) -> Result<(), EventError> + Send + 'static,
    {
        let callback = Mutex::new(Some(callback));
        let slot: Arc<OnceLock<Weak<ListenerFn>>> = Arc::new(OnceLock::new());
        let bus = Arc::downgrade(&self.inner);
        let event_name = event.to_string();

        let self_ref = slot.clone();
        let wrapper = Listener::new(move |args: &[Value]| {
            let taken = callback
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            let Some(callback) = taken else {
                return Ok(());
            };
            if let (Some(inner), Some(me)) = (bus.upgrade(), self_ref.get()) {
                inner.remove_listener(&event_name, Weak::as_ptr(me) as *const () as usize);
            }
            callback(args)
        });
        let _ = slot.set(Arc::downgrade(&wrapper.0));

        self.on_listener(event, wrapper)
    }

    /// Removes the first entry reference-equal to `listener`; no-op if absent.
    pub fn off(&self, event: &str, listener: &Listener) {
        self.inner.remove_listener(event, listener.id());
    }

    /// Synchronously notifies every current listener of `event`.
    ///
    /// A listener that fails or panics is logged and skipped; delivery
    /// continues with the next listener.
    pub fn emit(&self, event: &str, args: &[Value]) {
        let snapshot = self.inner.listeners.get(event).map(|list| list.clone());
        let Some(listeners) = snapshot else {
            return;
        };

        for listener in &listeners {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener.call(args))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("[Events] ERROR on \"{}\": {}", event, e),
                Err(payload) => error!(
                    "[Events] ERROR on \"{}\": {}",
                    event,
                    EventError::Panicked(panic_message(payload))
                ),
            }
        }
    }

    /// Appends an asynchronous stage to the pipeline `name`.
    pub fn hook<F, Fut>(&self, name: &str, stage: F) -> Subscription
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, EventError>> + Send + 'static,
    {
        self.on_hook(name, Hook::new(stage))
    }

    pub fn on_hook(&self, name: &str, hook: Hook) -> Subscription {
        self.inner
            .hooks
            .entry(name.to_string())
            .or_default()
            .push(hook.clone());

        Subscription {
            bus: Arc::downgrade(&self.inner),
            name: name.to_string(),
            target: Target::Hook(hook),
        }
    }

    pub fn off_hook(&self, name: &str, hook: &Hook) {
        self.inner.remove_hook(name, hook.id());
    }

    /// Threads `initial` through every stage of `name`, in subscription order.
    ///
    /// Each stage is awaited before the next one starts. A stage that fails
    /// or panics is logged and the running value stays as it was before that
    /// stage ran.
    pub async fn pipe(&self, name: &str, initial: Value) -> Value {
        let snapshot = self.inner.hooks.get(name).map(|list| list.clone());
        let Some(stages) = snapshot else {
            return initial;
        };

        let mut value = initial;
        for stage in &stages {
            let input = value.clone();
            let outcome = AssertUnwindSafe(async move { stage.call(input).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(Some(next))) => value = next,
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!("[Events] ERROR on \"{}\": {}", name, e),
                Err(payload) => error!(
                    "[Events] ERROR on \"{}\": {}",
                    name,
                    EventError::Panicked(panic_message(payload))
                ),
            }
        }
        value
    }

    /// Drops every listener and hook list.
    pub fn clear(&self) {
        self.inner.listeners.clear();
        self.inner.hooks.clear();
        debug!("[Events] cleared all listeners and hooks");
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.get(event).map_or(0, |l| l.len())
    }

    pub fn hook_count(&self, name: &str) -> usize {
        self.inner.hooks.get(name).map_or(0, |h| h.len())
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events: self.inner.listeners.len(),
            listeners: self.inner.listeners.iter().map(|e| e.value().len()).sum(),
            hooks: self.inner.hooks.iter().map(|e| e.value().len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&[Value]) -> Result<(), EventError> + Send + Sync) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move |_: &[Value]| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_emit_continues_after_failing_listener() {
        let bus = EventBus::new();
        bus.on("x", |_| Err(EventError::HandlerExecution("cb1".into())));
        bus.on("x", |_| panic!("cb1b"));
        let (hits, cb2) = counter();
        bus.on("x", cb2);

        bus.emit("x", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_preserves_insertion_order_and_args() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            bus.on("player/spawned", move |args| {
                seen.lock().unwrap().push(format!("{}:{}", tag, args[0]));
                Ok(())
            });
        }

        bus.emit("player/spawned", &[json!(3)]);
        assert_eq!(*seen.lock().unwrap(), vec!["a:3", "b:3", "c:3"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_callback() {
        let bus = EventBus::new();
        let (first_hits, first) = counter();
        let (second_hits, second) = counter();
        let sub = bus.on("x", first);
        bus.on("x", second);

        sub.unsubscribe();
        bus.emit("x", &[]);

        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("x"), 1);
    }

    #[test]
    fn test_off_removes_first_reference_equal_entry() {
        let bus = EventBus::new();
        let (hits, cb) = counter();
        let listener = Listener::new(cb);
        bus.on_listener("x", listener.clone());
        bus.on_listener("x", listener.clone());

        bus.off("x", &listener);
        bus.emit("x", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.off("missing", &listener);
    }

    #[test]
    fn test_once_fires_exactly_once() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.once("x", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit("x", &[]);
        bus.emit("x", &[]);
        bus.emit("x", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("x"), 0);
    }

    #[test]
    fn test_once_reentrant_emit_does_not_refire() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let inner_bus = bus.clone();
        bus.once("x", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            inner_bus.emit("x", &[]);
            Ok(())
        });

        bus.emit("x", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_uses_snapshot_when_listener_subscribes() {
        let bus = EventBus::new();
        let (late_hits, late) = counter();
        let late = Listener::new(late);
        let handle = bus.clone();
        bus.on("x", move |_| {
            handle.on_listener("x", late.clone());
            Ok(())
        });

        bus.emit("x", &[]);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count("x"), 2);
    }

    #[tokio::test]
    async fn test_pipe_threads_values_and_skips_no_change() {
        let bus = EventBus::new();
        bus.hook("transform", |v| async move { Ok(Some(json!(v.as_i64().unwrap_or(0) + 1))) });
        bus.hook("transform", |_| async move { Ok(None) });
        bus.hook("transform", |v| async move { Ok(Some(json!(v.as_i64().unwrap_or(0) * 2))) });

        assert_eq!(bus.pipe("transform", json!(5)).await, json!(12));
    }

    #[tokio::test]
    async fn test_pipe_failing_stage_keeps_running_value() {
        let bus = EventBus::new();
        bus.hook("h", |v| async move { Ok(Some(json!(v.as_i64().unwrap_or(0) + 1))) });
        bus.hook("h", |_| async move { Err(EventError::HandlerExecution("boom".into())) });
        bus.hook("h", |v| async move {
            if v.is_number() {
                panic!("stage panic");
            }
            Ok(None)
        });
        bus.hook("h", |v| async move { Ok(Some(json!(v.as_i64().unwrap_or(0) + 10))) });

        assert_eq!(bus.pipe("h", json!(0)).await, json!(11));
    }

    #[tokio::test]
    async fn test_pipe_without_stages_returns_input() {
        let bus = EventBus::new();
        assert_eq!(bus.pipe("none", json!("same")).await, json!("same"));
    }

    #[tokio::test]
    async fn test_clear_drops_listeners_and_hooks() {
        let bus = EventBus::new();
        let (hits, cb) = counter();
        bus.on("x", cb);
        bus.hook("h", |_| async move { Ok(Some(json!(1))) });

        bus.clear();
        bus.emit("x", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.pipe("h", json!(0)).await, json!(0));
        assert_eq!(bus.stats(), EventBusStats::default());
    }
}
