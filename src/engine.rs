//! Publish/subscribe dispatch: the [`Engine`] and its per-request [`Context`].
//!
//! The engine maps addresses to subscribers. A context snapshots that table
//! when it is created, owns every batch published through it, and keeps one
//! listener per subscriber for the rest of its life.

use crate::config::EngineSettings;
use crate::error::{AppsecError, Result};
use crate::parameter::Parameter;
use crate::result::Verdict;
use crate::ruleset::EngineRuleset;
use crate::store::ObjectStore;
use crate::subscriber::{Address, Instance, Listener, Meta, Metrics, Subscriber};
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stable identity of a registration. Allocated in increasing order, which
/// is also the dispatch order within a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable address → subscribers table.
#[derive(Clone, Default)]
struct SubscriptionTable {
    subscribers: BTreeMap<SubscriberId, Arc<dyn Subscriber>>,
    addresses: HashMap<Address, Vec<SubscriberId>>,
}

impl SubscriptionTable {
    fn insert(&mut self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) {
        for address in subscriber.subscriptions() {
            self.addresses.entry(address.clone()).or_default().push(id);
        }
        self.subscribers.insert(id, subscriber);
    }

    /// Swap in replacements under the same ids and rebuild the address index.
    fn with_replacements(&self, replacements: &BTreeMap<SubscriberId, Arc<dyn Subscriber>>) -> Self {
        let mut table = SubscriptionTable::default();
        for (id, subscriber) in &self.subscribers {
            let subscriber = replacements.get(id).unwrap_or(subscriber);
            table.insert(*id, subscriber.clone());
        }
        table
    }
}

/// Process-wide registry of subscribers.
///
/// Registration and updates replace the whole subscription table atomically;
/// contexts created earlier keep the table they were created with, so no
/// request in flight observes a partial update.
///
/// # Example
/// ```rust,ignore
/// use appsec_engine::{Engine, Parameter};
///
/// let engine = Engine::new();
/// engine.subscribe(waf);
///
/// let mut context = engine.create_context();
/// let verdict = context.publish(Parameter::from(json!({"http.client_ip": "192.168.1.1"})), timeout)?;
/// ```
pub struct Engine {
    table: ArcSwap<SubscriptionTable>,
    next_id: AtomicU64,
    /// Bumped on every table replacement
    version: AtomicU64,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(SubscriptionTable::default()),
            next_id: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Engine with a single WAF subscriber built from `settings`.
    pub fn from_settings(
        settings: &EngineSettings,
        ruleset: &EngineRuleset,
        meta: &mut Meta,
        metrics: &mut Metrics,
    ) -> Result<Self> {
        let engine = Self::new();
        engine.subscribe(Instance::from_settings(settings, ruleset, meta, metrics)?);
        Ok(engine)
    }

    /// Register `subscriber` under every address it declares. Registering
    /// the same subscriber twice dispatches to it twice.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            subscriber = subscriber.name(),
            %id,
            addresses = subscriber.subscriptions().len(),
            "Subscriber registered"
        );
        self.table.rcu(|current| {
            let mut table = SubscriptionTable::clone(current);
            table.insert(id, subscriber.clone());
            table
        });
        self.version.fetch_add(1, Ordering::Release);
        id
    }

    /// New request context bound to the current subscription table.
    pub fn create_context(&self) -> Context {
        Context::new(self.table.load_full())
    }

    /// Update every subscriber with `param` and swap the resulting instances
    /// in.
    ///
    /// All subscribers are updated before anything is swapped: when one of
    /// them fails the error is returned, the engine keeps its current table
    /// and `meta`/`metrics` are left untouched.
    pub fn update(&self, param: &Parameter, meta: &mut Meta, metrics: &mut Metrics) -> Result<()> {
        let current = self.table.load_full();
        let mut replacements = BTreeMap::new();
        let mut update_meta = Meta::new();
        let mut update_metrics = Metrics::new();
        for (id, subscriber) in &current.subscribers {
            if let Some(replacement) = subscriber.update(param, &mut update_meta, &mut update_metrics)? {
                replacements.insert(*id, replacement);
            }
        }
        meta.extend(update_meta);
        metrics.extend(update_metrics);

        if replacements.is_empty() {
            return Ok(());
        }
        let updated = replacements.len();
        self.table.rcu(|current| current.with_replacements(&replacements));
        self.version.fetch_add(1, Ordering::Release);
        tracing::info!(updated, "Subscription table replaced");
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.table.load().subscribers.len()
    }

    /// Addresses with at least one subscriber.
    pub fn addresses(&self) -> BTreeSet<Address> {
        self.table.load().addresses.keys().cloned().collect()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A listener failure isolated during [`Context::publish`]. `error` is
/// either [`AppsecError::Timeout`] or [`AppsecError::SubscriberFailure`]
/// carrying the listener's own error message.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberFailure {
    pub subscriber: SubscriberId,
    pub name: String,
    pub error: AppsecError,
}

/// Per-request owner of published data and dispatch unit.
///
/// Publishing is sequential: `publish` takes `&mut self`. Dropping the
/// context releases every published batch together with the listeners that
/// refer to them.
pub struct Context {
    table: Arc<SubscriptionTable>,
    store: ObjectStore,
    listeners: BTreeMap<SubscriberId, Box<dyn Listener>>,
    failures: Vec<SubscriberFailure>,
}

impl Context {
    fn new(table: Arc<SubscriptionTable>) -> Self {
        Self {
            table,
            store: ObjectStore::new(),
            listeners: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// Publish a batch and return the most severe verdict of the subscribers
    /// interested in its keys.
    ///
    /// `data` must be a map; anything else fails with
    /// [`AppsecError::InvalidInput`] before any dispatch. Listener errors,
    /// timeouts included, never abort the dispatch: they are logged,
    /// recorded in [`failures`](Self::failures) and contribute nothing.
    pub fn publish(&mut self, data: Parameter, timeout: Duration) -> Result<Verdict> {
        if !data.is_map() {
            return Err(AppsecError::invalid_input(".", "not a map"));
        }

        let mut interested = BTreeSet::new();
        for key in data.keys() {
            tracing::trace!(address = key, "Data pushed");
            if let Some(ids) = self.table.addresses.get(key) {
                interested.extend(ids.iter().copied());
            }
        }

        let batch = self.store.insert(data);

        let mut verdict = Verdict::default();
        for id in interested {
            let Some(subscriber) = self.table.subscribers.get(&id) else {
                continue;
            };
            let listener = self.listeners.entry(id).or_insert_with(|| {
                tracing::debug!(subscriber = subscriber.name(), %id, "Listener created");
                subscriber.listener()
            });

            match listener.call(&self.store, batch, timeout) {
                Ok(result) => verdict.merge_most_severe(result),
                Err(error) => {
                    let error = if error.is_timeout() {
                        tracing::warn!(subscriber = subscriber.name(), %id, "Subscriber timed out");
                        error
                    } else {
                        tracing::error!(subscriber = subscriber.name(), %id, %error, "Subscriber failed");
                        AppsecError::SubscriberFailure(error.to_string())
                    };
                    self.failures.push(SubscriberFailure {
                        subscriber: id,
                        name: subscriber.name().to_string(),
                        error,
                    });
                }
            }
        }

        Ok(verdict)
    }

    /// Merge the tags and counters of every listener, in subscriber order.
    /// Listeners add their counters to `metrics`, so counters of the same
    /// name are summed across listeners.
    pub fn get_meta_and_metrics(&self, meta: &mut Meta, metrics: &mut Metrics) {
        for listener in self.listeners.values() {
            listener.get_meta_and_metrics(meta, metrics);
        }
    }

    pub fn failures(&self) -> &[SubscriberFailure] {
        &self.failures
    }

    /// Number of batches retained so far.
    pub fn batch_count(&self) -> usize {
        self.store.len()
    }

    /// Number of listeners created so far.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
