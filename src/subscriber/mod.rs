//! Detection subscriber contract.
//!
//! A [`Subscriber`] declares the addresses it reacts to and hands out one
//! [`Listener`] per context. Listeners hold the per-request evaluation state
//! and are only ever driven by the context that created them, so they need
//! no synchronization. Subscribers are immutable: an update produces a new
//! instance and the old one keeps serving the contexts already using it.

pub mod waf;

use crate::error::Result;
use crate::parameter::Parameter;
use crate::result::Verdict;
use crate::store::{BatchId, ObjectStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub use waf::{Instance, InstanceOptions, WafListener};

/// Interned name of a logical input (`server.request.query`, ...).
pub type Address = Arc<str>;

/// String tags reported by subscribers and listeners.
pub type Meta = BTreeMap<String, String>;

/// Numeric counters reported by subscribers and listeners.
pub type Metrics = BTreeMap<String, f64>;

/// Add `value` to the counter `key`.
pub fn add_metric(metrics: &mut Metrics, key: &str, value: f64) {
    *metrics.entry(key.to_string()).or_insert(0.0) += value;
}

/// A detector registered with the [`Engine`](crate::Engine).
pub trait Subscriber: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Addresses this subscriber reacts to. Stable for the life of the
    /// instance.
    fn subscriptions(&self) -> &BTreeSet<Address>;

    /// Fresh per-context evaluation state.
    fn listener(&self) -> Box<dyn Listener>;

    /// Build a replacement instance from an update document. `Ok(None)`
    /// means the subscriber has nothing to update and stays as is.
    fn update(&self, _param: &Parameter, _meta: &mut Meta, _metrics: &mut Metrics) -> Result<Option<Arc<dyn Subscriber>>> {
        Ok(None)
    }
}

/// Per-context, per-subscriber evaluation state.
pub trait Listener: Send {
    /// Evaluate the batch `batch` of `store`.
    ///
    /// Previously published batches of the same store stay visible to the
    /// listener; `store` is always the same for the life of the listener.
    fn call(&mut self, store: &ObjectStore, batch: BatchId, timeout: Duration) -> Result<Verdict>;

    /// Merge the accumulated tags and counters into `meta` and `metrics`.
    fn get_meta_and_metrics(&self, meta: &mut Meta, metrics: &mut Metrics);
}
