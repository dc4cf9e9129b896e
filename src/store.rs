//! Arena of published batches owned by one [`Context`](crate::Context).
//!
//! Batches are append-only: once inserted a batch is neither mutated nor
//! removed until the store is dropped. Listeners refer to batches through
//! [`BatchId`] handles and resolve them against the store lent to each call,
//! so no listener can hold data past the lifetime of the owning context.

use crate::parameter::Parameter;

/// Handle to a batch inside an [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(usize);

#[derive(Debug, Default)]
pub struct ObjectStore {
    batches: Vec<Parameter>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `batch` and return its handle.
    pub fn insert(&mut self, batch: Parameter) -> BatchId {
        self.batches.push(batch);
        BatchId(self.batches.len() - 1)
    }

    pub fn get(&self, id: BatchId) -> Option<&Parameter> {
        self.batches.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
