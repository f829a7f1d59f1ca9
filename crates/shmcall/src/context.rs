//! Per-context state owned by the worker thread.
//!
//! Hosts often need to attach state to something the caller side creates
//! (a loader instance, a compilation unit) and look it up again from later
//! requests. A [`ContextTable`] keeps that state keyed by [`ContextId`] with
//! an explicit lifecycle: entries are inserted when the context is created
//! and must be removed when it is destroyed. Nothing is collected
//! automatically.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use shmcall_codec::Value;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a caller-side context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh id. Never returns the same id twice in a process.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id that travelled through a request argument.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Read an id out of a call argument.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|raw| u64::try_from(raw).ok()).map(Self)
    }
}

impl From<ContextId> for Value {
    fn from(id: ContextId) -> Self {
        // Ids are allocated from 1 upward; they stay far below i64::MAX.
        Value::Int(id.0 as i64)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A context was inserted twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyRegistered(pub ContextId);

impl fmt::Display for AlreadyRegistered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is already registered", self.0)
    }
}

impl std::error::Error for AlreadyRegistered {}

/// Worker-thread registry of per-context values.
///
/// Shared between handlers by `Rc`. Dropping a table that still holds
/// entries logs the leaked ids.
pub struct ContextTable<V> {
    name: &'static str,
    entries: RefCell<HashMap<ContextId, Rc<V>>>,
}

impl<V> ContextTable<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn insert(&self, id: ContextId, value: V) -> Result<Rc<V>, AlreadyRegistered> {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&id) {
            return Err(AlreadyRegistered(id));
        }
        let value = Rc::new(value);
        entries.insert(id, value.clone());
        tracing::trace!(table = self.name, %id, "context registered");
        Ok(value)
    }

    /// The value is returned by `Rc`, so it may be held across await points
    /// while other handlers insert or remove entries.
    pub fn get(&self, id: ContextId) -> Option<Rc<V>> {
        self.entries.borrow().get(&id).cloned()
    }

    pub fn remove(&self, id: ContextId) -> Option<Rc<V>> {
        let removed = self.entries.borrow_mut().remove(&id);
        if removed.is_some() {
            tracing::trace!(table = self.name, %id, "context removed");
        }
        removed
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Ids currently registered, sorted.
    pub fn ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.entries.borrow().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<V> Drop for ContextTable<V> {
    fn drop(&mut self) {
        let leaked = self.ids();
        if !leaked.is_empty() {
            let ids: Vec<String> = leaked.iter().map(ToString::to_string).collect();
            tracing::warn!(
                table = self.name,
                count = leaked.len(),
                ids = %ids.join(", "),
                "context table dropped with live entries"
            );
        }
    }
}

impl<V> fmt::Debug for ContextTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTable")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
