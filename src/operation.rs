//! Operations - opaque persistence callables and the lists that hold them
//!
//! An [`Operation`] is a zero-argument callable. Named operations carry a
//! stable [`OperationId`] used for matching against configured lists;
//! anonymous ones only ever match themselves and report a placeholder label.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Label reported for operations without a name
pub const ANONYMOUS_LABEL: &str = "<anonymous>";

/// Stable identifier of a named operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The callable behind an operation
pub type Invoke = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// A persistence operation, referenced by whichever lists hold it
#[derive(Clone)]
pub enum Operation {
    Named { id: OperationId, invoke: Invoke },
    Anonymous { invoke: Invoke },
}

impl Operation {
    pub fn named<F>(id: impl Into<OperationId>, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Operation::Named {
            id: id.into(),
            invoke: Arc::new(f),
        }
    }

    pub fn anonymous<F>(f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Operation::Anonymous { invoke: Arc::new(f) }
    }

    /// A named operation with no callable behind it; invoking it fails.
    pub fn unbound(id: OperationId) -> Self {
        let name = id.to_string();
        Operation::named(id, move || Err(anyhow!("operation '{}' is not registered", name)))
    }

    pub fn id(&self) -> Option<&OperationId> {
        match self {
            Operation::Named { id, .. } => Some(id),
            Operation::Anonymous { .. } => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Operation::Named { id, .. } => id.as_str(),
            Operation::Anonymous { .. } => ANONYMOUS_LABEL,
        }
    }

    /// Whether this operation is identified by any of `ids`.
    pub fn is_listed_in(&self, ids: &[OperationId]) -> bool {
        self.id().is_some_and(|id| ids.contains(id))
    }

    /// Identity comparison: same name, or the very same anonymous callable.
    pub fn same_as(&self, other: &Operation) -> bool {
        match (self, other) {
            (Operation::Named { id: a, .. }, Operation::Named { id: b, .. }) => a == b,
            (Operation::Anonymous { invoke: a }, Operation::Anonymous { invoke: b }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    pub fn invoke(&self) -> Result<()> {
        match self {
            Operation::Named { invoke, .. } | Operation::Anonymous { invoke } => invoke(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Named { id, .. } => f.debug_tuple("Named").field(id).finish(),
            Operation::Anonymous { .. } => f.write_str("Anonymous"),
        }
    }
}

/// Callables known by name, used to bind configured sync hooks
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<OperationId, Operation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named operation, replacing any earlier one with the same id.
    /// Anonymous operations cannot be looked up and are ignored.
    pub fn register(&mut self, operation: Operation) {
        if let Some(id) = operation.id().cloned() {
            self.operations.insert(id, operation);
        }
    }

    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.get(id)
    }

    /// The registered operation for `id`, or an unbound one that fails when run.
    pub fn bind(&self, id: &OperationId) -> Operation {
        self.get(id)
            .cloned()
            .unwrap_or_else(|| Operation::unbound(id.clone()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &OperationId> {
        self.operations.keys()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Capability over a host-owned list of operations.
///
/// Implementations must return the current membership on every call;
/// callers never keep a snapshot beyond one resolve or trim.
pub trait HookList: Send + Sync {
    fn list(&self) -> Vec<Operation>;

    /// Remove every entry named `id`. Returns whether anything was removed.
    fn remove(&self, id: &OperationId) -> bool;
}

/// Mutex-guarded operation list shared between the host and its components
#[derive(Clone, Default)]
pub struct SharedHookList {
    name: &'static str,
    entries: Arc<Mutex<Vec<Operation>>>,
}

impl SharedHookList {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Operation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an operation unless it is already registered.
    pub fn register(&self, operation: Operation) {
        let mut entries = self.entries();
        if entries.iter().any(|existing| existing.same_as(&operation)) {
            return;
        }
        debug!("{}: registered {}", self.name, operation.label());
        entries.push(operation);
    }

    pub fn unregister(&self, operation: &Operation) {
        self.entries().retain(|existing| !existing.same_as(operation));
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|operation| operation.label().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl HookList for SharedHookList {
    fn list(&self) -> Vec<Operation> {
        self.entries().clone()
    }

    fn remove(&self, id: &OperationId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|operation| operation.id() != Some(id));
        before != entries.len()
    }
}
