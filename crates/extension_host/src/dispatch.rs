//! Live dispatch table for host-emitted occurrences.

use crate::kinds::OccurrenceKinds;
use crate::timings::TimingProbe;
use extension_api::{ExtensionError, Occurrence, Priority, RoutineBody};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Something that runs when an occurrence is dispatched.
pub trait Executor: Send + Sync {
    fn execute(&self, occurrence: &mut dyn Occurrence) -> Result<(), ExtensionError>;
}

/// Runs a routine body directly.
pub struct RoutineExecutor {
    body: RoutineBody,
}

impl RoutineExecutor {
    pub fn new(body: RoutineBody) -> Self {
        Self { body }
    }
}

impl Executor for RoutineExecutor {
    fn execute(&self, occurrence: &mut dyn Occurrence) -> Result<(), ExtensionError> {
        (self.body)(occurrence)
    }
}

/// Records every call of the wrapped executor in a timing probe.
pub struct TimedExecutor {
    inner: Arc<dyn Executor>,
    probe: Arc<TimingProbe>,
}

impl TimedExecutor {
    pub fn new(inner: Arc<dyn Executor>, probe: Arc<TimingProbe>) -> Self {
        Self { inner, probe }
    }
}

impl Executor for TimedExecutor {
    fn execute(&self, occurrence: &mut dyn Occurrence) -> Result<(), ExtensionError> {
        let _timing = self.probe.start();
        self.inner.execute(occurrence)
    }
}

/// One handler entry in the dispatch table.
#[derive(Clone)]
pub struct RegisteredHandler {
    owner: String,
    listener: String,
    routine: String,
    kind: String,
    priority: Priority,
    ignore_cancelled: bool,
    exact: bool,
    sequence: u64,
    executor: Arc<dyn Executor>,
}

impl RegisteredHandler {
    pub fn new(
        owner: impl Into<String>,
        listener: impl Into<String>,
        routine: impl Into<String>,
        kind: impl Into<String>,
        priority: Priority,
        ignore_cancelled: bool,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            owner: owner.into(),
            listener: listener.into(),
            routine: routine.into(),
            kind: kind.into(),
            priority,
            ignore_cancelled,
            exact: false,
            sequence: 0,
            executor,
        }
    }

    /// Restricts the handler to occurrences of exactly its kind. Exact
    /// handlers are not offered occurrences of descendant kinds.
    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// Position among the handlers produced by one listener scan. Replaced by
    /// the table-wide sequence when the handler is registered.
    pub(crate) fn in_listener_order(mut self, position: u64) -> Self {
        self.sequence = position;
        self
    }

    /// Name of the extension that registered the handler.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn routine(&self) -> &str {
        &self.routine
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ignores_cancelled(&self) -> bool {
        self.ignore_cancelled
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    fn receives(&self, kind: &str) -> bool {
        !self.exact || self.kind == kind
    }

    /// Registration order within the table; breaks priority ties.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn order_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("owner", &self.owner)
            .field("listener", &self.listener)
            .field("routine", &self.routine)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("ignore_cancelled", &self.ignore_cancelled)
            .field("exact", &self.exact)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub invoked: usize,
    /// Handlers skipped because the occurrence was cancelled
    pub skipped: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Kind name to handlers, each list kept in dispatch order.
pub struct HandlerTable {
    kinds: Arc<OccurrenceKinds>,
    handlers: RwLock<HashMap<String, Vec<RegisteredHandler>>>,
    sequence: AtomicU64,
}

impl HandlerTable {
    pub fn new(kinds: Arc<OccurrenceKinds>) -> Self {
        Self {
            kinds,
            handlers: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Merges handlers into the table. Returns how many were added.
    ///
    /// Sequence numbers follow the order the handlers were produced in (their
    /// listener's routine order), not the grouping by kind, so equal-priority
    /// handlers on related kinds keep a reproducible order.
    ///
    /// # Arguments
    ///
    /// * `handlers` - Handlers grouped by the kind they are registered on
    ///
    /// # Returns
    ///
    /// The number of handlers added.
    pub fn register_all(&self, handlers: IndexMap<String, Vec<RegisteredHandler>>) -> usize {
        let mut entries: Vec<RegisteredHandler> = handlers.into_values().flatten().collect();
        entries.sort_by_key(|handler| handler.sequence);

        let mut table = self.handlers.write();
        let added = entries.len();
        let mut touched = Vec::new();
        for mut handler in entries {
            handler.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            if !touched.contains(&handler.kind) {
                touched.push(handler.kind.clone());
            }
            table.entry(handler.kind.clone()).or_default().push(handler);
        }
        for kind in &touched {
            if let Some(list) = table.get_mut(kind) {
                list.sort_by_key(RegisteredHandler::order_key);
            }
        }
        added
    }

    /// Removes every handler owned by an extension, from every kind.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut table = self.handlers.write();
        let mut removed = 0;
        for list in table.values_mut() {
            let before = list.len();
            list.retain(|handler| handler.owner != owner);
            removed += before - list.len();
        }
        table.retain(|_, list| !list.is_empty());
        removed
    }

    /// Handlers registered directly on `kind`, in dispatch order.
    pub fn registered_handlers_for(&self, kind: &str) -> Vec<RegisteredHandler> {
        self.handlers.read().get(kind).cloned().unwrap_or_default()
    }

    /// Handlers that receive an occurrence of `kind`: those on the kind and the
    /// non-exact ones on each of its ancestors, in dispatch order.
    pub fn handlers_for(&self, kind: &str) -> Vec<RegisteredHandler> {
        let ancestors = self.kinds.ancestors(kind);
        let table = self.handlers.read();
        let mut handlers: Vec<RegisteredHandler> = ancestors
            .iter()
            .filter_map(|k| table.get(k))
            .flatten()
            .filter(|handler| handler.receives(kind))
            .cloned()
            .collect();
        handlers.sort_by_key(RegisteredHandler::order_key);
        handlers
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn handler_count_for_owner(&self, owner: &str) -> usize {
        self.handlers
            .read()
            .values()
            .flatten()
            .filter(|handler| handler.owner == owner)
            .count()
    }

    /// Runs every matching handler in order. A failing or panicking handler
    /// is logged and the remaining handlers still run.
    pub fn dispatch(&self, occurrence: &mut dyn Occurrence) -> DispatchReport {
        let kind = occurrence.kind();
        let handlers = self.handlers_for(kind);
        let mut report = DispatchReport::default();

        for handler in &handlers {
            if handler.ignore_cancelled && occurrence.is_cancelled() {
                report.skipped += 1;
                continue;
            }

            trace!(
                extension = %handler.owner,
                "Dispatching {} to {}::{}",
                kind,
                handler.listener,
                handler.routine
            );
            report.invoked += 1;

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler.executor.execute(&mut *occurrence)))
                .unwrap_or_else(|payload| Err(ExtensionError::from_panic(payload)));
            if let Err(e) = outcome {
                report.failed += 1;
                error!(
                    extension = %handler.owner,
                    "Could not pass occurrence {} to {}::{}: {}",
                    kind,
                    handler.listener,
                    handler.routine,
                    e
                );
            }
        }
        report
    }
}
