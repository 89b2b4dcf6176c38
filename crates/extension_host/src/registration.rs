//! Turns a listener's routines into dispatch-table entries.

use crate::dispatch::{Executor, RegisteredHandler, RoutineExecutor, TimedExecutor};
use crate::error::RegistrationError;
use crate::kinds::OccurrenceKinds;
use crate::timings::Timings;
use crate::warning::WarningState;
use dashmap::DashSet;
use extension_api::{Descriptor, Listener, Routine};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Handlers produced from one listener, grouped by kind, plus the routines
/// that were rejected.
///
/// Kinds appear in the order their first routine was seen, and each handler
/// remembers its routine's position in the listener.
#[derive(Debug, Default)]
pub struct Registration {
    pub handlers: IndexMap<String, Vec<RegisteredHandler>>,
    pub rejected: Vec<RegistrationError>,
}

impl Registration {
    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

/// Scans listeners. Has no effect on the live dispatch table.
pub struct ListenerRegistrar {
    kinds: Arc<OccurrenceKinds>,
    warning_state: WarningState,
    timings: Option<Arc<Timings>>,
    /// (extension, deprecated kind) pairs already reported
    warned: DashSet<(String, String)>,
}

impl ListenerRegistrar {
    pub fn new(kinds: Arc<OccurrenceKinds>, warning_state: WarningState, timings: Option<Arc<Timings>>) -> Self {
        Self {
            kinds,
            warning_state,
            timings,
            warned: DashSet::new(),
        }
    }

    /// Builds handler entries for every marked routine of `listener`.
    ///
    /// Routines with an invalid signature are rejected one by one and the
    /// scan continues. A deprecated kind under [`WarningState::On`] fails the
    /// whole listener.
    pub fn create_registered_listeners(
        &self,
        listener: &Arc<dyn Listener>,
        descriptor: &Descriptor,
    ) -> Result<Registration, RegistrationError> {
        let mut registration = Registration::default();
        let listener_name = listener.listener_name().to_string();

        for (position, routine) in listener.routines().into_iter().enumerate() {
            let Some(marker) = routine.marker() else {
                continue;
            };

            let kind = match self.occurrence_param(&routine) {
                Some(kind) => kind,
                None => {
                    let rejected = RegistrationError::InvalidSignature {
                        extension: descriptor.full_name(),
                        listener: listener_name.clone(),
                        signature: routine.signature(),
                    };
                    error!(extension = descriptor.name(), "{}", rejected);
                    registration.rejected.push(rejected);
                    continue;
                }
            };

            self.check_deprecation(descriptor, &kind, &routine)?;

            let mut executor: Arc<dyn Executor> = Arc::new(RoutineExecutor::new(routine.body().clone()));
            if let Some(timings) = &self.timings {
                let probe = timings.probe(format!(
                    "Extension: {} Event: {}::{}({})",
                    descriptor.full_name(),
                    listener_name,
                    routine.name(),
                    kind
                ));
                executor = Arc::new(TimedExecutor::new(executor, probe));
            }

            registration
                .handlers
                .entry(kind.clone())
                .or_default()
                .push(RegisteredHandler::new(
                    descriptor.name(),
                    listener_name.clone(),
                    routine.name(),
                    kind,
                    marker.priority,
                    marker.ignore_cancelled,
                    executor,
                )
                .exact(routine.is_exact())
                .in_listener_order(position as u64));
        }

        Ok(registration)
    }

    /// The single registered occurrence kind a routine takes, if its signature
    /// is valid.
    fn occurrence_param(&self, routine: &Routine) -> Option<String> {
        match routine.params() {
            [kind] if self.kinds.contains(kind) => Some(kind.clone()),
            _ => None,
        }
    }

    fn check_deprecation(
        &self,
        descriptor: &Descriptor,
        kind: &str,
        routine: &Routine,
    ) -> Result<(), RegistrationError> {
        let Some((deprecated_kind, deprecation)) = self.kinds.nearest_deprecated(kind) else {
            return Ok(());
        };
        if !self.warning_state.print_for(&deprecation) {
            return Ok(());
        }

        let authors = if descriptor.authors().is_empty() {
            "unknown".to_string()
        } else {
            descriptor.authors().join(", ")
        };
        let reason = deprecation.reason.as_deref().unwrap_or("no reason given");

        if self.warning_state.is_fatal() {
            error!(
                extension = descriptor.name(),
                "\"{}\" registered a listener for deprecated occurrence {} on routine \"{}\" ({}); authors: {}",
                descriptor.full_name(),
                deprecated_kind,
                routine.signature(),
                reason,
                authors
            );
            return Err(RegistrationError::DeprecatedOccurrence {
                extension: descriptor.full_name(),
                kind: deprecated_kind,
                routine: routine.signature(),
            });
        }

        if self.warned.insert((descriptor.name().to_string(), deprecated_kind.clone())) {
            warn!(
                extension = descriptor.name(),
                "\"{}\" has registered a listener for {} on routine \"{}\", but the occurrence is deprecated ({}). \
                 Server performance may be affected; please notify the authors {}",
                descriptor.full_name(),
                deprecated_kind,
                routine.signature(),
                reason,
                authors
            );
        }
        Ok(())
    }

    /// Whether a deprecation diagnostic was already emitted for the pair.
    pub fn has_warned(&self, extension: &str, kind: &str) -> bool {
        self.warned.contains(&(extension.to_string(), kind.to_string()))
    }
}
