//! Host-emitted occurrences and the handler routines extensions attach to them.

use crate::ExtensionError;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Name of the root occurrence kind every other kind descends from.
pub const ROOT_KIND: &str = "occurrence";

/// Trait implemented by every occurrence the host dispatches.
///
/// The kind name is the routing key; the host keeps the kind hierarchy
/// (parents, deprecation) separately, keyed by the same name. Use
/// [`impl_occurrence!`](crate::impl_occurrence) rather than implementing this
/// by hand.
pub trait Occurrence: Any + Send + Sync + Debug {
    /// Kind name for routing, available without an instance.
    fn kind_name() -> &'static str
    where
        Self: Sized;

    /// Kind name of this instance.
    fn kind(&self) -> &'static str;

    /// Whether an earlier handler cancelled this occurrence.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Implements [`Occurrence`] for a struct.
///
/// ```rust
/// use extension_api::{impl_occurrence, Occurrence};
///
/// #[derive(Debug)]
/// struct PlayerChat {
///     message: String,
///     cancelled: bool,
/// }
///
/// impl_occurrence!(PlayerChat, "player_chat", cancellable: cancelled);
///
/// let chat = PlayerChat { message: "hi".into(), cancelled: true };
/// assert_eq!(chat.kind(), "player_chat");
/// assert!(chat.is_cancelled());
/// ```
#[macro_export]
macro_rules! impl_occurrence {
    ($ty:ty, $kind:expr) => {
        impl $crate::Occurrence for $ty {
            fn kind_name() -> &'static str {
                $kind
            }

            fn kind(&self) -> &'static str {
                $kind
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
    ($ty:ty, $kind:expr, cancellable: $field:ident) => {
        impl $crate::Occurrence for $ty {
            fn kind_name() -> &'static str {
                $kind
            }

            fn kind(&self) -> &'static str {
                $kind
            }

            fn is_cancelled(&self) -> bool {
                self.$field
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Emitted after an extension's enable routine ran.
#[derive(Debug, Clone)]
pub struct ExtensionEnableOccurrence {
    pub extension: String,
    pub version: String,
}

impl_occurrence!(ExtensionEnableOccurrence, "extension_enable");

/// Emitted before an extension's disable routine runs, while it still reports
/// itself as enabled.
#[derive(Debug, Clone)]
pub struct ExtensionDisableOccurrence {
    pub extension: String,
    pub version: String,
}

impl_occurrence!(ExtensionDisableOccurrence, "extension_disable");

/// Dispatch priority of a handler. Handlers run from `Lowest` to `Monitor`;
/// `Monitor` handlers observe the final outcome and should not modify it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Monitor,
}

/// The capability marker that turns a routine into an occurrence handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerMarker {
    pub priority: Priority,
    /// Skip this handler once the occurrence has been cancelled.
    pub ignore_cancelled: bool,
}

/// Callable body of a routine.
pub type RoutineBody = Arc<dyn Fn(&mut dyn Occurrence) -> Result<(), ExtensionError> + Send + Sync>;

/// One routine exposed by a listener.
///
/// `params` is the declared signature: a list of parameter type names. Only
/// routines with a [`HandlerMarker`] are considered for registration, and the
/// host rejects marked routines whose signature is not a single occurrence kind.
#[derive(Clone)]
pub struct Routine {
    name: String,
    params: Vec<String>,
    marker: Option<HandlerMarker>,
    exact: bool,
    body: RoutineBody,
}

impl Routine {
    /// A marked handler for occurrences of type `E`, with `Normal` priority.
    ///
    /// The handler is exact: it receives occurrences of `E`'s own kind only,
    /// never those of descendant kinds. Use [`Routine::for_kind`] to observe a
    /// kind together with its descendants.
    ///
    /// ```rust
    /// use extension_api::{ExtensionEnableOccurrence, Priority, Routine};
    ///
    /// let routine = Routine::handler("on_enable", |occurrence: &mut ExtensionEnableOccurrence| {
    ///     println!("{} enabled", occurrence.extension);
    ///     Ok(())
    /// })
    /// .priority(Priority::Monitor);
    ///
    /// assert_eq!(routine.params(), ["extension_enable".to_string()]);
    /// ```
    pub fn handler<E, F>(name: impl Into<String>, handler: F) -> Self
    where
        E: Occurrence,
        F: Fn(&mut E) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        let body: RoutineBody = Arc::new(move |occurrence: &mut dyn Occurrence| {
            let found = occurrence.kind();
            match occurrence.as_any_mut().downcast_mut::<E>() {
                Some(typed) => handler(typed),
                None => Err(ExtensionError::OccurrenceMismatch {
                    expected: E::kind_name().to_string(),
                    found: found.to_string(),
                }),
            }
        });

        Self {
            name: name.into(),
            params: vec![E::kind_name().to_string()],
            marker: Some(HandlerMarker::default()),
            exact: true,
            body,
        }
    }

    /// A marked handler for occurrences of `kind` and of every kind descending
    /// from it, with `Normal` priority.
    ///
    /// ```rust
    /// use extension_api::Routine;
    ///
    /// let routine = Routine::for_kind("audit", "player", |occurrence| {
    ///     println!("saw {}", occurrence.kind());
    ///     Ok(())
    /// });
    ///
    /// assert!(!routine.is_exact());
    /// assert_eq!(routine.signature(), "audit(player)");
    /// ```
    pub fn for_kind<F>(name: impl Into<String>, kind: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut dyn Occurrence) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        Self::declared(name, vec![kind.into()], Some(HandlerMarker::default()), body)
    }

    /// A routine with an explicit declared signature and optional marker.
    ///
    /// Used by listeners whose routines are described at runtime, and for
    /// plain helper routines that carry no marker at all.
    pub fn declared<F>(
        name: impl Into<String>,
        params: Vec<String>,
        marker: Option<HandlerMarker>,
        body: F,
    ) -> Self
    where
        F: Fn(&mut dyn Occurrence) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            marker,
            exact: false,
            body: Arc::new(body),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.marker.get_or_insert_with(HandlerMarker::default).priority = priority;
        self
    }

    pub fn ignore_cancelled(mut self, ignore: bool) -> Self {
        self.marker.get_or_insert_with(HandlerMarker::default).ignore_cancelled = ignore;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn marker(&self) -> Option<HandlerMarker> {
        self.marker
    }

    /// Whether the routine only accepts occurrences of exactly its declared
    /// kind.
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn body(&self) -> &RoutineBody {
        &self.body
    }

    /// Signature in `name(a, b)` form for diagnostics.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params.join(", "))
    }
}

impl Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("marker", &self.marker)
            .field("exact", &self.exact)
            .finish()
    }
}

/// An object whose routines may handle occurrences.
pub trait Listener: Send + Sync + 'static {
    /// Name used in diagnostics and timing probes.
    fn listener_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Every routine this listener exposes, marked or not.
    fn routines(&self) -> Vec<Routine>;
}
