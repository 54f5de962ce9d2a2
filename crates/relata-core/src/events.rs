//! Prioritized lifecycle event dispatch.
//!
//! Each model type owns a [`Dispatcher`] holding listeners for the six
//! lifecycle events. Listeners run in descending priority; listeners with the
//! same priority run in registration order. Any listener may stop propagation,
//! which the caller observes as [`DispatchOutcome::Stopped`]. For the `-ing`
//! events a stop cancels the operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Priority of user listeners unless stated otherwise.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority of the engine's own listeners (permissions, timestamps,
/// soft-delete defaults). They run before user listeners of lower priority.
pub const BUILTIN_PRIORITY: i32 = 1000;

/// The lifecycle events of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 6] = [
        LifecycleEvent::Creating,
        LifecycleEvent::Created,
        LifecycleEvent::Updating,
        LifecycleEvent::Updated,
        LifecycleEvent::Deleting,
        LifecycleEvent::Deleted,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Creating => "creating",
            LifecycleEvent::Created => "created",
            LifecycleEvent::Updating => "updating",
            LifecycleEvent::Updated => "updated",
            LifecycleEvent::Deleting => "deleting",
            LifecycleEvent::Deleted => "deleted",
        }
    }

    /// Events dispatched before the storage call.
    pub const fn is_before(self) -> bool {
        matches!(
            self,
            LifecycleEvent::Creating | LifecycleEvent::Updating | LifecycleEvent::Deleting
        )
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a listener asks the dispatcher to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    /// Skip the remaining listeners, with an optional reason.
    Stop(Option<String>),
}

impl Propagation {
    pub fn stop(reason: impl Into<String>) -> Self {
        Propagation::Stop(Some(reason.into()))
    }
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every listener ran.
    Completed,
    /// A listener stopped propagation.
    Stopped { reason: Option<String> },
}

impl DispatchOutcome {
    pub fn is_stopped(&self) -> bool {
        matches!(self, DispatchOutcome::Stopped { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Stopped { reason } => reason.as_deref(),
            DispatchOutcome::Completed => None,
        }
    }
}

/// A listener receiving the model mutably.
pub type Listener<T> = Arc<dyn Fn(&mut T) -> Propagation + Send + Sync>;

/// Handle returned by [`Dispatcher::listen`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registered<T> {
    id: ListenerId,
    priority: i32,
    listener: Listener<T>,
}

impl<T> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            listener: Arc::clone(&self.listener),
        }
    }
}

/// Listener registry for one model type.
pub struct Dispatcher<T> {
    listeners: RwLock<HashMap<LifecycleEvent, Vec<Registered<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `listener` for `event` at `priority`.
    pub fn listen<F>(&self, event: LifecycleEvent, priority: i32, listener: F) -> ListenerId
    where
        F: Fn(&mut T) -> Propagation + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let list = listeners.entry(event).or_default();
        list.push(Registered {
            id,
            priority,
            listener: Arc::new(listener),
        });
        // Stable: equal priorities keep registration order.
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
        id
    }

    /// Removes a listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for list in listeners.values_mut() {
            let before = list.len();
            list.retain(|r| r.id != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn listener_count(&self, event: LifecycleEvent) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Runs the listeners of `event` against `target`.
    ///
    /// The listener list is snapshotted first, so listeners may register
    /// further listeners without deadlocking; those take effect from the next
    /// dispatch.
    pub fn dispatch(&self, event: LifecycleEvent, target: &mut T) -> DispatchOutcome {
        let snapshot: Vec<Registered<T>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned()
            .unwrap_or_default();

        for registered in snapshot {
            if let Propagation::Stop(reason) = (registered.listener)(target) {
                return DispatchOutcome::Stopped { reason };
            }
        }
        DispatchOutcome::Completed
    }
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        f.debug_struct("Dispatcher").field("listeners", &counts).finish()
    }
}
