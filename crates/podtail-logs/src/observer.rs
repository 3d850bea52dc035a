use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::LogError;

/// Why a session run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// `stop` was called
    Stopped,
    /// The caller's cancellation token fired
    Canceled,
    /// The source closed the stream
    Ended,
    /// The stream could not be opened or broke mid-way
    Failed(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Canceled => f.write_str("canceled"),
            Self::Ended => f.write_str("stream ended"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Presentation-side receiver of session events.
///
/// Callbacks run synchronously on the thread that triggered them, which
/// may be the session's background task.
pub trait LogObserver: Send + Sync {
    /// Full replacement of (or incremental growth to) the visible lines
    fn on_data_batch(&self, lines: &[Vec<u8>]);

    /// Drop whatever is shown
    fn on_clear(&self);

    /// The feed ended; fired once per `start`
    fn on_terminated(&self, cause: &Termination);

    fn on_paused(&self);

    fn on_resumed(&self);

    /// A request was rejected (e.g. a malformed filter expression)
    fn on_failed(&self, _err: &LogError) {}
}

/// Non-owning, ordered list of observers
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: RwLock<Vec<Weak<dyn LogObserver>>>,
}

impl ObserverList {
    pub(crate) fn add(&self, observer: &Arc<dyn LogObserver>) {
        self.observers.write().push(Arc::downgrade(observer));
    }

    pub(crate) fn remove(&self, observer: &Arc<dyn LogObserver>) {
        let target = Arc::downgrade(observer);
        self.observers.write().retain(|o| !Weak::ptr_eq(o, &target));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.observers.read().iter().filter(|o| o.strong_count() > 0).count()
    }

    /// Invoke `f` on every live observer in registration order.
    ///
    /// The list is snapshotted first so registration never blocks on delivery.
    pub(crate) fn for_each(&self, f: impl Fn(&dyn LogObserver)) {
        let live: Vec<Arc<dyn LogObserver>> = {
            let mut observers = self.observers.write();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in &live {
            f(observer.as_ref());
        }
    }
}
