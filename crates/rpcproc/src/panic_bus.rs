//! # Panic Bus
//!
//! A process-wide list of subscribers interested in Kernel errors.
//!
//! Publishing runs every subscriber synchronously on the reporting thread while the
//! list lock is held, so a subscriber must not subscribe or unsubscribe from inside its
//! callback. Errors of any other kind are ignored.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::error;

use crate::Error;
use crate::ErrorKind;

type Subscriber = Arc<dyn Fn(&Error) + Send + Sync>;

static SUBSCRIBERS: LazyLock<Mutex<Vec<(u64, Subscriber)>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Keeps a subscriber registered until dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        SUBSCRIBERS.lock().retain(|(id, _)| *id != self.id);
    }
}

/// Registers `f` for every Kernel error published from now on.
pub fn subscribe(f: impl Fn(&Error) + Send + Sync + 'static) -> Subscription {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    SUBSCRIBERS.lock().push((id, Arc::new(f)));
    Subscription { id }
}

/// Delivers a Kernel error to every subscriber.
pub fn publish(err: &Error) {
    if err.kind() != ErrorKind::Kernel {
        return;
    }
    error!(reason = err.message(), trace = err.debug(), "kernel error");
    let subscribers = SUBSCRIBERS.lock();
    for (_, f) in subscribers.iter() {
        f(err);
    }
}

/// Publishes `err` and hands it back, for use in `return Err(report(..))`.
pub(crate) fn report(err: Error) -> Error {
    publish(&err);
    err
}
