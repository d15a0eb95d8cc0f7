// bc-clock: the timer/clock seam the session state machine schedules through.
//
// Production binds to the Tokio runtime clock. Tests don't need a bespoke
// virtual clock type -- they run the session under a paused Tokio runtime
// (`#[tokio::test(start_paused = true)]`) and drive time forward with
// `tokio::time::advance`, which this clock's `sleep` calls observe like any
// other `tokio::time::sleep`. That gives deterministic, instantaneous timer
// firing without a parallel clock implementation to keep in sync.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A source of delayed futures. Session timers (heartbeat, session timeout)
/// schedule through this instead of calling `tokio::time::sleep` directly, so
/// the embedding application could substitute a different executor without
/// touching session logic.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

#[derive(Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Convenience constructor for the common case of an `Arc<dyn Clock>`.
pub fn tokio_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}
