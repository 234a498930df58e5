//! Shared helper for running a handler in its own task and logging, rather than propagating, a
//! panic inside it. Every dispatch point that fans out to user-supplied callbacks (events,
//! triggers, timers, signals) runs handlers through this so one broken observer can't take down
//! the runtime or its siblings.

use std::future::Future;

/// Spawn `fut` on the current `LocalSet`, and spawn a second supervising task that awaits its
/// join handle purely to log a panic if one happened. Fire-and-forget from the caller's point of
/// view.
pub(crate) fn spawn_guarded<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    let handle = tokio::task::spawn_local(fut);
    tokio::task::spawn_local(async move {
        if let Err(err) = handle.await {
            log::error!("handler task panicked: {}", err);
        }
    });
}
