//! Named observer multicast, grounded on `pyaib/events.py`'s `Events`/`Event`/`NullEvent`.
//!
//! Event names are case-insensitive and looked up through a null-object pattern: firing or
//! observing a name that was never registered is a no-op rather than an error, so components
//! don't need to pre-declare every event they might someday see. `fire` takes a snapshot of the
//! observer list before spawning anything, so an observer registered mid-dispatch (by another
//! observer of the same event) only sees the *next* fire, not the one in progress.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::context::Context;
use crate::error::EventError;
use crate::message::Message;
use crate::supervise::spawn_guarded;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;
pub type EventObserver = Rc<dyn Fn(Rc<Context>, EventArgs) -> BoxFuture>;

/// The payload passed to an event observer. Distinct named events carry distinct shapes; rather
/// than a single dynamically-typed bag, this enumerates the shapes the runtime actually fires so
/// callers get exhaustiveness checking on the ones they care about.
#[derive(Debug, Clone)]
pub enum EventArgs {
    None,
    Raw(String),
    Msg(Rc<Message>),
    NickChange { old: String, new: String },
    NickInUse(String),
    ChannelJoinError { channel: String, reason: String },
}

#[derive(Default)]
pub struct Events {
    table: RefCell<HashMap<String, Vec<EventObserver>>>,
}

impl Events {
    pub fn new() -> Events {
        Events::default()
    }

    /// Register an observer for `name`. Duplicate registrations (same `Rc` pointer) are silently
    /// ignored.
    pub fn observe(&self, name: &str, observer: EventObserver) {
        let key = name.to_lowercase();
        let mut table = self.table.borrow_mut();
        let observers = table.entry(key).or_default();
        if !observers.iter().any(|o| Rc::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Remove the first observer matching `observer`. Errors if `name` has no observers at all,
    /// or none of them match.
    pub fn unobserve(&self, name: &str, observer: &EventObserver) -> Result<(), EventError> {
        let key = name.to_lowercase();
        let mut table = self.table.borrow_mut();
        let observers = table.get_mut(&key).ok_or(EventError::NotObserved)?;
        let pos = observers
            .iter()
            .position(|o| Rc::ptr_eq(o, observer))
            .ok_or(EventError::NotObserved)?;
        observers.remove(pos);
        Ok(())
    }

    /// Fire `name` with `args`. Each currently-registered observer runs in its own spawned task;
    /// observers registered after this snapshot is taken don't see this fire.
    pub fn fire(&self, name: &str, ctx: Rc<Context>, args: EventArgs) {
        let key = name.to_lowercase();
        let snapshot = self.table.borrow().get(&key).cloned().unwrap_or_default();
        for observer in snapshot {
            let ctx = ctx.clone();
            let args = args.clone();
            spawn_guarded(async move { observer(ctx, args).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn noop_ctx() -> Rc<Context> {
        Context::for_tests()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fire_is_a_no_op_for_an_unobserved_name() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let events = Events::new();
                events.fire("IRC_NOTHING", noop_ctx(), EventArgs::None);
                tokio::task::yield_now().await;
            })
            .await;
    }

    #[test]
    fn unobserve_removes_the_matching_observer() {
        let events = Events::new();
        let observer: EventObserver = Rc::new(|_ctx, _args| Box::pin(async {}));
        events.observe("X", observer.clone());
        events.unobserve("X", &observer).unwrap();
        assert!(events.table.borrow().get("x").unwrap().is_empty());
    }

    #[test]
    fn unobserve_errors_when_the_name_was_never_observed() {
        let observer: EventObserver = Rc::new(|_ctx, _args| Box::pin(async {}));
        let events = Events::new();
        assert!(matches!(
            events.unobserve("IRC_NOTHING", &observer),
            Err(EventError::NotObserved)
        ));
    }

    #[test]
    fn unobserve_errors_when_the_observer_does_not_match() {
        let events = Events::new();
        let observed: EventObserver = Rc::new(|_ctx, _args| Box::pin(async {}));
        let other: EventObserver = Rc::new(|_ctx, _args| Box::pin(async {}));
        events.observe("X", observed);
        assert!(matches!(events.unobserve("X", &other), Err(EventError::NotObserved)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn observers_registered_mid_fire_do_not_see_that_fire() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let events = Rc::new(Events::new());
                let calls = Rc::new(Cell::new(0));

                let events2 = events.clone();
                let calls2 = calls.clone();
                let first: EventObserver = Rc::new(move |_ctx, _args| {
                    let events2 = events2.clone();
                    let calls2 = calls2.clone();
                    Box::pin(async move {
                        let inner: EventObserver =
                            Rc::new(move |_ctx, _args| Box::pin(async move {}));
                        events2.observe("X", inner);
                        calls2.set(calls2.get() + 1);
                    })
                });
                events.observe("X", first);
                events.fire("X", noop_ctx(), EventArgs::None);

                // Drain the spawned tasks.
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(calls.get(), 1);
                assert_eq!(events.table.borrow().get("x").unwrap().len(), 2);
            })
            .await;
    }
}
