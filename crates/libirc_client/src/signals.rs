//! Named one-shot cross-task rendezvous.
//!
//! `pyaib/signals.py` itself is an early, non-functional stub (empty bodies); the real semantics
//! come from how it's actually used, e.g. `example/plugins/signals.py`'s NAMES round trip:
//! `RAW("NAMES #chan")` followed by `await_signal(irc_c, 'NAMES_RESPONSE', timeout=10.0)`, with a
//! `IRC_MSG_353` observer later calling `emit_signal`. The Python version signals a timeout by
//! handing back its sentinel `False` payload; here a waiter gets a typed
//! [`crate::error::SignalError::Timeout`] instead, which doesn't collide with a legitimate
//! `false`-valued payload.
//!
//! Each `wait` gets its own buffered `oneshot` channel rather than every waiter sharing one
//! broadcast latch, since an `emit` should wake every current waiter exactly once with its own
//! copy of the payload.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::context::Context;
use crate::error::SignalError;
use crate::supervise::spawn_guarded;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;
pub type SignalObserver = Rc<dyn Fn(Rc<Context>, serde_json::Value) -> BoxFuture>;

#[derive(Default)]
struct SignalEntry {
    observers: Vec<SignalObserver>,
    waiters: Vec<oneshot::Sender<serde_json::Value>>,
}

#[derive(Default)]
pub struct Signals {
    table: RefCell<HashMap<String, SignalEntry>>,
}

impl Signals {
    pub fn new() -> Signals {
        Signals::default()
    }

    pub fn observe(&self, name: &str, observer: SignalObserver) {
        self.table
            .borrow_mut()
            .entry(name.to_lowercase())
            .or_default()
            .observers
            .push(observer);
    }

    /// Wake every current waiter and observer of `name` with `data`. Waiters registered after
    /// this call are unaffected (they'll be satisfied by a later `emit`, or time out).
    pub fn emit(&self, ctx: Rc<Context>, name: &str, data: serde_json::Value) {
        let key = name.to_lowercase();
        let (waiters, observers) = {
            let mut table = self.table.borrow_mut();
            let entry = table.entry(key).or_default();
            (
                std::mem::take(&mut entry.waiters),
                entry.observers.clone(),
            )
        };
        for waiter in waiters {
            let _ = waiter.send(data.clone());
        }
        for observer in observers {
            let ctx = ctx.clone();
            let data = data.clone();
            spawn_guarded(async move { observer(ctx, data).await });
        }
    }

    /// Block until `name` is next emitted, or `timeout` elapses.
    pub async fn wait(&self, name: &str, timeout: Duration) -> Result<serde_json::Value, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.table
            .borrow_mut()
            .entry(name.to_lowercase())
            .or_default()
            .waiters
            .push(tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(_) => Err(SignalError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn wait_resolves_when_emit_arrives_before_timeout() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let signals = Rc::new(Signals::new());
                let ctx = Context::for_tests();

                let signals2 = signals.clone();
                let ctx2 = ctx.clone();
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    signals2.emit(ctx2, "NAMES_RESPONSE", serde_json::json!(["a", "b"]));
                });

                let result = signals
                    .wait("names_response", Duration::from_secs(5))
                    .await
                    .unwrap();
                assert_eq!(result, serde_json::json!(["a", "b"]));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn wait_times_out_with_no_emit() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let signals = Signals::new();
                let result = signals.wait("never", Duration::from_millis(50)).await;
                assert!(matches!(result, Err(SignalError::Timeout)));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn emit_with_no_waiters_is_a_no_op() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let signals = Signals::new();
                let ctx = Context::for_tests();
                signals.emit(ctx, "UNWATCHED", serde_json::Value::Null);
            })
            .await;
    }
}
