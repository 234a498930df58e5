//! 1Hz tick-driven timers, grounded on `pyaib/timers.py`'s `Timers`/`Timer`.
//!
//! Timers are kept in a plain `Vec` rather than a priority queue: the tick rate is fixed at 1Hz
//! and the timer count is always small, so registration-order firing within a tick (which a
//! `Vec` gives for free by iterating front-to-back) matters more than shaving cycles off a
//! scheduling structure nobody will notice.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::supervise::spawn_guarded;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;
pub type TimerCallback = Rc<dyn Fn(Rc<Context>, String) -> BoxFuture>;

struct Timer {
    name: String,
    callback: TimerCallback,
    next_fire: Instant,
    every: Option<Duration>,
    /// Remaining repeats for a bounded repeating timer; `None` means unbounded.
    count: Option<u32>,
    expired: bool,
}

#[derive(Default)]
pub struct Timers {
    list: RefCell<Vec<Timer>>,
}

impl Timers {
    pub fn new() -> Timers {
        Timers::default()
    }

    /// Schedule a one-shot timer firing after `delay`.
    pub fn set(&self, name: &str, delay: Duration, callback: TimerCallback) {
        self.list.borrow_mut().push(Timer {
            name: name.to_owned(),
            callback,
            next_fire: Instant::now() + delay,
            every: None,
            count: None,
            expired: false,
        });
    }

    /// Schedule a repeating timer firing every `every`, optionally budgeted to `count` firings.
    pub fn every(&self, name: &str, every: Duration, count: Option<u32>, callback: TimerCallback) {
        self.list.borrow_mut().push(Timer {
            name: name.to_owned(),
            callback,
            next_fire: Instant::now() + every,
            every: Some(every),
            count,
            expired: false,
        });
    }

    /// Reset the named timer's next fire time to `delay` from now, matching it by name and
    /// callback identity (so two distinct timers sharing a name don't get confused).
    pub fn reset(&self, name: &str, callback: &TimerCallback, delay: Duration) {
        let mut list = self.list.borrow_mut();
        for timer in list.iter_mut() {
            if timer.name == name && Rc::ptr_eq(&timer.callback, callback) {
                timer.next_fire = Instant::now() + delay;
                timer.expired = false;
            }
        }
    }

    pub fn clear(&self, name: &str, callback: &TimerCallback) {
        self.list
            .borrow_mut()
            .retain(|t| !(t.name == name && Rc::ptr_eq(&t.callback, callback)));
    }

    /// Drive the 1Hz tick loop. Runs until the task is aborted; intended to be spawned once for
    /// the lifetime of the runtime, independent of any single connection.
    pub async fn tick_loop(self: Rc<Self>, ctx: Rc<Context>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            self.fire_due(&ctx);
        }
    }

    fn fire_due(&self, ctx: &Rc<Context>) {
        let now = Instant::now();
        let mut list = self.list.borrow_mut();
        for timer in list.iter_mut() {
            if timer.expired || timer.next_fire > now {
                continue;
            }
            let ctx = ctx.clone();
            let callback = timer.callback.clone();
            let name = timer.name.clone();
            spawn_guarded(async move { callback(ctx, name).await });

            match timer.every {
                Some(every) => {
                    timer.next_fire = now + every;
                    if let Some(count) = timer.count.as_mut() {
                        *count -= 1;
                        if *count == 0 {
                            timer.expired = true;
                        }
                    }
                }
                None => timer.expired = true,
            }
        }
        list.retain(|t| !t.expired);
    }
}
