//! Component/plugin lifecycle, grounded on `pyaib/components.py`'s `Component` base class and
//! `Manager`/`PluginManager`.
//!
//! `pyaib` locates a component by dotted module path and instantiates it through Python's import
//! machinery; there's no equivalent here, so the embedding application instead registers a
//! [`ComponentFactory`] under a name up front (typically at `main`, one call per `mod` it ships),
//! and `components.load`/`plugins.load` in config picks which registered names actually get
//! instantiated for a given run. This is also why [`Context`] carries two separate
//! [`ComponentManager`]s (`ctx.components`, `ctx.plugins`): `pyaib` keeps framework components and
//! user plugins in distinct namespaces so a plugin can't accidentally shadow a core component, and
//! that separation is preserved here as two independent name tables.
//!
//! A component built with dependencies on other components (`pyaib`'s
//! `@plugin.args('other_component')` style injection) declares them by calling
//! [`ComponentManager::wait_ready`] on the *same* manager from inside its own [`Component::init`].
//! Each registration gets a `tokio::sync::watch::channel(false)` that [`ComponentManager::load_all`]
//! flips to `true` once that component's `init` future resolves, so a dependent's `wait_ready`
//! unblocks the instant its dependency finishes (or times out, rather than hanging forever on a
//! misspelled name or a circular wait).

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::context::Context;
use crate::error::ComponentError;
use crate::events::EventObserver;
use crate::message::{ChainMode, SecondaryParser};
use crate::signals::SignalObserver;
use crate::timers::TimerCallback;
use crate::triggers::TriggerObserver;

pub type InitFuture = Pin<Box<dyn Future<Output = Result<(), ComponentError>>>>;

/// Implemented by every component and plugin. Construction (wiring up event/trigger/timer
/// observers) happens in the [`ComponentFactory`] that builds one; `init` is for the part of
/// startup that needs other components to exist first, matching `pyaib`'s distinction between a
/// component's `__init__` and its deferred `@plugin.init` hook.
pub trait Component {
    /// Default: nothing to defer. Most components never override this.
    fn init(self: Rc<Self>, ctx: Rc<Context>) -> InitFuture {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }
}

pub type ComponentFactory =
    Rc<dyn Fn(&Rc<Context>, &Value, &Registrar<'_>) -> Result<Rc<dyn Component>, ComponentError>>;

/// Handed to a [`ComponentFactory`] so it can wire itself into the runtime's shared services
/// during construction, the equivalent of `pyaib`'s decorator-based registration running at
/// class-body evaluation time.
pub struct Registrar<'a> {
    ctx: &'a Rc<Context>,
}

impl<'a> Registrar<'a> {
    fn new(ctx: &'a Rc<Context>) -> Registrar<'a> {
        Registrar { ctx }
    }

    pub fn ctx(&self) -> &Rc<Context> {
        self.ctx
    }

    pub fn on_event(&self, name: &str, observer: EventObserver) {
        self.ctx.events.observe(name, observer);
    }

    pub fn on_trigger(&self, word: &str, doc: Option<&str>, observer: TriggerObserver) {
        self.ctx.triggers.observe(word, doc, observer);
    }

    pub fn on_signal(&self, name: &str, observer: SignalObserver) {
        self.ctx.signals.observe(name, observer);
    }

    pub fn set_timer(&self, name: &str, delay: Duration, callback: TimerCallback) {
        self.ctx.timers.set(name, delay, callback);
    }

    pub fn every(&self, name: &str, every: Duration, count: Option<u32>, callback: TimerCallback) {
        self.ctx.timers.every(name, every, count, callback);
    }

    /// Install a secondary parser for `command`, the equivalent of `pyaib`'s `@parser('KICK')`
    /// method annotation.
    pub fn add_parser(&self, command: &str, mode: ChainMode, parser: SecondaryParser) {
        self.ctx.parsers.add_parser(command, mode, parser);
    }
}

struct Registration {
    factory: ComponentFactory,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

/// One namespace of named, lazily-instantiated components (either the framework's own, or the
/// embedding application's plugins — `Context` holds one of each).
#[derive(Default)]
pub struct ComponentManager {
    factories: RefCell<HashMap<String, Registration>>,
    loaded: RefCell<HashMap<String, Rc<dyn Component>>>,
}

impl ComponentManager {
    pub fn new() -> ComponentManager {
        ComponentManager::default()
    }

    /// Register a factory under `name`. Call this for every component/plugin the embedding
    /// application ships, before [`ComponentManager::load_all`] — only names present here can
    /// appear in `components.load`/`plugins.load`.
    pub fn register(&self, name: &str, factory: ComponentFactory) {
        let (ready_tx, ready_rx) = watch::channel(false);
        self.factories.borrow_mut().insert(
            name.to_owned(),
            Registration {
                factory,
                ready_tx,
                ready_rx,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Component>> {
        self.loaded.borrow().get(name).cloned()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.borrow().contains_key(name)
    }

    /// Resolve once `name`'s `init` has completed, or `timeout` elapses. A component calls this
    /// from inside its own `init` to wait on a dependency registered on the same manager.
    pub async fn wait_ready(&self, name: &str, timeout: Duration) -> Result<(), ComponentError> {
        let mut rx = {
            let factories = self.factories.borrow();
            let reg = factories
                .get(name)
                .ok_or_else(|| ComponentError::UnknownDependency(name.to_owned()))?;
            reg.ready_rx.clone()
        };
        if *rx.borrow() {
            return Ok(());
        }
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(ComponentError::DependencyTimeout(name.to_owned())),
        }
    }

    /// Instantiate every name in `load`, in order, looking up each one's config via `config_for`,
    /// then run every one's `init` concurrently. A name becomes "ready" for [`Self::wait_ready`]
    /// as soon as its construction (the synchronous registrar wiring below) completes — matching
    /// §4.7's "fully loaded" meaning "all classes instantiated and hooks installed", not "init has
    /// run" — so a component whose `init` calls `wait_ready` on another name in the same batch
    /// doesn't deadlock regardless of which one appears first in `load`: readiness for every name
    /// is signaled before any `init` future is even spawned.
    pub async fn load_all(
        &self,
        ctx: &Rc<Context>,
        load: &[String],
        config_for: impl Fn(&str) -> Value,
    ) -> Result<(), ComponentError> {
        let mut pending = Vec::new();
        for name in load {
            let factory = {
                let factories = self.factories.borrow();
                factories
                    .get(name)
                    .map(|r| r.factory.clone())
                    .ok_or_else(|| ComponentError::NotRegistered(name.clone()))?
            };
            let config = config_for(name);
            let registrar = Registrar::new(ctx);
            let component = factory(ctx, &config, &registrar).map_err(|e| match e {
                ComponentError::InitFailed(_) => e,
                other => ComponentError::InitFailed(other.to_string()),
            })?;
            self.loaded
                .borrow_mut()
                .insert(name.clone(), component.clone());
            if let Some(reg) = self.factories.borrow().get(name) {
                let _ = reg.ready_tx.send(true);
            }
            pending.push((name.clone(), component));
        }

        let handles: Vec<(String, tokio::task::JoinHandle<Result<(), ComponentError>>)> = pending
            .into_iter()
            .map(|(name, component)| {
                let ctx = ctx.clone();
                let handle = tokio::task::spawn_local(async move { component.init(ctx).await });
                (name, handle)
            })
            .collect();

        for (name, handle) in handles {
            handle
                .await
                .map_err(|join_err| ComponentError::InitFailed(format!("{}: {}", name, join_err)))?
                .map_err(|e| ComponentError::InitFailed(format!("{}: {}", name, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::cell::Cell;
    use std::time::Duration;

    struct Dummy;
    impl Component for Dummy {}

    #[tokio::test(flavor = "current_thread")]
    async fn load_all_instantiates_in_order_and_marks_ready() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let manager = Rc::new(ComponentManager::new());
                let ctx = Context::for_tests();
                manager.register(
                    "a",
                    Rc::new(|_ctx, _cfg, _reg| Ok(Rc::new(Dummy) as Rc<dyn Component>)),
                );

                manager
                    .load_all(&ctx, &["a".to_owned()], |_| Value::Null)
                    .await
                    .unwrap();

                assert!(manager.is_loaded("a"));
                manager.wait_ready("a", Duration::from_millis(10)).await.unwrap();
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wait_ready_times_out_for_a_dependency_that_never_loads() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let manager = ComponentManager::new();
                manager.register(
                    "slow",
                    Rc::new(|_ctx, _cfg, _reg| Ok(Rc::new(Dummy) as Rc<dyn Component>)),
                );
                let result = manager.wait_ready("slow", Duration::from_millis(20)).await;
                assert!(matches!(result, Err(ComponentError::DependencyTimeout(_))));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn load_all_rejects_an_unregistered_name() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let manager = Rc::new(ComponentManager::new());
                let ctx = Context::for_tests();
                let result = manager
                    .load_all(&ctx, &["missing".to_owned()], |_| Value::Null)
                    .await;
                assert!(matches!(result, Err(ComponentError::NotRegistered(_))));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn a_dependent_component_unblocks_once_its_dependency_finishes_init() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let manager = Rc::new(ComponentManager::new());
                let ctx = Context::for_tests();
                let saw_dependency_ready = Rc::new(Cell::new(false));

                manager.register(
                    "base",
                    Rc::new(|_ctx, _cfg, _reg| Ok(Rc::new(Dummy) as Rc<dyn Component>)),
                );

                struct Dependent {
                    manager: Rc<ComponentManager>,
                    flag: Rc<Cell<bool>>,
                }
                impl Component for Dependent {
                    fn init(self: Rc<Self>, _ctx: Rc<Context>) -> InitFuture {
                        let this = self.clone();
                        Box::pin(async move {
                            this.manager
                                .wait_ready("base", Duration::from_secs(1))
                                .await?;
                            this.flag.set(true);
                            Ok(())
                        })
                    }
                }

                let manager2 = manager.clone();
                let flag2 = saw_dependency_ready.clone();
                manager.register(
                    "dependent",
                    Rc::new(move |_ctx, _cfg, _reg| {
                        Ok(Rc::new(Dependent {
                            manager: manager2.clone(),
                            flag: flag2.clone(),
                        }) as Rc<dyn Component>)
                    }),
                );

                manager
                    .load_all(
                        &ctx,
                        &["base".to_owned(), "dependent".to_owned()],
                        |_| Value::Null,
                    )
                    .await
                    .unwrap();

                assert!(saw_dependency_ready.get());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dependency_order_in_the_load_list_does_not_matter() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let manager = Rc::new(ComponentManager::new());
                let ctx = Context::for_tests();
                let saw_dependency_ready = Rc::new(Cell::new(false));

                manager.register(
                    "base",
                    Rc::new(|_ctx, _cfg, _reg| Ok(Rc::new(Dummy) as Rc<dyn Component>)),
                );

                struct Dependent {
                    manager: Rc<ComponentManager>,
                    flag: Rc<Cell<bool>>,
                }
                impl Component for Dependent {
                    fn init(self: Rc<Self>, _ctx: Rc<Context>) -> InitFuture {
                        let this = self.clone();
                        Box::pin(async move {
                            this.manager
                                .wait_ready("base", Duration::from_secs(1))
                                .await?;
                            this.flag.set(true);
                            Ok(())
                        })
                    }
                }

                let manager2 = manager.clone();
                let flag2 = saw_dependency_ready.clone();
                manager.register(
                    "dependent",
                    Rc::new(move |_ctx, _cfg, _reg| {
                        Ok(Rc::new(Dependent {
                            manager: manager2.clone(),
                            flag: flag2.clone(),
                        }) as Rc<dyn Component>)
                    }),
                );

                // "dependent" is listed *before* the "base" it waits on; this only resolves
                // because every name's readiness is signaled during construction, before any
                // init future is spawned.
                manager
                    .load_all(
                        &ctx,
                        &["dependent".to_owned(), "base".to_owned()],
                        |_| Value::Null,
                    )
                    .await
                    .unwrap();

                assert!(saw_dependency_ready.get());
            })
            .await;
    }
}
