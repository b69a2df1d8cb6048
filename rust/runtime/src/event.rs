//! Typed event endpoints.
//!
//! A port is a plain struct of [`InEvent`] and [`OutEvent`] fields shared
//! (through `Rc`) by its provider and its requirer. The provider binds the
//! in-event bodies, the requirer binds the out-event handlers, and both
//! sides call through the same objects so every crossing is seen by the
//! kernel.

use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::error::IllegalTransition;
use crate::identity::{EventId, PortId};
use crate::locator::Locator;
use crate::port::Direction;
use crate::protocol::Reply;
use crate::runtime::Deliver;

type Body<A, R> = Rc<dyn Fn(A) -> LocalBoxFuture<'static, R>>;
type Hook = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// Event called by the requirer and answered by the provider.
pub struct InEvent<A, R = ()> {
    locator: Locator,
    port: PortId,
    id: EventId,
    name: String,
    strict: Cell<bool>,
    body: RefCell<Option<Body<A, R>>>,
    on_return: RefCell<Option<Hook>>,
}

impl<A: 'static, R: Reply + 'static> InEvent<A, R> {
    /// Declare `name` on `port`.
    #[must_use]
    pub fn new(locator: &Locator, port: PortId, name: &str) -> Self {
        let id = locator.runtime().declare_event(port, name, Direction::In);
        Self {
            locator: locator.clone(),
            port,
            id,
            name: name.to_string(),
            strict: Cell::new(false),
            body: RefCell::new(None),
            on_return: RefCell::new(None),
        }
    }

    /// Install the provider's body and route calls through the kernel.
    pub fn bind<F, Fut>(&self, body: F)
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        *self.body.borrow_mut() = Some(Rc::new(move |args| body(args).boxed_local()));
        self.strict.set(true);
        self.locator.runtime().mark_bound(self.id);
    }

    /// Run after every reply, once the kernel has finished with the call.
    pub fn on_return<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        *self.on_return.borrow_mut() = Some(Rc::new(move || hook().boxed_local()));
    }

    /// Bypass the kernel: calls go straight to the body, untraced and unchecked.
    pub fn set_strict(&self, strict: bool) {
        self.strict.set(strict);
    }

    /// Whether a body is installed.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.body.borrow().is_some()
    }

    /// Port this event belongs to.
    #[must_use]
    pub fn port(&self) -> PortId {
        self.port
    }

    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the event and wait for its reply.
    pub async fn call(&self, args: A) -> R {
        let body = self.body.borrow().clone();
        let Some(body) = body else {
            self.locator.runtime().fatal(&self.locator, self.unbound())
        };
        if !self.strict.get() {
            return body(args).await;
        }
        let runtime = Rc::clone(self.locator.runtime());
        let entry = runtime.enter_in(&self.locator, self.port, &self.name).await;
        let reply = body(args).await;
        runtime.leave_in(&self.locator, entry, &reply.label()).await;
        let hook = self.on_return.borrow().clone();
        if let Some(hook) = hook {
            hook().await;
        }
        reply
    }

    fn unbound(&self) -> IllegalTransition {
        IllegalTransition {
            location: self.locator.runtime().labels(self.port).provide,
            state: "unbound".to_string(),
            label: self.name.clone(),
        }
    }
}

impl<A, R> fmt::Debug for InEvent<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InEvent")
            .field("port", &self.port)
            .field("name", &self.name)
            .field("strict", &self.strict.get())
            .finish_non_exhaustive()
    }
}

/// Event emitted by the provider and queued at the requirer.
pub struct OutEvent<A> {
    locator: Locator,
    port: PortId,
    id: EventId,
    name: String,
    strict: Cell<bool>,
    handler: RefCell<Option<Body<A, ()>>>,
}

impl<A: 'static> OutEvent<A> {
    /// Declare `name` on `port`.
    #[must_use]
    pub fn new(locator: &Locator, port: PortId, name: &str) -> Self {
        let id = locator.runtime().declare_event(port, name, Direction::Out);
        Self {
            locator: locator.clone(),
            port,
            id,
            name: name.to_string(),
            strict: Cell::new(false),
            handler: RefCell::new(None),
        }
    }

    /// Install the requirer's handler.
    pub fn bind<F, Fut>(&self, handler: F)
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        *self.handler.borrow_mut() = Some(Rc::new(move |args| handler(args).boxed_local()));
        self.strict.set(true);
        self.locator.runtime().mark_bound(self.id);
    }

    /// Bypass the kernel: emission calls the handler directly.
    pub fn set_strict(&self, strict: bool) {
        self.strict.set(strict);
    }

    /// Whether a handler is installed.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handler.borrow().is_some()
    }

    /// Port this event belongs to.
    #[must_use]
    pub fn port(&self) -> PortId {
        self.port
    }

    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit the event.
    ///
    /// Returns once the event is queued, or delivered if the kernel
    /// decided to flush the requirer right away.
    pub async fn fire(&self, args: A) {
        let handler = self.handler.borrow().clone();
        let Some(handler) = handler else {
            self.locator.runtime().fatal(
                &self.locator,
                IllegalTransition {
                    location: self.locator.runtime().labels(self.port).require,
                    state: "unbound".to_string(),
                    label: self.name.clone(),
                },
            )
        };
        if !self.strict.get() {
            handler(args).await;
            return;
        }
        let deliver: Deliver = Box::new(move || handler(args));
        let runtime = Rc::clone(self.locator.runtime());
        runtime.fire_out(&self.locator, self.port, &self.name, deliver).await;
    }
}

impl<A> fmt::Debug for OutEvent<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutEvent")
            .field("port", &self.port)
            .field("name", &self.name)
            .field("strict", &self.strict.get())
            .finish_non_exhaustive()
    }
}
