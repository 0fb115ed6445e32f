//! Host callables, and handles for calling them from SDK threads.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::{debug, warn};

use crate::bridge::{Notifier, PendingEvent, SubmitError};
use crate::host::{Host, Registered, TargetId};

/// A host closure that may be invoked from an event.
pub(crate) struct HostCallback<A> {
    function: RefCell<Box<dyn FnMut(A)>>,
}

impl<A: 'static> HostCallback<A> {
    pub(crate) fn new(function: impl FnMut(A) + 'static) -> Rc<Self> {
        Rc::new(Self {
            function: RefCell::new(Box::new(function)),
        })
    }

    /// Calls the closure. A call made from inside the closure itself is dropped.
    pub(crate) fn invoke(&self, argument: A) {
        match self.function.try_borrow_mut() {
            Ok(mut function) => function(argument),
            Err(_) => warn!("host callback invoked from inside itself, dropping the call"),
        }
    }
}

/// A closure owned by the consumer thread.
///
/// [`thread_safe`](HostFunction::thread_safe) hands out a `Send` handle that marshals calls back
/// to this thread. Dropping the `HostFunction` turns later calls through those handles into
/// no-ops.
pub struct HostFunction<T: 'static> {
    callback: Rc<HostCallback<T>>,
    registration: Registered<HostCallback<T>>,
}

impl<T: Send + 'static> HostFunction<T> {
    pub fn new(host: &Host, function: impl FnMut(T) + 'static) -> Self {
        let callback = HostCallback::new(function);
        let registration = host.register(&callback);
        Self {
            callback,
            registration,
        }
    }

    /// Calls the closure right here, on the consumer thread.
    #[inline]
    pub fn call(&self, value: T) {
        self.callback.invoke(value);
    }

    pub fn thread_safe(&self) -> ThreadSafeFunction<T> {
        ThreadSafeFunction {
            target: self.registration.id(),
            notifier: self.registration.host().notifier(),
        }
    }
}

impl<T: 'static> fmt::Debug for HostFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("target", &self.registration.id())
            .finish_non_exhaustive()
    }
}

/// A handle to a [`HostFunction`] that can be called from any thread.
pub struct ThreadSafeFunction<T> {
    target: TargetId<HostCallback<T>>,
    notifier: Notifier,
}

impl<T> Clone for ThreadSafeFunction<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            notifier: self.notifier.clone(),
        }
    }
}

impl<T: Send + 'static> ThreadSafeFunction<T> {
    /// Queues a call for the consumer thread. `value` is dropped if the call is refused.
    pub fn call(&self, value: T) -> Result<(), SubmitError> {
        self.notifier.notify_main_thread(Box::new(Call {
            target: self.target,
            value,
        }))
    }
}

impl<T> fmt::Debug for ThreadSafeFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeFunction")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

struct Call<T> {
    target: TargetId<HostCallback<T>>,
    value: T,
}

impl<T: Send + 'static> PendingEvent for Call<T> {
    fn run(self: Box<Self>, host: &Host) {
        match host.resolve(self.target) {
            Some(callback) => callback.invoke(self.value),
            None => debug!("{:?} is gone, dropping the call", self.target),
        }
    }
}
