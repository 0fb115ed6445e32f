//! The consumer thread.
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, warn};
use rsbridge_sys::{self as ffi, ErrorOut};

use crate::api::Api;
use crate::bridge::{Bridge, BridgeStats, Envelope, Notifier};
use crate::config::{HostConfig, HostFlags};
use crate::error::{ErrorChannel, ErrorSlot, NativeError};
use crate::handle::Owned;

mod registry;
pub use self::registry::TargetId;
use self::registry::Registry;


/// The single thread allowed to run host callbacks and make native calls.
///
/// A `Host` is neither `Send` nor `Sync`, and neither is anything holding one, so every host
/// object stays on the thread that created its host. Clones share the same state.
#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

struct HostInner {
    api: Api,
    config: HostConfig,
    errors: ErrorChannel,
    bridge: Bridge,
    registry: RefCell<Registry>,
    dispatching: Cell<bool>,
}

impl Drop for HostInner {
    fn drop(&mut self) {
        self.bridge.teardown();
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Creates a host on the current thread with the default configuration.
    pub fn new(sdk: impl ffi::Sdk) -> Self {
        Self::with_config(Api::new(sdk), HostConfig::default())
    }

    pub fn with_config(api: Api, config: HostConfig) -> Self {
        Self {
            inner: Rc::new(HostInner {
                errors: ErrorChannel::new(config.flags.contains(HostFlags::LOG_NATIVE_ERRORS)),
                bridge: Bridge::new(config.backpressure),
                registry: RefCell::new(Registry::default()),
                dispatching: Cell::new(false),
                api,
                config,
            }),
        }
    }

    #[inline]
    pub fn api(&self) -> &Api {
        &self.inner.api
    }

    #[inline]
    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// The error of the last native call, if it failed.
    pub fn error(&self) -> Option<NativeError> {
        self.inner.errors.current()
    }

    /// Registers a callback fired, on this thread, for every native error.
    pub fn set_error_callback(&self, callback: impl Fn(&NativeError) + 'static) {
        self.inner.errors.set_callback(Rc::new(callback));
    }

    pub fn clear_error_callback(&self) {
        self.inner.errors.clear_callback();
    }

    /// Runs a native call with error analysis.
    ///
    /// The last error is reset before the call. If the call produced an error token, it is kept in
    /// `slot` (freeing the one before) or freed right away when there is no slot, and the error is
    /// recorded and reported to the error callback.
    pub(crate) fn native_result<R>(
        &self,
        slot: Option<&ErrorSlot>,
        f: impl FnOnce(&dyn ffi::Sdk, ErrorOut<'_>) -> R,
    ) -> Result<R, NativeError> {
        self.inner.errors.reset();
        if let Some(slot) = slot {
            slot.clear();
        }

        let api = &self.inner.api;
        let mut token = None;
        let value = f(api.sdk(), &mut token);
        let Some(token) = token else {
            return Ok(value);
        };

        // SAFETY: the SDK hands ownership of error tokens to the caller.
        let owned = unsafe { Owned::from_raw(api, token) };
        match slot {
            Some(slot) => {
                slot.store(owned);
                Err(self.inner.errors.analyze(api.sdk(), token))
            }
            None => {
                let error = self.inner.errors.analyze(api.sdk(), token);
                drop(owned);
                Err(error)
            }
        }
    }

    /// [`native_result`](Self::native_result) for calls that return nothing.
    #[inline]
    pub(crate) fn native_call(
        &self,
        slot: Option<&ErrorSlot>,
        f: impl FnOnce(&dyn ffi::Sdk, ErrorOut<'_>),
    ) -> Result<(), NativeError> {
        self.native_result(slot, f)
    }

    /// Returns a notifier for the event relay, creating the relay on first use.
    pub fn notifier(&self) -> Notifier {
        self.inner.bridge.notifier()
    }

    pub(crate) fn register<T: 'static>(&self, target: &Rc<T>) -> Registered<T> {
        let id = self.inner.registry.borrow_mut().insert(target);
        Registered {
            host: self.clone(),
            id,
        }
    }

    pub(crate) fn resolve<T: 'static>(&self, id: TargetId<T>) -> Option<Rc<T>> {
        self.inner.registry.borrow().resolve(id)
    }

    /// Number of callback targets currently registered.
    pub fn registered_targets(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Delivers the events that were queued when the call started. Never blocks.
    ///
    /// Returns how many were delivered. Calling this from inside a host callback does nothing.
    pub fn dispatch(&self) -> usize {
        let Some(receiver) = self.inner.bridge.receiver() else {
            return 0;
        };
        let Some(_guard) = DispatchGuard::enter(&self.inner.dispatching) else {
            warn!("dispatch called from inside a host callback");
            return 0;
        };

        let budget = receiver.len();
        self.drain(&receiver, budget)
    }

    /// Waits up to `timeout` for an event, then delivers it along with whatever else was queued.
    ///
    /// Returns how many were delivered, zero if the timeout expired.
    pub fn dispatch_timeout(&self, timeout: Duration) -> usize {
        self.inner.bridge.notifier();
        let Some(receiver) = self.inner.bridge.receiver() else {
            return 0;
        };
        let Some(_guard) = DispatchGuard::enter(&self.inner.dispatching) else {
            warn!("dispatch called from inside a host callback");
            return 0;
        };

        let Ok(first) = receiver.recv_timeout(timeout) else {
            return 0;
        };
        let budget = receiver.len();
        self.deliver(first);
        1 + self.drain(&receiver, budget)
    }

    fn drain(&self, receiver: &crossbeam_channel::Receiver<Envelope>, budget: usize) -> usize {
        let mut delivered = 0;
        while delivered < budget && self.inner.bridge.is_open() {
            let Ok(envelope) = receiver.try_recv() else {
                break;
            };
            self.deliver(envelope);
            delivered += 1;
        }
        delivered
    }

    fn deliver(&self, envelope: Envelope) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| envelope.run(self)));
        if let Err(payload) = outcome {
            let message = panic_message(&*payload);
            if self
                .inner
                .config
                .flags
                .contains(HostFlags::ABORT_ON_CALLBACK_PANIC)
            {
                error!("host callback panicked: {message}, aborting");
                process::abort();
            }
            error!("host callback panicked: {message}");
        }
    }

    /// Number of events waiting for [`dispatch`](Self::dispatch).
    pub fn pending(&self) -> usize {
        self.inner.bridge.pending()
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.inner.bridge.stats()
    }

    /// Tears down the event relay, releasing every undelivered event.
    ///
    /// Later submissions are refused and released. Returns how many queued events were released.
    pub fn shutdown(&self) -> usize {
        let released = self.inner.bridge.teardown();
        debug!("host shut down");
        released
    }
}

/// Keeps a callback target registered for as long as it lives.
pub(crate) struct Registered<T: 'static> {
    host: Host,
    id: TargetId<T>,
}

impl<T: 'static> Registered<T> {
    #[inline]
    pub(crate) fn id(&self) -> TargetId<T> {
        self.id
    }

    #[inline]
    pub(crate) fn host(&self) -> &Host {
        &self.host
    }
}

impl<T: 'static> Drop for Registered<T> {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.host.inner.registry.try_borrow_mut() {
            registry.remove(self.id.id());
        }
    }
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl<'a> DispatchGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
