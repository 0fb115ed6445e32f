//! The SDK context: device enumeration and hotplug.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use rsbridge_sys::kind;

use crate::device::DeviceList;
use crate::error::Result;
use crate::function::HostCallback;
use crate::handle::Owned;
use crate::host::{Host, Registered};
use crate::producer::{DevicesChangedProducer, ProducerState, ProducerStatus};
use crate::resource::Resource;


/// A hotplug event. Both lists belong to the callback that receives them.
#[derive(Debug)]
pub struct DevicesChanged {
    pub removed: DeviceList,
    pub added: DeviceList,
}

struct Subscription {
    _callback: Rc<HostCallback<DevicesChanged>>,
    _registration: Registered<HostCallback<DevicesChanged>>,
}

/// Entry point to the SDK.
pub struct Context {
    resource: Resource<kind::Context>,
    devices_changed: RefCell<Option<Subscription>>,
    producer: RefCell<Option<Arc<ProducerStatus>>>,
}

impl Context {
    /// Creates a context for the API version in the host's configuration.
    ///
    /// If the SDK refuses, the context is created empty: every call on it fails with
    /// [`Error::Destroyed`](crate::Error::Destroyed) and [`Host::error`] says why.
    pub fn new(host: &Host) -> Self {
        let api_version = host.config().api_version;
        Self {
            resource: Resource::create(host, |sdk, error| {
                sdk.create_context(api_version, error)
            }),
            devices_changed: RefCell::new(None),
            producer: RefCell::new(None),
        }
    }

    /// The devices connected right now.
    pub fn query_devices(&self) -> Option<DeviceList> {
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.query_devices(raw, error))
            .flatten()?;
        // SAFETY: the SDK returns a new device list owned by the caller.
        let list = unsafe { Owned::from_raw(self.resource.host().api(), raw) };
        Some(DeviceList::from_owned(self.resource.host(), Some(list)))
    }

    /// Registers `callback` for hotplug events, replacing any previous one.
    ///
    /// Events are delivered by [`Host::dispatch`].
    pub fn on_devices_changed(
        &self,
        callback: impl FnMut(DevicesChanged) + 'static,
    ) -> Result<()> {
        let host = self.resource.host();
        let callback = HostCallback::new(callback);
        let registration = host.register(&callback);
        let status = ProducerStatus::new("devices-changed");
        let producer = DevicesChangedProducer {
            api: host.api().clone(),
            notifier: host.notifier(),
            target: registration.id(),
            status: status.clone(),
        };

        self.resource.fetch(|sdk, raw, error| {
            sdk.set_devices_changed_callback(raw, Box::new(producer), error)
        })?;
        self.devices_changed.replace(Some(Subscription {
            _callback: callback,
            _registration: registration,
        }));
        self.producer.replace(Some(status));
        Ok(())
    }

    /// State of the hotplug producer, if a callback was registered.
    pub fn devices_changed_state(&self) -> Option<ProducerState> {
        self.producer.borrow().as_ref().map(|status| status.state())
    }

    /// Releases the context. Hotplug events still queued find no callback and are released.
    pub fn destroy(&self) {
        self.resource.destroy();
        self.devices_changed.replace(None);
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }

    #[inline]
    pub fn host(&self) -> &Host {
        self.resource.host()
    }

    pub(crate) fn raw(&self) -> Option<rsbridge_sys::RawContext> {
        self.resource.raw()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.resource).finish()
    }
}
