//! Callback objects registered with the SDK.
//!
//! Producers run on SDK threads. They never call host code directly: they copy what they need
//! out of the native arguments, take ownership of any handles, and submit an event to the relay.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use rsbridge_sys::{self as ffi, kind, RawDeviceList, RawFrame, RawFrameQueue, RawNotification};

use crate::api::Api;
use crate::bridge::{Notifier, PendingEvent};
use crate::context::DevicesChanged;
use crate::device::DeviceList;
use crate::frame::Frame;
use crate::function::{HostCallback, ThreadSafeFunction};
use crate::handle::Owned;
use crate::host::{Host, TargetId};
use crate::notification::Notification;

/// Where a producer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerState {
    /// Registered with the SDK and idle.
    Registered,
    /// Running on an SDK thread.
    Firing,
    /// Dropped by the SDK. It will not fire again.
    Released,
}

/// Producer state shared between the SDK-owned producer and the host object that registered it.
pub(crate) struct ProducerStatus {
    name: &'static str,
    firing: AtomicUsize,
    released: AtomicBool,
}

impl ProducerStatus {
    pub(crate) fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            firing: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    pub(crate) fn state(&self) -> ProducerState {
        if self.released.load(Ordering::Acquire) {
            ProducerState::Released
        } else if self.firing.load(Ordering::Acquire) > 0 {
            ProducerState::Firing
        } else {
            ProducerState::Registered
        }
    }

    fn enter(&self) -> Firing<'_> {
        self.firing.fetch_add(1, Ordering::AcqRel);
        Firing(self)
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
        debug!("{} producer released", self.name);
    }
}

impl fmt::Debug for ProducerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerStatus")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

struct Firing<'a>(&'a ProducerStatus);

impl Drop for Firing<'_> {
    fn drop(&mut self) {
        self.0.firing.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Forwards hotplug events as owned device lists.
pub(crate) struct DevicesChangedProducer {
    pub(crate) api: Api,
    pub(crate) notifier: Notifier,
    pub(crate) target: TargetId<HostCallback<DevicesChanged>>,
    pub(crate) status: Arc<ProducerStatus>,
}

impl ffi::DevicesChangedCallback for DevicesChangedProducer {
    fn on_devices_changed(&self, removed: Option<RawDeviceList>, added: Option<RawDeviceList>) {
        let _firing = self.status.enter();
        // SAFETY: the SDK hands ownership of both lists to the callback.
        let event = DevicesChangedEvent {
            target: self.target,
            removed: removed.map(|raw| unsafe { Owned::from_raw(&self.api, raw) }),
            added: added.map(|raw| unsafe { Owned::from_raw(&self.api, raw) }),
        };
        let _ = self.notifier.notify_main_thread(Box::new(event));
    }
}

impl Drop for DevicesChangedProducer {
    fn drop(&mut self) {
        self.status.release();
    }
}

struct DevicesChangedEvent {
    target: TargetId<HostCallback<DevicesChanged>>,
    removed: Option<Owned<kind::DeviceList>>,
    added: Option<Owned<kind::DeviceList>>,
}

impl PendingEvent for DevicesChangedEvent {
    fn run(self: Box<Self>, host: &Host) {
        let Some(callback) = host.resolve(self.target) else {
            debug!("devices-changed callback is gone, releasing the lists");
            return;
        };
        let this = *self;
        callback.invoke(DevicesChanged {
            removed: DeviceList::from_owned(host, this.removed),
            added: DeviceList::from_owned(host, this.added),
        });
    }
}

/// The host end of a frame stream: one stable frame and the callback it is handed to.
pub(crate) struct FrameSink {
    slot: Rc<Frame>,
    callback: RefCell<Box<dyn FnMut(&Rc<Frame>)>>,
}

impl FrameSink {
    pub(crate) fn new(host: &Host, callback: impl FnMut(&Rc<Frame>) + 'static) -> Rc<Self> {
        Rc::new(Self {
            slot: Rc::new(Frame::new(host)),
            callback: RefCell::new(Box::new(callback)),
        })
    }

    pub(crate) fn slot(&self) -> &Rc<Frame> {
        &self.slot
    }

    fn deliver(&self, frame: Owned<kind::Frame>) {
        self.slot.replace(Some(frame));
        match self.callback.try_borrow_mut() {
            Ok(mut callback) => callback(&self.slot),
            Err(_) => warn!("frame callback invoked from inside itself, dropping the frame"),
        }
    }
}

/// Forwards every frame to a [`FrameSink`].
pub(crate) struct FrameProducer {
    pub(crate) api: Api,
    pub(crate) notifier: Notifier,
    pub(crate) target: TargetId<FrameSink>,
    pub(crate) status: Arc<ProducerStatus>,
}

impl ffi::FrameCallback for FrameProducer {
    fn on_frame(&self, frame: RawFrame) {
        let _firing = self.status.enter();
        // SAFETY: the SDK hands one frame reference to the callback.
        let frame = unsafe { Owned::from_raw(&self.api, frame) };
        let _ = self.notifier.notify_main_thread(Box::new(FrameArrived {
            target: self.target,
            frame,
        }));
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.status.release();
    }
}

struct FrameArrived {
    target: TargetId<FrameSink>,
    frame: Owned<kind::Frame>,
}

impl PendingEvent for FrameArrived {
    fn run(self: Box<Self>, host: &Host) {
        match host.resolve(self.target) {
            Some(sink) => sink.deliver(self.frame),
            None => debug!("frame sink is gone, releasing the frame"),
        }
    }
}

/// Puts every frame straight into a native frame queue, without a trip to the consumer thread.
///
/// `queue` is valid for as long as the producer lives: the sensor holds the shared queue handle
/// until the SDK has stopped streaming and dropped the producer.
pub(crate) struct FrameQueueProducer {
    pub(crate) api: Api,
    pub(crate) queue: RawFrameQueue,
    pub(crate) status: Arc<ProducerStatus>,
}

impl ffi::FrameCallback for FrameQueueProducer {
    fn on_frame(&self, frame: RawFrame) {
        let _firing = self.status.enter();
        // SAFETY: the SDK hands one frame reference to the callback.
        let frame = unsafe { Owned::from_raw(&self.api, frame) };
        self.api.sdk().enqueue_frame(frame.take(), self.queue);
    }
}

impl Drop for FrameQueueProducer {
    fn drop(&mut self) {
        self.status.release();
    }
}

/// Reads each notification on the SDK thread and calls a host function with the copy.
pub(crate) struct NotificationProducer {
    pub(crate) api: Api,
    pub(crate) function: ThreadSafeFunction<Notification>,
    pub(crate) status: Arc<ProducerStatus>,
}

impl ffi::NotificationsCallback for NotificationProducer {
    fn on_notification(&self, notification: RawNotification) {
        let _firing = self.status.enter();
        let notification = Notification::read(&self.api, notification);
        let _ = self.function.call(notification);
    }
}

impl Drop for NotificationProducer {
    fn drop(&mut self) {
        self.status.release();
    }
}
