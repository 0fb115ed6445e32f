//! Sensors and streaming.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use rsbridge_sys::{kind, CameraInfo, RawStreamProfile};

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::frame_queue::{FrameQueue, QueueHandle};
use crate::function::HostFunction;
use crate::handle::Owned;
use crate::host::{Host, Registered};
use crate::notification::Notification;
use crate::producer::{
    FrameProducer, FrameQueueProducer, FrameSink, NotificationProducer, ProducerState,
    ProducerStatus,
};
use crate::resource::Resource;
use crate::stream_profile::StreamProfile;


/// The host end of a stream, kept until the SDK has stopped it.
enum Stream {
    Callback {
        sink: Rc<FrameSink>,
        _registration: Registered<FrameSink>,
    },
    /// The SDK writes into this queue until the sensor stops.
    Queue(QueueHandle),
}

/// One sensor of a device, such as the stereo module or the RGB camera.
pub struct Sensor {
    resource: Resource<kind::Sensor>,
    stream: RefCell<Option<Stream>>,
    streaming: Cell<bool>,
    frames: RefCell<Option<Arc<ProducerStatus>>>,
    notifications: RefCell<Option<HostFunction<Notification>>>,
    notification_status: RefCell<Option<Arc<ProducerStatus>>>,
}

impl Sensor {
    pub(crate) fn from_owned(host: &Host, sensor: Owned<kind::Sensor>) -> Self {
        Self {
            resource: Resource::new(host, Some(sensor)),
            stream: RefCell::new(None),
            streaming: Cell::new(false),
            frames: RefCell::new(None),
            notifications: RefCell::new(None),
            notification_status: RefCell::new(None),
        }
    }

    /// Releases the sensor, stopping it first if it is streaming.
    pub fn destroy(&self) {
        if self.streaming.get() {
            let _ = self.stop();
        }
        self.resource.destroy();
        self.stream.replace(None);
        self.streaming.set(false);
        self.notifications.replace(None);
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }

    pub fn camera_info(&self, info: CameraInfo) -> Result<String> {
        self.resource
            .fetch(|sdk, raw, error| sdk.sensor_info(raw, info, error))?
            .ok_or(Error::Unavailable("camera info"))
    }

    pub fn supports_camera_info(&self, info: CameraInfo) -> Result<bool> {
        self.resource
            .fetch(|sdk, raw, error| sdk.supports_sensor_info(raw, info, error))
    }

    /// Every profile the sensor can be opened with.
    pub fn stream_profiles(&self) -> Option<Vec<StreamProfile>> {
        let host = self.resource.host();
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.stream_profiles(raw, error))
            .flatten()?;
        // SAFETY: the SDK returns a new profile list owned by the caller.
        let list = unsafe { Owned::from_raw(host.api(), raw) };
        StreamProfile::read_list(&self.resource, list)
    }

    pub fn open(&self, profile: &StreamProfile) -> Result<()> {
        self.open_multiple(&[profile])
    }

    pub fn open_multiple(&self, profiles: &[&StreamProfile]) -> Result<()> {
        let raws = profiles
            .iter()
            .map(|profile| profile.raw().ok_or(Error::Destroyed))
            .collect::<Result<Vec<RawStreamProfile>>>()?;
        self.resource
            .fetch(|sdk, raw, error| sdk.open(raw, &raws, error))
    }

    /// Starts streaming into `callback`.
    ///
    /// Frames are delivered on the consumer thread by [`Host::dispatch`], always through the same
    /// [`Frame`], whose content is replaced for every new frame. Keep a frame past the callback
    /// with [`Frame::share`].
    pub fn start_with_callback(&self, callback: impl FnMut(&Rc<Frame>) + 'static) -> Result<()> {
        let host = self.resource.host();
        let sink = FrameSink::new(host, callback);
        let registration = host.register(&sink);
        let status = ProducerStatus::new("frame");
        let producer = FrameProducer {
            api: host.api().clone(),
            notifier: host.notifier(),
            target: registration.id(),
            status: status.clone(),
        };

        self.resource
            .fetch(|sdk, raw, error| sdk.start(raw, Box::new(producer), error))?;
        self.stream.replace(Some(Stream::Callback {
            sink,
            _registration: registration,
        }));
        self.started(status);
        Ok(())
    }

    /// Starts streaming straight into `queue`, without involving the consumer thread.
    ///
    /// The native queue stays alive until the sensor stops, even if `queue` is destroyed first.
    pub fn start_with_queue(&self, queue: &FrameQueue) -> Result<()> {
        let host = self.resource.host();
        let handle = queue.attach()?;
        let status = ProducerStatus::new("frame queue");
        let producer = FrameQueueProducer {
            api: host.api().clone(),
            queue: handle.raw().ok_or(Error::Destroyed)?,
            status: status.clone(),
        };

        self.resource
            .fetch(|sdk, raw, error| sdk.start(raw, Box::new(producer), error))?;
        self.stream.replace(Some(Stream::Queue(handle)));
        self.started(status);
        Ok(())
    }

    fn started(&self, status: Arc<ProducerStatus>) {
        self.frames.replace(Some(status));
        self.streaming.set(true);
    }

    /// Stops streaming. Frames still queued for the callback are released undelivered, and a
    /// frame queue destroyed while streaming is released now.
    pub fn stop(&self) -> Result<()> {
        self.resource.fetch(|sdk, raw, error| sdk.stop(raw, error))?;
        self.streaming.set(false);
        self.stream.replace(None);
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.resource.fetch(|sdk, raw, error| sdk.close(raw, error))
    }

    /// Registers `callback` for the sensor's notifications, replacing any previous one.
    pub fn on_notification(&self, callback: impl FnMut(Notification) + 'static) -> Result<()> {
        let host = self.resource.host();
        let function = HostFunction::new(host, callback);
        let status = ProducerStatus::new("notification");
        let producer = NotificationProducer {
            api: host.api().clone(),
            function: function.thread_safe(),
            status: status.clone(),
        };

        self.resource.fetch(|sdk, raw, error| {
            sdk.set_notifications_callback(raw, Box::new(producer), error)
        })?;
        self.notifications.replace(Some(function));
        self.notification_status.replace(Some(status));
        Ok(())
    }

    /// The stable frame handed to the streaming callback, while streaming into one.
    pub fn frame_slot(&self) -> Option<Rc<Frame>> {
        match self.stream.borrow().as_ref()? {
            Stream::Callback { sink, .. } => Some(sink.slot().clone()),
            Stream::Queue(_) => None,
        }
    }

    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.streaming.get()
    }

    /// State of the producer of the last stream started, if any.
    pub fn frame_producer_state(&self) -> Option<ProducerState> {
        self.frames.borrow().as_ref().map(|status| status.state())
    }

    /// State of the producer delivering notifications, if one was registered.
    pub fn notification_producer_state(&self) -> Option<ProducerState> {
        self.notification_status
            .borrow()
            .as_ref()
            .map(|status| status.state())
    }

    #[inline]
    pub fn host(&self) -> &Host {
        self.resource.host()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("handle", &self.resource)
            .field("streaming", &self.streaming.get())
            .finish()
    }
}
