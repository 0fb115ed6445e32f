//! Native frame queues.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use rsbridge_sys::kind;

use crate::error::{Error, Result};
use crate::frame::{Frame, Transfer};
use crate::handle::Owned;
use crate::host::Host;
use crate::resource::Resource;

/// A native queue shared between its [`FrameQueue`] and whatever the SDK is filling it from.
pub(crate) type QueueHandle = Rc<Resource<kind::FrameQueue>>;

/// A bounded queue of frames, filled by sensors or processing blocks and drained by the host.
///
/// When full, the oldest frame is released to make room. A sensor streaming into the queue, or a
/// processing block writing to it, keeps the native queue alive until it stops, even after
/// [`destroy`](FrameQueue::destroy).
pub struct FrameQueue {
    host: Host,
    handle: RefCell<Option<QueueHandle>>,
    capacity: usize,
}

impl FrameQueue {
    /// Creates a queue holding at most `capacity` frames.
    pub fn new(host: &Host, capacity: usize) -> Self {
        let requested = i32::try_from(capacity).unwrap_or(i32::MAX);
        let resource = Resource::create(host, |sdk, error| {
            sdk.create_frame_queue(requested, error)
        });
        Self {
            host: host.clone(),
            handle: RefCell::new(Some(Rc::new(resource))),
            capacity,
        }
    }

    /// Shares the native queue with a producer, which keeps it alive for as long as it holds on.
    pub(crate) fn attach(&self) -> Result<QueueHandle> {
        self.handle
            .borrow()
            .as_ref()
            .filter(|handle| !handle.is_empty())
            .cloned()
            .ok_or(Error::Destroyed)
    }

    /// The shared handle, cloned so no borrow is held across a native call.
    fn resource(&self) -> Option<QueueHandle> {
        self.handle.borrow().clone()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits up to `timeout` for a frame. Expiry gives `None` without recording an error.
    pub fn wait_for_frame(&self, timeout: Duration) -> Option<Frame> {
        let owned = self.wait(timeout)?;
        Some(Frame::from_owned(&self.host, owned))
    }

    /// Like [`wait_for_frame`](Self::wait_for_frame), but installs the frame into `frame`.
    ///
    /// Returns whether a frame arrived; `frame` is left alone otherwise.
    pub fn wait_for_frame_into(&self, frame: &Frame, timeout: Duration) -> bool {
        match self.wait(timeout) {
            Some(owned) => {
                frame.replace(Some(owned));
                true
            }
            None => false,
        }
    }

    /// Takes a frame if one is queued, without waiting.
    pub fn poll_for_frame(&self) -> Option<Frame> {
        let raw = self
            .resource()?
            .query(|sdk, raw, error| sdk.poll_for_frame(raw, error))
            .flatten()?;
        // SAFETY: the SDK hands the dequeued reference to the caller.
        let owned = unsafe { Owned::from_raw(self.host.api(), raw) };
        Some(Frame::from_owned(&self.host, owned))
    }

    /// Puts `frame` into the queue.
    pub fn enqueue(&self, frame: &Frame, transfer: Transfer) -> Result<()> {
        let queue = self.attach()?;
        let owned = frame.hand_off(transfer)?;
        if let Some(raw) = queue.raw() {
            self.host.api().sdk().enqueue_frame(owned.take(), raw);
        }
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> Option<Owned<kind::Frame>> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let raw = self
            .resource()?
            .query(|sdk, raw, error| sdk.try_wait_for_frame(raw, timeout_ms, error))
            .flatten()?;
        // SAFETY: the SDK hands the dequeued reference to the caller.
        Some(unsafe { Owned::from_raw(self.host.api(), raw) })
    }

    /// Lets go of the queue. The native queue and the frames still in it are released once no
    /// sensor or processing block is writing to it.
    pub fn destroy(&self) {
        let handle = self.handle.take();
        drop(handle);
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.handle.borrow().as_ref().map_or(true, |handle| handle.is_empty())
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("handle", &self.handle.borrow())
            .field("capacity", &self.capacity)
            .finish()
    }
}
