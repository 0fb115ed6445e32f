//! Frame sets: one frame per stream, captured together.
use std::cell::Cell;
use std::fmt;

use log::debug;
use rsbridge_sys::{self as ffi, kind, Stream, StreamProfileData};

use crate::frame::Frame;
use crate::handle::Owned;
use crate::host::Host;
use crate::resource::Resource;

/// A slot for a composite frame, as handed out by a [`Pipeline`](crate::pipeline::Pipeline).
///
/// Like [`Frame`], a `FrameSet` is a stable object whose content is swapped on every wait.
pub struct FrameSet {
    resource: Resource<kind::Frame>,
    size: Cell<usize>,
}

impl FrameSet {
    /// Creates an empty frame set.
    pub fn new(host: &Host) -> Self {
        Self {
            resource: Resource::new(host, None),
            size: Cell::new(0),
        }
    }

    pub(crate) fn from_owned(host: &Host, frame: Owned<kind::Frame>) -> Self {
        let this = Self::new(host);
        this.replace(Some(frame));
        this
    }

    /// Releases the current set, if any, and installs `frame` in its place.
    ///
    /// A frame that is not a frame set is released and leaves this set empty.
    pub fn replace(&self, frame: Option<Owned<kind::Frame>>) {
        self.resource.destroy();
        self.size.set(0);
        let Some(frame) = frame else {
            return;
        };

        let raw = frame.borrow();
        let composite = self.resource.native(|sdk, error| {
            sdk.is_frame_extendable_to(raw, ffi::Extension::CompositeFrame, error)
        });
        if composite != Ok(true) {
            debug!("{raw:?} is not a frame set, releasing it");
            return;
        }
        let Ok(count) = self
            .resource
            .native(|sdk, error| sdk.embedded_frames_count(raw, error))
        else {
            return;
        };
        self.resource.replace(Some(frame));
        self.size.set(count.max(0) as usize);
    }

    /// Releases the set. Safe to call any number of times.
    pub fn destroy(&self) {
        self.replace(None);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resource.is_empty()
    }

    /// Number of frames in the set, zero when empty.
    #[inline]
    pub fn size(&self) -> usize {
        self.size.get()
    }

    #[inline]
    pub fn host(&self) -> &Host {
        self.resource.host()
    }

    /// The frame of `stream`. A `stream_index` of zero matches any index of that stream, and
    /// [`Stream::Any`] gives the first frame.
    pub fn frame(&self, stream: Stream, stream_index: i32) -> Option<Frame> {
        let frame = self.find(stream, stream_index)?;
        Some(Frame::from_owned(self.host(), frame))
    }

    /// Like [`frame`](Self::frame), but installs the frame into `target`.
    ///
    /// Returns whether a frame was found; `target` is left alone otherwise.
    pub fn replace_frame(&self, stream: Stream, stream_index: i32, target: &Frame) -> bool {
        match self.find(stream, stream_index) {
            Some(frame) => {
                target.replace(Some(frame));
                true
            }
            None => false,
        }
    }

    /// The stream of the frame at `index`.
    pub fn index_to_stream(&self, index: usize) -> Option<Stream> {
        let frame = self.extract(index)?;
        Some(self.profile_of(&frame)?.stream)
    }

    /// The stream index of the frame at `index`.
    pub fn index_to_stream_index(&self, index: usize) -> Option<i32> {
        let frame = self.extract(index)?;
        Some(self.profile_of(&frame)?.index)
    }

    fn find(&self, stream: Stream, stream_index: i32) -> Option<Owned<kind::Frame>> {
        if stream == Stream::Any {
            return self.extract(0);
        }
        (0..self.size()).find_map(|index| {
            let frame = self.extract(index)?;
            let profile = self.profile_of(&frame)?;
            let matches =
                profile.stream == stream && (stream_index == 0 || profile.index == stream_index);
            // Frames that do not match are released here.
            matches.then_some(frame)
        })
    }

    /// A new reference to the frame at `index`.
    fn extract(&self, index: usize) -> Option<Owned<kind::Frame>> {
        if index >= self.size() {
            return None;
        }
        let index = i32::try_from(index).ok()?;
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.extract_frame(raw, index, error))
            .flatten()?;
        // SAFETY: the SDK returns a new frame reference owned by the caller.
        Some(unsafe { Owned::from_raw(self.host().api(), raw) })
    }

    fn profile_of(&self, frame: &Owned<kind::Frame>) -> Option<StreamProfileData> {
        let raw = self
            .resource
            .native(|sdk, error| sdk.frame_stream_profile(frame.borrow(), error))
            .ok()
            .flatten()?;
        // SAFETY: the SDK returns a new profile handle owned by the caller.
        let profile = unsafe { Owned::from_raw(self.host().api(), raw) };
        self.resource
            .native(|sdk, error| sdk.stream_profile_data(profile.borrow(), error))
            .ok()
            .flatten()
    }
}

impl fmt::Debug for FrameSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSet")
            .field("handle", &self.resource)
            .field("size", &self.size())
            .finish()
    }
}
