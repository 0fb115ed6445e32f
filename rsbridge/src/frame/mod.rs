//! Frames.
//!
//! A [`Frame`] is a stable host object whose native frame can be swapped with
//! [`replace`](Frame::replace). Streaming and queue waits reuse one `Frame` instead of creating a
//! new object per native frame.
mod enums;

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use rsbridge_sys::{self as ffi, kind, FrameMetadata, TimestampDomain};

pub use self::enums::{FrameExtensions, Transfer};
use crate::error::{Error, Result};
use crate::handle::Owned;
use crate::host::Host;
use crate::resource::Resource;
use crate::stream_profile::StreamProfile;

#[cfg(test)]
mod tests;

const EXTENSIONS: [ffi::Extension; 7] = [
    ffi::Extension::VideoFrame,
    ffi::Extension::DepthFrame,
    ffi::Extension::DisparityFrame,
    ffi::Extension::MotionFrame,
    ffi::Extension::PoseFrame,
    ffi::Extension::Points,
    ffi::Extension::CompositeFrame,
];

/// A frame slot. Empty, or holding one reference to a native frame.
pub struct Frame {
    resource: Resource<kind::Frame>,
    extensions: Cell<FrameExtensions>,
}

impl Frame {
    /// Creates an empty frame.
    pub fn new(host: &Host) -> Self {
        Self {
            resource: Resource::new(host, None),
            extensions: Cell::new(FrameExtensions::empty()),
        }
    }

    /// Wraps a native frame reference.
    pub fn from_owned(host: &Host, frame: Owned<kind::Frame>) -> Self {
        let this = Self::new(host);
        this.replace(Some(frame));
        this
    }

    /// Releases the current frame, if any, and installs `frame` in its place.
    ///
    /// This is the only way the content of a `Frame` changes.
    pub fn replace(&self, frame: Option<Owned<kind::Frame>>) {
        self.resource.replace(frame);
        self.refresh_extensions();
    }

    /// Moves the frame reference out, leaving this frame empty.
    pub fn take(&self) -> Option<Owned<kind::Frame>> {
        self.extensions.set(FrameExtensions::empty());
        self.resource.take()
    }

    /// Releases the frame. Safe to call any number of times.
    pub fn destroy(&self) {
        self.replace(None);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resource.is_empty()
    }

    #[inline]
    pub fn host(&self) -> &Host {
        self.resource.host()
    }

    /// Returns a new `Frame` holding another reference to the same native frame.
    pub fn share(&self) -> Result<Frame> {
        let frame = self.hand_off(Transfer::Borrow)?;
        Ok(Self::from_owned(self.host(), frame))
    }

    /// Produces the reference handed to the SDK by queues and processing blocks.
    pub(crate) fn hand_off(&self, transfer: Transfer) -> Result<Owned<kind::Frame>> {
        match transfer {
            Transfer::Take => self.take().ok_or(Error::Destroyed),
            Transfer::Borrow => {
                let raw = self.resource.raw().ok_or(Error::Destroyed)?;
                self.resource
                    .native(|sdk, error| sdk.frame_add_ref(raw, error))?;
                // SAFETY: the reference added above belongs to the new owner.
                Ok(unsafe { Owned::from_raw(self.host().api(), raw) })
            }
        }
    }

    fn refresh_extensions(&self) {
        let mut extensions = FrameExtensions::empty();
        if !self.resource.is_empty() {
            for extension in EXTENSIONS {
                let supported = self
                    .resource
                    .query(|sdk, raw, error| sdk.is_frame_extendable_to(raw, extension, error));
                if supported == Some(true) {
                    extensions |= FrameExtensions::from(extension);
                }
            }
        }
        self.extensions.set(extensions);
    }

    /// Extensions of the current frame, as seen when it was installed.
    #[inline]
    pub fn extensions(&self) -> FrameExtensions {
        self.extensions.get()
    }

    #[inline]
    pub fn is(&self, extensions: FrameExtensions) -> bool {
        !self.is_empty() && self.extensions().contains(extensions)
    }

    #[inline]
    pub fn is_video_frame(&self) -> bool {
        self.is(FrameExtensions::VIDEO)
    }

    #[inline]
    pub fn is_depth_frame(&self) -> bool {
        self.is(FrameExtensions::DEPTH)
    }

    #[inline]
    pub fn is_motion_frame(&self) -> bool {
        self.is(FrameExtensions::MOTION)
    }

    #[inline]
    pub fn is_frame_set(&self) -> bool {
        self.is(FrameExtensions::COMPOSITE)
    }

    pub fn width(&self) -> Option<i32> {
        self.resource.query(|sdk, raw, error| sdk.frame_width(raw, error))
    }

    pub fn height(&self) -> Option<i32> {
        self.resource.query(|sdk, raw, error| sdk.frame_height(raw, error))
    }

    pub fn stride_in_bytes(&self) -> Option<i32> {
        self.resource
            .query(|sdk, raw, error| sdk.frame_stride_in_bytes(raw, error))
    }

    pub fn bits_per_pixel(&self) -> Option<i32> {
        self.resource
            .query(|sdk, raw, error| sdk.frame_bits_per_pixel(raw, error))
    }

    /// The pixel buffer. It stays valid after the frame is replaced or destroyed.
    pub fn data(&self) -> Option<Arc<[u8]>> {
        self.resource
            .query(|sdk, raw, error| sdk.frame_data(raw, error))
            .flatten()
    }

    /// Timestamp in milliseconds.
    pub fn timestamp(&self) -> Option<f64> {
        self.resource
            .query(|sdk, raw, error| sdk.frame_timestamp(raw, error))
    }

    pub fn timestamp_domain(&self) -> Option<TimestampDomain> {
        self.resource
            .query(|sdk, raw, error| sdk.frame_timestamp_domain(raw, error))
    }

    pub fn number(&self) -> Option<u64> {
        self.resource.query(|sdk, raw, error| sdk.frame_number(raw, error))
    }

    pub fn supports_metadata(&self, key: FrameMetadata) -> Option<bool> {
        self.resource
            .query(|sdk, raw, error| sdk.supports_frame_metadata(raw, key, error))
    }

    pub fn metadata(&self, key: FrameMetadata) -> Option<i64> {
        self.resource
            .query(|sdk, raw, error| sdk.frame_metadata(raw, key, error))
    }

    /// Distance in metres at pixel (`x`, `y`) of a depth frame.
    pub fn distance(&self, x: i32, y: i32) -> Option<f32> {
        if !self.is_depth_frame() {
            return None;
        }
        self.resource
            .query(|sdk, raw, error| sdk.depth_frame_distance(raw, x, y, error))
    }

    /// The profile of the stream this frame came from.
    pub fn profile(&self) -> Option<StreamProfile> {
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.frame_stream_profile(raw, error))
            .flatten()?;
        // SAFETY: the SDK returns a new profile handle owned by the caller.
        let profile = unsafe { Owned::from_raw(self.host().api(), raw) };
        Some(StreamProfile::from_owned(self.host(), profile))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("handle", &self.resource)
            .field("extensions", &self.extensions())
            .finish()
    }
}
