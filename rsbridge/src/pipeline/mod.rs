//! Pipelines: streaming a whole device and reading synchronized frame sets.
use std::fmt;
use std::time::Duration;

use rsbridge_sys::kind;

use crate::context::Context;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::frame_set::FrameSet;
use crate::handle::Owned;
use crate::host::Host;
use crate::resource::Resource;
use crate::stream_profile::StreamProfile;


/// Streams the first connected device with a default profile on each of its sensors.
///
/// Frame sets are pulled on the consumer thread with [`wait_for_frames`](Pipeline::wait_for_frames)
/// or [`poll_for_frames`](Pipeline::poll_for_frames). Deleting a running pipeline stops it.
pub struct Pipeline {
    resource: Resource<kind::Pipeline>,
}

impl Pipeline {
    /// Creates a pipeline on `context`. It is created empty if the context was destroyed.
    pub fn new(context: &Context) -> Self {
        let host = context.host();
        let resource = match context.raw() {
            Some(context) => Resource::create(host, |sdk, error| sdk.create_pipeline(context, error)),
            None => Resource::new(host, None),
        };
        Self { resource }
    }

    /// Starts streaming and returns the profile chosen.
    pub fn start(&self) -> Result<PipelineProfile> {
        let profile = self
            .resource
            .fetch(|sdk, raw, error| sdk.pipeline_start(raw, error))?
            .ok_or(Error::Unavailable("pipeline profile"))?;
        Ok(self.profile(profile))
    }

    /// Stops streaming. Frame sets not read yet are released.
    pub fn stop(&self) -> Result<()> {
        self.resource
            .fetch(|sdk, raw, error| sdk.pipeline_stop(raw, error))
    }

    /// Waits up to `timeout` for a frame set. Expiry gives `None` without recording an error.
    pub fn wait_for_frames(&self, timeout: Duration) -> Option<FrameSet> {
        let owned = self.wait(timeout)?;
        Some(FrameSet::from_owned(self.host(), owned))
    }

    /// Like [`wait_for_frames`](Self::wait_for_frames), but installs the set into `frames`.
    ///
    /// Returns whether a set arrived; `frames` is left alone otherwise.
    pub fn wait_for_frames_into(&self, frames: &FrameSet, timeout: Duration) -> bool {
        match self.wait(timeout) {
            Some(owned) => {
                frames.replace(Some(owned));
                true
            }
            None => false,
        }
    }

    /// Takes a frame set if one is ready, without waiting.
    pub fn poll_for_frames(&self) -> Option<FrameSet> {
        let owned = self.poll()?;
        Some(FrameSet::from_owned(self.host(), owned))
    }

    /// Like [`poll_for_frames`](Self::poll_for_frames), but installs the set into `frames`.
    pub fn poll_for_frames_into(&self, frames: &FrameSet) -> bool {
        match self.poll() {
            Some(owned) => {
                frames.replace(Some(owned));
                true
            }
            None => false,
        }
    }

    /// The profile of a running pipeline.
    pub fn active_profile(&self) -> Option<PipelineProfile> {
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.pipeline_active_profile(raw, error))
            .flatten()?;
        Some(self.profile(raw))
    }

    pub fn destroy(&self) {
        self.resource.destroy();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }

    #[inline]
    pub fn host(&self) -> &Host {
        self.resource.host()
    }

    fn wait(&self, timeout: Duration) -> Option<Owned<kind::Frame>> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.pipeline_try_wait_for_frames(raw, timeout_ms, error))
            .flatten()?;
        // SAFETY: the SDK hands the frame set reference to the caller.
        Some(unsafe { Owned::from_raw(self.host().api(), raw) })
    }

    fn poll(&self) -> Option<Owned<kind::Frame>> {
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.pipeline_poll_for_frames(raw, error))
            .flatten()?;
        // SAFETY: the SDK hands the frame set reference to the caller.
        Some(unsafe { Owned::from_raw(self.host().api(), raw) })
    }

    fn profile(&self, raw: rsbridge_sys::RawPipelineProfile) -> PipelineProfile {
        // SAFETY: start and active-profile calls return a new profile owned by the caller.
        let profile = unsafe { Owned::from_raw(self.host().api(), raw) };
        PipelineProfile {
            resource: Resource::new(self.host(), Some(profile)),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pipeline").field(&self.resource).finish()
    }
}

/// The device and stream profiles a pipeline runs with.
pub struct PipelineProfile {
    resource: Resource<kind::PipelineProfile>,
}

impl PipelineProfile {
    /// The profile of every stream the pipeline opened.
    pub fn streams(&self) -> Option<Vec<StreamProfile>> {
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.pipeline_profile_streams(raw, error))
            .flatten()?;
        // SAFETY: the SDK returns a new profile list owned by the caller.
        let list = unsafe { Owned::from_raw(self.resource.host().api(), raw) };
        StreamProfile::read_list(&self.resource, list)
    }

    /// The device being streamed.
    pub fn device(&self) -> Option<Device> {
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.pipeline_profile_device(raw, error))
            .flatten()?;
        // SAFETY: the SDK returns a new device handle owned by the caller.
        let device = unsafe { Owned::from_raw(self.resource.host().api(), raw) };
        Some(Device::from_owned(self.resource.host(), device))
    }

    pub fn destroy(&self) {
        self.resource.destroy();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }
}

impl fmt::Debug for PipelineProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PipelineProfile").field(&self.resource).finish()
    }
}
