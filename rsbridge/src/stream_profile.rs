//! Stream profiles.
use std::fmt;

use rsbridge_sys::{kind, Format, Stream, StreamProfileData};

use crate::handle::{HandleKind, Owned};
use crate::host::Host;
use crate::resource::Resource;

/// A stream configuration a sensor can be opened with.
///
/// Everything the SDK reports about the profile is read once, at construction, and stays
/// readable after [`destroy`](StreamProfile::destroy).
pub struct StreamProfile {
    resource: Resource<kind::StreamProfile>,
    data: StreamProfileData,
}

impl StreamProfile {
    pub(crate) fn from_owned(host: &Host, profile: Owned<kind::StreamProfile>) -> Self {
        let resource = Resource::new(host, Some(profile));
        let data = resource
            .query(|sdk, raw, error| sdk.stream_profile_data(raw, error))
            .flatten()
            .unwrap_or_default();
        Self { resource, data }
    }

    /// Reads every profile out of `list`, making the calls through `owner`'s error slot.
    pub(crate) fn read_list<K: HandleKind>(
        owner: &Resource<K>,
        list: Owned<kind::StreamProfileList>,
    ) -> Option<Vec<StreamProfile>> {
        let host = owner.host();
        let count = owner
            .native(|sdk, error| sdk.stream_profiles_count(list.borrow(), error))
            .ok()?;
        let mut profiles = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let raw = owner
                .native(|sdk, error| sdk.stream_profile_at(list.borrow(), index, error))
                .ok()
                .flatten()?;
            // SAFETY: the SDK returns a new profile handle owned by the caller.
            let profile = unsafe { Owned::from_raw(host.api(), raw) };
            profiles.push(StreamProfile::from_owned(host, profile));
        }
        Some(profiles)
    }

    pub fn destroy(&self) {
        self.resource.destroy();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }

    pub(crate) fn raw(&self) -> Option<rsbridge_sys::RawStreamProfile> {
        self.resource.raw()
    }

    #[inline]
    pub fn data(&self) -> StreamProfileData {
        self.data
    }

    #[inline]
    pub fn stream(&self) -> Stream {
        self.data.stream
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.data.format
    }

    #[inline]
    pub fn index(&self) -> i32 {
        self.data.index
    }

    #[inline]
    pub fn unique_id(&self) -> i32 {
        self.data.unique_id
    }

    #[inline]
    pub fn fps(&self) -> i32 {
        self.data.fps
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.data.width
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.data.height
    }
}

impl fmt::Debug for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProfile")
            .field("handle", &self.resource)
            .field("data", &self.data)
            .finish()
    }
}
