//! Ownership of native handles.
//!
//! A [`Raw`] handle only ever gets released through an [`Owned`]. Everything that gives up a
//! handle to the SDK does so with [`Owned::take`], so a handle is released exactly once or handed
//! over exactly once.
use std::{fmt, mem::ManuallyDrop, ptr};

use rsbridge_sys::{kind, Raw, Sdk};

use crate::api::Api;

mod sealed {
    pub trait Sealed {}
}

/// A kind of handle that can be owned, with the SDK call that gives it back.
pub trait HandleKind: sealed::Sealed + Sized + 'static {
    /// Name used in log output.
    const NAME: &'static str;

    #[doc(hidden)]
    fn release(sdk: &dyn Sdk, raw: Raw<Self>);
}

macro_rules! handle_kinds {
    ($($kind:ident => $release:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for kind::$kind {}

            impl HandleKind for kind::$kind {
                const NAME: &'static str = stringify!($kind);

                #[inline]
                fn release(sdk: &dyn Sdk, raw: Raw<Self>) {
                    sdk.$release(raw)
                }
            }
        )*
    };
}

handle_kinds! {
    Context => delete_context,
    DeviceList => delete_device_list,
    Device => delete_device,
    SensorList => delete_sensor_list,
    Sensor => delete_sensor,
    StreamProfileList => delete_stream_profiles_list,
    StreamProfile => delete_stream_profile,
    Frame => release_frame,
    FrameQueue => delete_frame_queue,
    ProcessingBlock => delete_processing_block,
    Pipeline => delete_pipeline,
    PipelineProfile => delete_pipeline_profile,
    Error => free_error,
}

/// A native handle this value is responsible for releasing.
///
/// Move-only. Dropping it releases the handle; [`take`](Owned::take) hands it over instead.
pub struct Owned<K: HandleKind> {
    raw: Raw<K>,
    api: Api,
}

impl<K: HandleKind> Owned<K> {
    /// Takes ownership of `raw`.
    ///
    /// # Safety
    /// `raw` must be live, and the caller must be entitled to release it: nothing else may
    /// release it afterwards.
    #[inline]
    pub unsafe fn from_raw(api: &Api, raw: Raw<K>) -> Self {
        Self {
            raw,
            api: api.clone(),
        }
    }

    /// Returns the handle without giving up ownership.
    #[inline]
    pub fn borrow(&self) -> Raw<K> {
        self.raw
    }

    /// Gives up ownership, returning the handle unreleased.
    #[inline]
    #[must_use]
    pub fn take(self) -> Raw<K> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `api` is dropped exactly once here and `this` is never dropped.
        unsafe { ptr::drop_in_place(&mut this.api) };
        this.raw
    }

    #[inline]
    pub fn api(&self) -> &Api {
        &self.api
    }
}

impl<K: HandleKind> Drop for Owned<K> {
    #[inline]
    fn drop(&mut self) {
        K::release(self.api.sdk(), self.raw);
    }
}

impl<K: HandleKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({:#x})", K::NAME, self.raw.addr())
    }
}
