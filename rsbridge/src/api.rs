//! Module for interacting with the SDK function table
use rsbridge_sys as ffi;
use std::{fmt, sync::Arc};

/// A shared handle to the SDK function table.
///
/// Cheap to clone and safe to send to SDK threads; producers carry one so the handles they
/// receive can be released from wherever they end up.
#[derive(Clone)]
pub struct Api {
    sdk: Arc<dyn ffi::Sdk>,
}

impl Api {
    /// Wraps an SDK implementation.
    #[inline]
    pub fn new(sdk: impl ffi::Sdk) -> Self {
        Self { sdk: Arc::new(sdk) }
    }

    /// Wraps an SDK that is already shared.
    #[inline]
    pub fn from_arc(sdk: Arc<dyn ffi::Sdk>) -> Self {
        Self { sdk }
    }

    /// Returns the function table.
    #[inline]
    pub fn sdk(&self) -> &dyn ffi::Sdk {
        &*self.sdk
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api").finish_non_exhaustive()
    }
}
