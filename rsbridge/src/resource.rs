//! The native handle slot shared by every host object.
use std::cell::RefCell;
use std::fmt;

use rsbridge_sys::{self as ffi, ErrorOut, Raw};

use crate::error::{Error, ErrorSlot, NativeError, Result};
use crate::handle::{HandleKind, Owned};
use crate::host::Host;

/// Zero or one owned handle of kind `K`, plus the error token of the last failed call made
/// through it.
///
/// Cleanup (free the error token, release the handle, leave the slot empty) runs from
/// [`destroy`](Resource::destroy), [`replace`](Resource::replace) and `Drop`, and does nothing
/// when the slot is already empty.
pub(crate) struct Resource<K: HandleKind> {
    host: Host,
    handle: RefCell<Option<Owned<K>>>,
    error: ErrorSlot,
}

impl<K: HandleKind> Resource<K> {
    pub(crate) fn new(host: &Host, handle: Option<Owned<K>>) -> Self {
        Self {
            host: host.clone(),
            handle: RefCell::new(handle),
            error: ErrorSlot::default(),
        }
    }

    /// Creates the handle with a native call. The slot stays empty if the call fails.
    pub(crate) fn create(
        host: &Host,
        f: impl FnOnce(&dyn ffi::Sdk, ErrorOut<'_>) -> Option<Raw<K>>,
    ) -> Self {
        let resource = Self::new(host, None);
        if let Ok(Some(raw)) = resource.native(f) {
            // SAFETY: create calls hand ownership of the new handle to the caller.
            let owned = unsafe { Owned::from_raw(host.api(), raw) };
            resource.handle.replace(Some(owned));
        }
        resource
    }

    #[inline]
    pub(crate) fn host(&self) -> &Host {
        &self.host
    }

    /// Copies the handle out, if there is one.
    ///
    /// Callers copy before calling into the SDK, so an error callback that destroys this object
    /// mid-call never finds the slot borrowed.
    #[inline]
    pub(crate) fn raw(&self) -> Option<Raw<K>> {
        self.handle.borrow().as_ref().map(Owned::borrow)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.handle.borrow().is_none()
    }

    /// Runs a native call that does not involve the handle, using this object's error slot.
    pub(crate) fn native<R>(
        &self,
        f: impl FnOnce(&dyn ffi::Sdk, ErrorOut<'_>) -> R,
    ) -> std::result::Result<R, NativeError> {
        self.host.native_result(Some(&self.error), f)
    }

    /// A query that may legitimately come back empty: destroyed objects and failed calls give
    /// `None`, with details in [`Host::error`].
    pub(crate) fn query<R>(
        &self,
        f: impl FnOnce(&dyn ffi::Sdk, Raw<K>, ErrorOut<'_>) -> R,
    ) -> Option<R> {
        let raw = self.raw()?;
        self.native(|sdk, error| f(sdk, raw, error)).ok()
    }

    /// A query or command that must succeed on a live object.
    pub(crate) fn fetch<R>(
        &self,
        f: impl FnOnce(&dyn ffi::Sdk, Raw<K>, ErrorOut<'_>) -> R,
    ) -> Result<R> {
        let raw = self.raw().ok_or(Error::Destroyed)?;
        Ok(self.native(|sdk, error| f(sdk, raw, error))?)
    }

    /// Runs cleanup on the current handle, then installs `handle`.
    pub(crate) fn replace(&self, handle: Option<Owned<K>>) {
        self.destroy();
        self.handle.replace(handle);
    }

    /// Moves the handle out, leaving the slot empty.
    pub(crate) fn take(&self) -> Option<Owned<K>> {
        self.error.clear();
        self.handle.take()
    }

    pub(crate) fn destroy(&self) {
        self.error.clear();
        let handle = self.handle.take();
        drop(handle);
    }
}

impl<K: HandleKind> Drop for Resource<K> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<K: HandleKind> fmt::Debug for Resource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            Some(raw) => write!(f, "{}({:#x})", K::NAME, raw.addr()),
            None => write!(f, "{}(destroyed)", K::NAME),
        }
    }
}
