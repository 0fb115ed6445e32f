//! Errors and the native error side-channel.
//!
//! Every native call made on the consumer thread goes through
//! [`Host::native_result`](crate::Host), which resets the last error, runs the call and analyzes
//! the error token it produced. The last error is then available from [`Host::error`].
//!
//! [`Host::error`]: crate::Host::error
use std::cell::RefCell;
use std::rc::Rc;
use std::result;

use log::warn;
use rsbridge_sys::{self as ffi, kind, ExceptionType, RawError};
use thiserror::Error;

use crate::api::Api;
use crate::handle::Owned;


/// An error reported by the SDK.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{function} failed: {description}")]
pub struct NativeError {
    recoverable: bool,
    description: String,
    function: String,
    exception: ExceptionType,
}

impl NativeError {
    /// Reads everything out of an error token. The token stays live.
    pub(crate) fn from_token(sdk: &dyn ffi::Sdk, token: RawError) -> Self {
        let exception = sdk.exception_type(token);
        Self {
            recoverable: is_recoverable(exception),
            description: sdk.error_message(token),
            function: sdk.failed_function(token),
            exception,
        }
    }

    /// Whether the call can be retried with different arguments or in a different order.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Name of the SDK function that failed.
    #[inline]
    pub fn native_function(&self) -> &str {
        &self.function
    }

    #[inline]
    pub fn exception_type(&self) -> ExceptionType {
        self.exception
    }
}

/// Invalid arguments, calls made out of order and missing features are recoverable.
/// Everything else means the device or the SDK is in trouble.
pub const fn is_recoverable(exception: ExceptionType) -> bool {
    matches!(
        exception,
        ExceptionType::InvalidValue
            | ExceptionType::WrongApiCallSequence
            | ExceptionType::NotImplemented
    )
}

/// Runs a native call on an SDK thread.
///
/// The side-channel belongs to the consumer thread and is left alone: an error token is logged
/// and freed on the spot, and the call's default value is returned.
pub(crate) fn off_thread_call<R>(
    api: &Api,
    f: impl FnOnce(&dyn ffi::Sdk, ffi::ErrorOut<'_>) -> R,
) -> R {
    let mut token = None;
    let value = f(api.sdk(), &mut token);
    if let Some(token) = token {
        // SAFETY: the SDK hands ownership of error tokens to the caller.
        let token = unsafe { Owned::from_raw(api, token) };
        let error = NativeError::from_token(api.sdk(), token.borrow());
        warn!("{error} (on an SDK thread)");
    }
    value
}

/// The error type for operations on host objects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("The object has been destroyed")]
    Destroyed,
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error("The SDK returned no {0}")]
    Unavailable(&'static str),
}

/// A specialized `Result` type for operations on host objects.
pub type Result<T> = result::Result<T, Error>;

pub(crate) type ErrorCallback = Rc<dyn Fn(&NativeError)>;

/// The last error seen on the consumer thread, plus the host's error callback.
pub(crate) struct ErrorChannel {
    current: RefCell<Option<NativeError>>,
    callback: RefCell<Option<ErrorCallback>>,
    log: bool,
}

impl ErrorChannel {
    pub(crate) fn new(log: bool) -> Self {
        Self {
            current: RefCell::new(None),
            callback: RefCell::new(None),
            log,
        }
    }

    #[inline]
    pub(crate) fn reset(&self) {
        self.current.replace(None);
    }

    /// Records the error behind `token` and fires the callback.
    ///
    /// No borrow is held while the callback runs, so it may make native calls of its own.
    pub(crate) fn analyze(&self, sdk: &dyn ffi::Sdk, token: RawError) -> NativeError {
        let error = NativeError::from_token(sdk, token);
        if self.log {
            warn!("{error}");
        }
        self.current.replace(Some(error.clone()));

        let callback = self.callback.borrow().clone();
        if let Some(callback) = callback {
            callback(&error);
        }
        error
    }

    pub(crate) fn current(&self) -> Option<NativeError> {
        self.current.borrow().clone()
    }

    pub(crate) fn set_callback(&self, callback: ErrorCallback) {
        self.callback.replace(Some(callback));
    }

    pub(crate) fn clear_callback(&self) {
        self.callback.replace(None);
    }
}

/// The error token of the last failed call made through one host object.
#[derive(Default)]
pub(crate) struct ErrorSlot(RefCell<Option<Owned<kind::Error>>>);

impl ErrorSlot {
    /// Frees the previous token, if any, and keeps `token`.
    pub(crate) fn store(&self, token: Owned<kind::Error>) {
        let previous = self.0.replace(Some(token));
        drop(previous);
    }

    /// Frees the stored token.
    pub(crate) fn clear(&self) {
        let previous = self.0.take();
        drop(previous);
    }
}
