use bitflags::bitflags;
use rsbridge_sys as ffi;

use crate::bridge::Backpressure;

bitflags! {
    /// Options for a [`Host`](crate::Host).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HostFlags: u32 {
        /// Log every native error at warn level.
        const LOG_NATIVE_ERRORS = 1;
        /// Abort the process when a host callback panics instead of logging and carrying on.
        const ABORT_ON_CALLBACK_PANIC = 1 << 1;
        const NONE = 0;
    }
}

impl Default for HostFlags {
    fn default() -> Self {
        HostFlags::LOG_NATIVE_ERRORS
    }
}

/// Configuration of a [`Host`](crate::Host).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// How the event relay behaves when the consumer falls behind.
    pub backpressure: Backpressure,
    pub flags: HostFlags,
    /// API version requested when creating contexts.
    pub api_version: i32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            backpressure: Backpressure::default(),
            flags: HostFlags::default(),
            api_version: ffi::API_VERSION,
        }
    }
}
