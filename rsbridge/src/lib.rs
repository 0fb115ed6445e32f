//! A safe binding of a depth-camera SDK for single-threaded host runtimes.
//!
//! The SDK calls back from its own worker threads. Host code may only run on one thread, the one
//! owning the [`Host`]. Callbacks registered through this crate never run host code on an SDK
//! thread: they take ownership of what the SDK handed them and post an event to the host's relay,
//! and [`Host::dispatch`] runs it later on the consumer thread.
//!
//! Every native handle is owned by exactly one value and released exactly once, whether through
//! `destroy`, by being replaced, or on drop.
//!
//! ```no_run
//! use rsbridge::prelude::*;
//! use rsbridge::ffi::sim::SimSdk;
//!
//! let host = Host::new(SimSdk::new());
//! let context = Context::new(&host);
//! context
//!     .on_devices_changed(|event| println!("{} added", event.added.len().unwrap_or(0)))
//!     .unwrap();
//! loop {
//!     host.dispatch();
//! }
//! ```
pub extern crate rsbridge_sys;
pub use rsbridge_sys as ffi;

mod api;
pub mod bridge;
mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_queue;
pub mod frame_set;
pub mod function;
pub mod handle;
pub mod host;
pub mod log;
pub mod notification;
pub mod pipeline;
pub mod processing;
mod producer;
mod resource;
pub mod sensor;
pub mod stream_profile;

pub use api::Api;
pub use config::{HostConfig, HostFlags};
pub use error::{Error, NativeError, Result};
pub use host::Host;
pub use producer::ProducerState;

pub mod prelude {
    //! The rsbridge prelude.
    //!
    //! Contains the types you most likely want to import anyway.
    pub use super::{
        context::{Context, DevicesChanged},
        device::{Device, DeviceList},
        frame::{Frame, Transfer},
        frame_queue::FrameQueue,
        frame_set::FrameSet,
        notification::Notification,
        pipeline::{Pipeline, PipelineProfile},
        processing::ProcessingBlock,
        sensor::Sensor,
        stream_profile::StreamProfile,
        Host, HostConfig,
    };
}
