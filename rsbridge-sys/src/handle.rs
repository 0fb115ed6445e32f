//! Opaque native handles.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZeroUsize;

/// An opaque, pointer-sized token owned by the SDK.
///
/// `K` is one of the uninhabited markers in [`kind`] and only exists to keep handles of different
/// kinds apart at compile time. A `Raw` carries no ownership: whoever holds it must know whether
/// it is responsible for releasing it.
#[repr(transparent)]
pub struct Raw<K> {
    addr: NonZeroUsize,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Raw<K> {
    /// Wraps an address returned by the SDK. Returns `None` for the null handle.
    #[inline]
    pub const fn from_addr(addr: usize) -> Option<Self> {
        match NonZeroUsize::new(addr) {
            Some(addr) => Some(Self {
                addr,
                _kind: PhantomData,
            }),
            None => None,
        }
    }

    /// Returns the underlying address.
    #[inline]
    pub const fn addr(self) -> usize {
        self.addr.get()
    }
}

impl<K> Clone for Raw<K> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Raw<K> {}

impl<K> PartialEq for Raw<K> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<K> Eq for Raw<K> {}

impl<K> Hash for Raw<K> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state)
    }
}

impl<K> fmt::Debug for Raw<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Raw({:#x})", self.addr)
    }
}

/// Handle kind markers.
pub mod kind {
    pub enum Context {}
    pub enum DeviceList {}
    pub enum Device {}
    pub enum SensorList {}
    pub enum Sensor {}
    pub enum StreamProfileList {}
    pub enum StreamProfile {}
    pub enum Frame {}
    pub enum FrameQueue {}
    pub enum ProcessingBlock {}
    pub enum Pipeline {}
    pub enum PipelineProfile {}
    /// Only valid for the duration of a notification callback.
    pub enum Notification {}
    pub enum Error {}
}

pub type RawContext = Raw<kind::Context>;
pub type RawDeviceList = Raw<kind::DeviceList>;
pub type RawDevice = Raw<kind::Device>;
pub type RawSensorList = Raw<kind::SensorList>;
pub type RawSensor = Raw<kind::Sensor>;
pub type RawStreamProfileList = Raw<kind::StreamProfileList>;
pub type RawStreamProfile = Raw<kind::StreamProfile>;
pub type RawFrame = Raw<kind::Frame>;
pub type RawFrameQueue = Raw<kind::FrameQueue>;
pub type RawProcessingBlock = Raw<kind::ProcessingBlock>;
pub type RawPipeline = Raw<kind::Pipeline>;
pub type RawPipelineProfile = Raw<kind::PipelineProfile>;
pub type RawNotification = Raw<kind::Notification>;
pub type RawError = Raw<kind::Error>;

/// The error out-parameter every fallible SDK call takes.
///
/// The SDK writes a freshly allocated error token into it on failure. The token must be freed with
/// [`Sdk::free_error`](crate::Sdk::free_error).
pub type ErrorOut<'a> = &'a mut Option<RawError>;
