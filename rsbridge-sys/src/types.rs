//! Plain data types shared with the SDK.

/// The category of an SDK error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExceptionType {
    #[default]
    Unknown,
    CameraDisconnected,
    Backend,
    InvalidValue,
    WrongApiCallSequence,
    NotImplemented,
    DeviceInRecoveryMode,
    Io,
}

/// Severity of log messages and notifications, ordered from the most verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    FramesTimeout,
    FrameCorrupted,
    HardwareError,
    HardwareEvent,
    #[default]
    UnknownError,
    FirmwareUpdateRecommended,
    PoseRelocalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraInfo {
    Name,
    SerialNumber,
    FirmwareVersion,
    ProductId,
    ProductLine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Stream {
    #[default]
    Any,
    Depth,
    Color,
    Infrared,
    Gyro,
    Accel,
    Pose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Any,
    Z16,
    Disparity32,
    Rgb8,
    Bgr8,
    Y8,
    MotionXyz32f,
    SixDof,
}

impl Format {
    /// Bits used by one pixel of this format, or `0` for non-image formats.
    pub const fn bits_per_pixel(self) -> i32 {
        match self {
            Format::Z16 => 16,
            Format::Disparity32 => 32,
            Format::Rgb8 | Format::Bgr8 => 24,
            Format::Y8 => 8,
            Format::Any | Format::MotionXyz32f | Format::SixDof => 0,
        }
    }
}

/// Everything the SDK reports about a stream profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamProfileData {
    pub stream: Stream,
    pub format: Format,
    pub index: i32,
    pub unique_id: i32,
    pub fps: i32,
    /// Zero for non-video profiles.
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TimestampDomain {
    #[default]
    HardwareClock,
    SystemTime,
    GlobalTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameMetadata {
    FrameCounter,
    FrameTimestamp,
    SensorTimestamp,
    ActualExposure,
    ActualFps,
}

/// Interfaces a frame can be extended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    VideoFrame,
    DepthFrame,
    DisparityFrame,
    MotionFrame,
    PoseFrame,
    Points,
    /// A frame set bundling one frame per active stream.
    CompositeFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingBlockKind {
    /// Turns depth frames into RGB visualisations.
    Colorizer,
    /// Halves the resolution of video frames.
    DecimationFilter,
}
