use bitflags::bitflags;

use rsbridge_sys as ffi;

bitflags! {
    /// The interfaces a frame can be extended to.
    #[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq)]
    pub struct FrameExtensions: u32 {
        const VIDEO = 1;
        const DEPTH = 1 << 1;
        const DISPARITY = 1 << 2;
        const MOTION = 1 << 3;
        const POSE = 1 << 4;
        const POINTS = 1 << 5;
        const COMPOSITE = 1 << 6;
    }
}

impl From<ffi::Extension> for FrameExtensions {
    fn from(value: ffi::Extension) -> Self {
        match value {
            ffi::Extension::VideoFrame => Self::VIDEO,
            ffi::Extension::DepthFrame => Self::DEPTH,
            ffi::Extension::DisparityFrame => Self::DISPARITY,
            ffi::Extension::MotionFrame => Self::MOTION,
            ffi::Extension::PoseFrame => Self::POSE,
            ffi::Extension::Points => Self::POINTS,
            ffi::Extension::CompositeFrame => Self::COMPOSITE,
        }
    }
}

/// How a frame is handed to the SDK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Transfer {
    /// Add a reference for the SDK. The frame keeps its own.
    #[default]
    Borrow,
    /// Give the frame's reference to the SDK. The frame is left empty.
    Take,
}
