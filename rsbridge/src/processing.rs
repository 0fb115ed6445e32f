//! Processing blocks.
use std::cell::RefCell;
use std::fmt;

use rsbridge_sys::{kind, ProcessingBlockKind};

use crate::error::{Error, Result};
use crate::frame::{Frame, Transfer};
use crate::frame_queue::{FrameQueue, QueueHandle};
use crate::host::Host;
use crate::resource::Resource;

/// A frame filter. Output goes to the [`FrameQueue`] given to [`start`](ProcessingBlock::start).
pub struct ProcessingBlock {
    resource: Resource<kind::ProcessingBlock>,
    // Released after the block, which writes into it.
    output: RefCell<Option<QueueHandle>>,
    kind: ProcessingBlockKind,
}

impl ProcessingBlock {
    pub fn new(host: &Host, kind: ProcessingBlockKind) -> Self {
        Self {
            resource: Resource::create(host, |sdk, error| {
                sdk.create_processing_block(kind, error)
            }),
            output: RefCell::new(None),
            kind,
        }
    }

    /// Turns depth frames into RGB frames.
    pub fn colorizer(host: &Host) -> Self {
        Self::new(host, ProcessingBlockKind::Colorizer)
    }

    /// Halves the resolution of video frames.
    pub fn decimation_filter(host: &Host) -> Self {
        Self::new(host, ProcessingBlockKind::DecimationFilter)
    }

    #[inline]
    pub fn kind(&self) -> ProcessingBlockKind {
        self.kind
    }

    /// Sends every processed frame to `queue`.
    ///
    /// The block keeps the native queue alive until it is destroyed or started on another queue.
    pub fn start(&self, queue: &FrameQueue) -> Result<()> {
        let handle = queue.attach()?;
        let output = handle.raw().ok_or(Error::Destroyed)?;
        self.resource
            .fetch(|sdk, raw, error| sdk.start_processing_queue(raw, output, error))?;
        self.output.replace(Some(handle));
        Ok(())
    }

    /// Processes `frame`.
    ///
    /// The reference handed over is consumed by the SDK even when processing fails.
    pub fn process(&self, frame: &Frame, transfer: Transfer) -> Result<()> {
        let block = self.resource.raw().ok_or(Error::Destroyed)?;
        let owned = frame.hand_off(transfer)?;
        let frame = owned.take();
        Ok(self
            .resource
            .native(|sdk, error| sdk.process_frame(block, frame, error))?)
    }

    pub fn destroy(&self) {
        self.resource.destroy();
        self.output.replace(None);
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }
}

impl fmt::Debug for ProcessingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingBlock")
            .field("handle", &self.resource)
            .field("kind", &self.kind)
            .finish()
    }
}
