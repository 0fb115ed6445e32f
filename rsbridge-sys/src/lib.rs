//! Low level interface to the depth-camera SDK.
//!
//! This crate describes the SDK the way its C API looks: opaque handles, create/delete pairs,
//! add-ref/release for frames, and an error out-parameter on every call that can fail.
//! For a safe wrapper, see `rsbridge`.
//!
//! ## Feature Flags
//!
//! - **`sim`** - Builds [`sim::SimSdk`], an in-process implementation of [`Sdk`] with simulated
//!   devices, streaming threads and fault injection.

use std::sync::Arc;

mod handle;
mod types;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use handle::*;
pub use types::*;

/// Makes an SDK compatible version integer
///
/// # Example
/// ```
/// use rsbridge_sys::api_version;
/// let v = api_version!(2, 54, 1);
/// assert!(v == 25401);
/// ```
#[macro_export]
macro_rules! api_version {
    ($major:expr, $minor:expr, $patch:expr) => {
        ($major) * 10000 + ($minor) * 100 + ($patch)
    };
}

pub const API_VERSION: i32 = api_version!(2, 54, 1);

/// Called by the SDK, from one of its worker threads, when devices are connected or removed.
///
/// Ownership of both lists passes to the callback.
pub trait DevicesChangedCallback: Send + Sync {
    fn on_devices_changed(&self, removed: Option<RawDeviceList>, added: Option<RawDeviceList>);
}

/// Called by the SDK, from one of its worker threads, for every sensor notification.
///
/// The notification handle is only valid until the method returns.
pub trait NotificationsCallback: Send + Sync {
    fn on_notification(&self, notification: RawNotification);
}

/// Called by the SDK, from one of its worker threads, for every frame.
///
/// Ownership of one reference to the frame passes to the callback.
pub trait FrameCallback: Send + Sync {
    fn on_frame(&self, frame: RawFrame);
}

/// Receives the SDK's own log output.
pub trait LogCallback: Send + Sync {
    fn on_log(&self, severity: LogSeverity, message: &str);
}

/// The SDK function table.
///
/// Callback objects handed to the SDK are dropped by the SDK when it is done with them: on
/// re-registration, on `stop`, or when their owner is deleted.
///
/// Calls that take an [`ErrorOut`] report failure by writing an error token into it and returning
/// the default value. Release and delete calls never fail.
pub trait Sdk: Send + Sync + 'static {
    // Errors
    fn failed_function(&self, error: RawError) -> String;
    fn error_message(&self, error: RawError) -> String;
    fn exception_type(&self, error: RawError) -> ExceptionType;
    fn free_error(&self, error: RawError);

    // Context
    fn create_context(&self, api_version: i32, error: ErrorOut<'_>) -> Option<RawContext>;
    fn delete_context(&self, context: RawContext);
    fn query_devices(&self, context: RawContext, error: ErrorOut<'_>) -> Option<RawDeviceList>;
    fn set_devices_changed_callback(
        &self,
        context: RawContext,
        callback: Box<dyn DevicesChangedCallback>,
        error: ErrorOut<'_>,
    );

    // Device lists and devices
    fn device_count(&self, list: RawDeviceList, error: ErrorOut<'_>) -> i32;
    fn create_device(&self, list: RawDeviceList, index: i32, error: ErrorOut<'_>)
        -> Option<RawDevice>;
    fn device_list_contains(
        &self,
        list: RawDeviceList,
        device: RawDevice,
        error: ErrorOut<'_>,
    ) -> bool;
    fn delete_device_list(&self, list: RawDeviceList);
    fn delete_device(&self, device: RawDevice);
    fn supports_device_info(&self, device: RawDevice, info: CameraInfo, error: ErrorOut<'_>)
        -> bool;
    fn device_info(&self, device: RawDevice, info: CameraInfo, error: ErrorOut<'_>)
        -> Option<String>;
    fn query_sensors(&self, device: RawDevice, error: ErrorOut<'_>) -> Option<RawSensorList>;

    // Sensors
    fn sensors_count(&self, list: RawSensorList, error: ErrorOut<'_>) -> i32;
    fn create_sensor(&self, list: RawSensorList, index: i32, error: ErrorOut<'_>)
        -> Option<RawSensor>;
    fn delete_sensor_list(&self, list: RawSensorList);
    fn delete_sensor(&self, sensor: RawSensor);
    fn supports_sensor_info(&self, sensor: RawSensor, info: CameraInfo, error: ErrorOut<'_>)
        -> bool;
    fn sensor_info(&self, sensor: RawSensor, info: CameraInfo, error: ErrorOut<'_>)
        -> Option<String>;
    fn stream_profiles(&self, sensor: RawSensor, error: ErrorOut<'_>)
        -> Option<RawStreamProfileList>;
    fn open(&self, sensor: RawSensor, profiles: &[RawStreamProfile], error: ErrorOut<'_>);
    fn start(&self, sensor: RawSensor, callback: Box<dyn FrameCallback>, error: ErrorOut<'_>);
    fn stop(&self, sensor: RawSensor, error: ErrorOut<'_>);
    fn close(&self, sensor: RawSensor, error: ErrorOut<'_>);
    fn set_notifications_callback(
        &self,
        sensor: RawSensor,
        callback: Box<dyn NotificationsCallback>,
        error: ErrorOut<'_>,
    );

    // Stream profiles
    fn stream_profiles_count(&self, list: RawStreamProfileList, error: ErrorOut<'_>) -> i32;
    /// Returns a new profile handle the caller must delete.
    fn stream_profile_at(
        &self,
        list: RawStreamProfileList,
        index: i32,
        error: ErrorOut<'_>,
    ) -> Option<RawStreamProfile>;
    fn delete_stream_profiles_list(&self, list: RawStreamProfileList);
    fn stream_profile_data(
        &self,
        profile: RawStreamProfile,
        error: ErrorOut<'_>,
    ) -> Option<StreamProfileData>;
    fn delete_stream_profile(&self, profile: RawStreamProfile);

    // Notifications
    fn notification_description(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> Option<String>;
    fn notification_timestamp(&self, notification: RawNotification, error: ErrorOut<'_>) -> f64;
    fn notification_severity(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> LogSeverity;
    fn notification_category(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> NotificationCategory;
    fn notification_serialized_data(
        &self,
        notification: RawNotification,
        error: ErrorOut<'_>,
    ) -> Option<String>;

    // Frames
    fn frame_add_ref(&self, frame: RawFrame, error: ErrorOut<'_>);
    fn release_frame(&self, frame: RawFrame);
    fn frame_width(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32;
    fn frame_height(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32;
    fn frame_stride_in_bytes(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32;
    fn frame_bits_per_pixel(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32;
    fn frame_data(&self, frame: RawFrame, error: ErrorOut<'_>) -> Option<Arc<[u8]>>;
    fn frame_timestamp(&self, frame: RawFrame, error: ErrorOut<'_>) -> f64;
    fn frame_timestamp_domain(&self, frame: RawFrame, error: ErrorOut<'_>) -> TimestampDomain;
    fn frame_number(&self, frame: RawFrame, error: ErrorOut<'_>) -> u64;
    fn supports_frame_metadata(
        &self,
        frame: RawFrame,
        key: FrameMetadata,
        error: ErrorOut<'_>,
    ) -> bool;
    fn frame_metadata(&self, frame: RawFrame, key: FrameMetadata, error: ErrorOut<'_>) -> i64;
    fn is_frame_extendable_to(
        &self,
        frame: RawFrame,
        extension: Extension,
        error: ErrorOut<'_>,
    ) -> bool;
    /// Returns a new profile handle the caller must delete.
    fn frame_stream_profile(&self, frame: RawFrame, error: ErrorOut<'_>)
        -> Option<RawStreamProfile>;
    fn depth_frame_distance(&self, frame: RawFrame, x: i32, y: i32, error: ErrorOut<'_>) -> f32;

    // Frame sets
    fn embedded_frames_count(&self, frame: RawFrame, error: ErrorOut<'_>) -> i32;
    /// Returns a new reference to the frame at `index` of a frame set.
    fn extract_frame(&self, frame: RawFrame, index: i32, error: ErrorOut<'_>) -> Option<RawFrame>;

    // Frame queues
    fn create_frame_queue(&self, capacity: i32, error: ErrorOut<'_>) -> Option<RawFrameQueue>;
    fn delete_frame_queue(&self, queue: RawFrameQueue);
    /// Waits at most `timeout_ms` for a frame. Expiry is not an error.
    fn try_wait_for_frame(
        &self,
        queue: RawFrameQueue,
        timeout_ms: u32,
        error: ErrorOut<'_>,
    ) -> Option<RawFrame>;
    fn poll_for_frame(&self, queue: RawFrameQueue, error: ErrorOut<'_>) -> Option<RawFrame>;
    /// Consumes one reference to `frame`.
    fn enqueue_frame(&self, frame: RawFrame, queue: RawFrameQueue);

    // Processing blocks
    fn create_processing_block(
        &self,
        kind: ProcessingBlockKind,
        error: ErrorOut<'_>,
    ) -> Option<RawProcessingBlock>;
    fn delete_processing_block(&self, block: RawProcessingBlock);
    fn start_processing_queue(
        &self,
        block: RawProcessingBlock,
        queue: RawFrameQueue,
        error: ErrorOut<'_>,
    );
    /// Consumes one reference to `frame`, even on failure.
    fn process_frame(&self, block: RawProcessingBlock, frame: RawFrame, error: ErrorOut<'_>);

    // Pipelines
    fn create_pipeline(&self, context: RawContext, error: ErrorOut<'_>) -> Option<RawPipeline>;
    /// Stops the pipeline if it is running, releasing the frame sets it still holds.
    fn delete_pipeline(&self, pipeline: RawPipeline);
    /// Streams the first connected device, one default profile per sensor.
    fn pipeline_start(&self, pipeline: RawPipeline, error: ErrorOut<'_>)
        -> Option<RawPipelineProfile>;
    fn pipeline_stop(&self, pipeline: RawPipeline, error: ErrorOut<'_>);
    /// Waits at most `timeout_ms` for a frame set. Expiry is not an error.
    fn pipeline_try_wait_for_frames(
        &self,
        pipeline: RawPipeline,
        timeout_ms: u32,
        error: ErrorOut<'_>,
    ) -> Option<RawFrame>;
    fn pipeline_poll_for_frames(&self, pipeline: RawPipeline, error: ErrorOut<'_>)
        -> Option<RawFrame>;
    fn pipeline_active_profile(
        &self,
        pipeline: RawPipeline,
        error: ErrorOut<'_>,
    ) -> Option<RawPipelineProfile>;
    fn delete_pipeline_profile(&self, profile: RawPipelineProfile);
    fn pipeline_profile_streams(
        &self,
        profile: RawPipelineProfile,
        error: ErrorOut<'_>,
    ) -> Option<RawStreamProfileList>;
    /// Returns a new device handle the caller must delete.
    fn pipeline_profile_device(
        &self,
        profile: RawPipelineProfile,
        error: ErrorOut<'_>,
    ) -> Option<RawDevice>;

    // Logging
    fn log_to_callback(
        &self,
        min_severity: LogSeverity,
        callback: Box<dyn LogCallback>,
        error: ErrorOut<'_>,
    );
}
