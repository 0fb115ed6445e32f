#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::sim::*;

    struct CountingFrames {
        frames: Arc<Mutex<Vec<RawFrame>>>,
        dropped: Arc<AtomicBool>,
    }

    impl FrameCallback for CountingFrames {
        fn on_frame(&self, frame: RawFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    impl Drop for CountingFrames {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    struct RecordingHotplug {
        calls: Arc<Mutex<Vec<(Option<RawDeviceList>, Option<RawDeviceList>, thread::ThreadId)>>>,
    }

    impl DevicesChangedCallback for RecordingHotplug {
        fn on_devices_changed(&self, removed: Option<RawDeviceList>, added: Option<RawDeviceList>) {
            self.calls
                .lock()
                .unwrap()
                .push((removed, added, thread::current().id()));
        }
    }

    fn context(sdk: &SimSdk) -> RawContext {
        let mut error = None;
        let context = sdk.create_context(crate::API_VERSION, &mut error);
        assert!(error.is_none());
        context.unwrap()
    }

    fn first_sensor(sdk: &SimSdk, context: RawContext) -> RawSensor {
        let mut error = None;
        let devices = sdk.query_devices(context, &mut error).unwrap();
        let device = sdk.create_device(devices, 0, &mut error).unwrap();
        let sensors = sdk.query_sensors(device, &mut error).unwrap();
        let sensor = sdk.create_sensor(sensors, 0, &mut error).unwrap();
        sdk.delete_sensor_list(sensors);
        sdk.delete_device(device);
        sdk.delete_device_list(devices);
        assert!(error.is_none());
        sensor
    }

    fn open_first_profile(sdk: &SimSdk, sensor: RawSensor) {
        let mut error = None;
        let profiles = sdk.stream_profiles(sensor, &mut error).unwrap();
        let profile = sdk.stream_profile_at(profiles, 0, &mut error).unwrap();
        sdk.open(sensor, &[profile], &mut error);
        sdk.delete_stream_profile(profile);
        sdk.delete_stream_profiles_list(profiles);
        assert!(error.is_none());
    }

    #[test]
    fn test_error_token_describes_failure() {
        let sdk = SimSdk::new();
        let mut error = None;

        let context = sdk.create_context(1, &mut error);
        assert!(context.is_none());

        let token = error.expect("version mismatch should raise an error");
        assert_eq!(sdk.failed_function(token), "create_context");
        assert_eq!(sdk.exception_type(token), ExceptionType::InvalidValue);
        assert!(sdk.error_message(token).contains("API version mismatch"));

        sdk.free_error(token);
        assert_eq!(sdk.live(ObjectKind::Error), 0);
        assert_eq!(sdk.invalid_releases(), 0);
    }

    #[test]
    fn test_fail_next_only_fails_once() {
        let sdk = SimSdk::new();
        sdk.fail_next("create_context", ExceptionType::Backend, "usb hiccup");

        let mut error = None;
        assert!(sdk.create_context(crate::API_VERSION, &mut error).is_none());
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::Backend);
        assert_eq!(sdk.error_message(token), "usb hiccup");
        sdk.free_error(token);

        let context = sdk.create_context(crate::API_VERSION, &mut error);
        assert!(context.is_some());
        assert!(error.is_none());
        sdk.delete_context(context.unwrap());
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_frame_reference_counting() {
        let sdk = SimSdk::new();
        let frame = sdk.create_frame(FrameSpec::depth(4, 2, 7)).unwrap();
        assert_eq!(sdk.frame_refs(frame), 1);

        let mut error = None;
        sdk.frame_add_ref(frame, &mut error);
        assert_eq!(sdk.frame_refs(frame), 2);

        sdk.release_frame(frame);
        assert_eq!(sdk.frame_refs(frame), 1);
        sdk.release_frame(frame);
        assert_eq!(sdk.frame_refs(frame), 0);
        assert_eq!(sdk.invalid_releases(), 0);

        // A third release is a double free
        sdk.release_frame(frame);
        assert_eq!(sdk.invalid_releases(), 1);
    }

    #[test]
    fn test_delete_with_wrong_kind_is_counted() {
        let sdk = SimSdk::new();
        let context = context(&sdk);

        sdk.delete_frame_queue(Raw::from_addr(context.addr()).unwrap());
        assert_eq!(sdk.invalid_releases(), 1);
        assert_eq!(sdk.live(ObjectKind::Context), 1);

        sdk.delete_context(context);
        assert_eq!(sdk.live(ObjectKind::Context), 0);
    }

    #[test]
    fn test_frame_accessors() {
        let sdk = SimSdk::new();
        let frame = sdk.create_frame(FrameSpec::depth(4, 2, 3)).unwrap();
        let mut error = None;

        assert_eq!(sdk.frame_width(frame, &mut error), 4);
        assert_eq!(sdk.frame_height(frame, &mut error), 2);
        assert_eq!(sdk.frame_stride_in_bytes(frame, &mut error), 8);
        assert_eq!(sdk.frame_bits_per_pixel(frame, &mut error), 16);
        assert_eq!(sdk.frame_number(frame, &mut error), 3);
        assert_eq!(sdk.frame_data(frame, &mut error).unwrap().len(), 16);
        assert!(sdk.is_frame_extendable_to(frame, Extension::DepthFrame, &mut error));
        assert!(!sdk.is_frame_extendable_to(frame, Extension::MotionFrame, &mut error));
        assert_eq!(sdk.frame_metadata(frame, FrameMetadata::FrameCounter, &mut error), 3);

        // Every byte is 3, so every depth value is 0x0303 units
        let distance = sdk.depth_frame_distance(frame, 1, 1, &mut error);
        assert!((distance - 0x0303 as f32 * 0.001).abs() < 1e-6);
        assert!(error.is_none());

        sdk.depth_frame_distance(frame, 4, 0, &mut error);
        let token = error.take().unwrap();
        assert_eq!(sdk.failed_function(token), "depth_frame_distance");
        sdk.free_error(token);

        sdk.release_frame(frame);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let sdk = SimSdk::new();
        let mut error = None;
        let queue = sdk.create_frame_queue(2, &mut error).unwrap();

        let frames: Vec<_> = (1..=3)
            .map(|n| sdk.create_frame(FrameSpec::color(2, 2, n)).unwrap())
            .collect();
        for frame in &frames {
            sdk.enqueue_frame(*frame, queue);
        }

        // The first frame was evicted and released
        assert_eq!(sdk.frame_refs(frames[0]), 0);
        assert_eq!(sdk.poll_for_frame(queue, &mut error), Some(frames[1]));
        assert_eq!(sdk.poll_for_frame(queue, &mut error), Some(frames[2]));
        assert_eq!(sdk.poll_for_frame(queue, &mut error), None);
        assert!(error.is_none());

        sdk.release_frame(frames[1]);
        sdk.release_frame(frames[2]);
        sdk.delete_frame_queue(queue);
        assert_eq!(sdk.live_total(), 0);
        assert_eq!(sdk.invalid_releases(), 0);
    }

    #[test]
    fn test_wait_for_frame_times_out() {
        let sdk = SimSdk::new();
        let mut error = None;
        let queue = sdk.create_frame_queue(1, &mut error).unwrap();

        let start = Instant::now();
        assert!(sdk.try_wait_for_frame(queue, 50, &mut error).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(error.is_none());

        sdk.delete_frame_queue(queue);
    }

    #[test]
    fn test_wait_for_frame_wakes_on_enqueue() {
        let sdk = SimSdk::new();
        let mut error = None;
        let queue = sdk.create_frame_queue(1, &mut error).unwrap();
        let frame = sdk.create_frame(FrameSpec::color(2, 2, 1)).unwrap();

        let producer = {
            let sdk = sdk.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sdk.enqueue_frame(frame, queue);
            })
        };

        assert_eq!(sdk.try_wait_for_frame(queue, 5000, &mut error), Some(frame));
        producer.join().unwrap();

        sdk.release_frame(frame);
        sdk.delete_frame_queue(queue);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_hotplug_runs_on_sdk_thread() {
        let sdk = SimSdk::new();
        let context = context(&sdk);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut error = None;
        sdk.set_devices_changed_callback(
            context,
            Box::new(RecordingHotplug {
                calls: calls.clone(),
            }),
            &mut error,
        );
        assert!(error.is_none());

        sdk.connect(DeviceSpec::depth_camera("123"));
        assert!(sdk.disconnect("123"));
        assert!(!sdk.disconnect("123"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        for (removed, added, caller) in calls.iter() {
            assert_ne!(*caller, thread::current().id());
            sdk.delete_device_list(removed.unwrap());
            sdk.delete_device_list(added.unwrap());
        }
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_streaming_lifecycle() {
        let sdk = SimSdk::new();
        sdk.set_auto_stream(false);
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let sensor = first_sensor(&sdk, context);
        let mut error = None;

        // Starting before opening is a sequencing error
        let frames = Arc::new(Mutex::new(Vec::new()));
        let dropped = Arc::new(AtomicBool::new(false));
        sdk.start(
            sensor,
            Box::new(CountingFrames {
                frames: frames.clone(),
                dropped: dropped.clone(),
            }),
            &mut error,
        );
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::WrongApiCallSequence);
        sdk.free_error(token);
        assert!(dropped.load(Ordering::SeqCst));

        open_first_profile(&sdk, sensor);
        dropped.store(false, Ordering::SeqCst);
        sdk.start(
            sensor,
            Box::new(CountingFrames {
                frames: frames.clone(),
                dropped: dropped.clone(),
            }),
            &mut error,
        );
        assert!(error.is_none());
        assert!(sdk.is_streaming("123", 0));

        assert_eq!(sdk.emit_frames("123", 0, 3), 3);
        let delivered: Vec<_> = frames.lock().unwrap().drain(..).collect();
        assert_eq!(delivered.len(), 3);
        for (n, frame) in delivered.iter().enumerate() {
            assert_eq!(sdk.frame_number(*frame, &mut error), n as u64 + 1);
            sdk.release_frame(*frame);
        }

        sdk.stop(sensor, &mut error);
        assert!(error.is_none());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!sdk.is_streaming("123", 0));
        assert_eq!(sdk.emit_frames("123", 0, 3), 0);

        sdk.close(sensor, &mut error);
        assert!(error.is_none());
        sdk.delete_sensor(sensor);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
        assert_eq!(sdk.invalid_releases(), 0);
    }

    #[test]
    fn test_auto_stream_delivers_until_stopped() {
        let sdk = SimSdk::new();
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let sensor = first_sensor(&sdk, context);
        open_first_profile(&sdk, sensor);

        let frames = Arc::new(Mutex::new(Vec::new()));
        let mut error = None;
        sdk.start(
            sensor,
            Box::new(CountingFrames {
                frames: frames.clone(),
                dropped: Arc::new(AtomicBool::new(false)),
            }),
            &mut error,
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while frames.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        sdk.stop(sensor, &mut error);
        assert!(error.is_none());

        let delivered: Vec<_> = frames.lock().unwrap().drain(..).collect();
        assert!(delivered.len() >= 2);
        for frame in delivered {
            sdk.release_frame(frame);
        }
        sdk.close(sensor, &mut error);
        sdk.delete_sensor(sensor);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_disconnected_device_raises() {
        let sdk = SimSdk::new();
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let sensor = first_sensor(&sdk, context);

        sdk.disconnect("123");

        let mut error = None;
        assert!(sdk.sensor_info(sensor, CameraInfo::Name, &mut error).is_none());
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::CameraDisconnected);
        sdk.free_error(token);

        sdk.delete_sensor(sensor);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_notification_handle_lives_for_the_callback() {
        struct Seen(Arc<Mutex<Option<(String, NotificationCategory)>>>, SimSdk);

        impl NotificationsCallback for Seen {
            fn on_notification(&self, notification: RawNotification) {
                let mut error = None;
                let description = self
                    .1
                    .notification_description(notification, &mut error)
                    .unwrap_or_default();
                let category = self.1.notification_category(notification, &mut error);
                *self.0.lock().unwrap() = Some((description, category));
            }
        }

        let sdk = SimSdk::new();
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let sensor = first_sensor(&sdk, context);
        let seen = Arc::new(Mutex::new(None));

        let mut error = None;
        sdk.set_notifications_callback(sensor, Box::new(Seen(seen.clone(), sdk.clone())), &mut error);
        assert!(sdk.notify(
            "123",
            0,
            NotificationSpec {
                description: "Frames didn't arrive".to_owned(),
                category: NotificationCategory::FramesTimeout,
                ..Default::default()
            }
        ));

        assert_eq!(
            *seen.lock().unwrap(),
            Some((
                "Frames didn't arrive".to_owned(),
                NotificationCategory::FramesTimeout
            ))
        );
        assert_eq!(sdk.live(ObjectKind::Notification), 0);

        // Unplugging drops the callback, which holds a clone of the SDK
        sdk.disconnect("123");
        sdk.delete_sensor(sensor);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_processing_consumes_input() {
        let sdk = SimSdk::new();
        let mut error = None;
        let block = sdk
            .create_processing_block(ProcessingBlockKind::Colorizer, &mut error)
            .unwrap();

        // No output queue yet, but the input is still consumed
        let frame = sdk.create_frame(FrameSpec::depth(4, 4, 1)).unwrap();
        sdk.process_frame(block, frame, &mut error);
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::WrongApiCallSequence);
        sdk.free_error(token);
        assert_eq!(sdk.frame_refs(frame), 0);

        let queue = sdk.create_frame_queue(1, &mut error).unwrap();
        sdk.start_processing_queue(block, queue, &mut error);
        let frame = sdk.create_frame(FrameSpec::depth(4, 4, 2)).unwrap();
        sdk.process_frame(block, frame, &mut error);
        assert!(error.is_none());

        let output = sdk.try_wait_for_frame(queue, 1000, &mut error).unwrap();
        assert_eq!(sdk.frame_bits_per_pixel(output, &mut error), 24);
        assert_eq!(sdk.frame_width(output, &mut error), 4);
        assert!(!sdk.is_frame_extendable_to(output, Extension::DepthFrame, &mut error));

        sdk.release_frame(output);
        sdk.delete_frame_queue(queue);
        sdk.delete_processing_block(block);
        assert_eq!(sdk.live_total(), 0);
        assert_eq!(sdk.invalid_releases(), 0);
    }

    #[test]
    fn test_decimation_halves_resolution() {
        let sdk = SimSdk::new();
        let mut error = None;
        let block = sdk
            .create_processing_block(ProcessingBlockKind::DecimationFilter, &mut error)
            .unwrap();
        let queue = sdk.create_frame_queue(1, &mut error).unwrap();
        sdk.start_processing_queue(block, queue, &mut error);

        let frame = sdk.create_frame(FrameSpec::color(8, 6, 1)).unwrap();
        sdk.process_frame(block, frame, &mut error);
        let output = sdk.poll_for_frame(queue, &mut error).unwrap();
        assert_eq!(sdk.frame_width(output, &mut error), 4);
        assert_eq!(sdk.frame_height(output, &mut error), 3);
        assert_eq!(sdk.frame_data(output, &mut error).unwrap().len(), 4 * 3 * 3);
        assert!(error.is_none());

        sdk.release_frame(output);
        sdk.delete_frame_queue(queue);
        sdk.delete_processing_block(block);
    }

    #[test]
    fn test_log_callback_threshold() {
        struct Collect(Arc<AtomicUsize>);

        impl LogCallback for Collect {
            fn on_log(&self, _severity: LogSeverity, _message: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let sdk = SimSdk::new();
        let count = Arc::new(AtomicUsize::new(0));
        let mut error = None;
        sdk.log_to_callback(LogSeverity::Warn, Box::new(Collect(count.clone())), &mut error);

        sdk.log(LogSeverity::Info, "ignored");
        sdk.log(LogSeverity::Error, "kept");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_orphaned_frame_is_counted_and_released() {
        let sdk = SimSdk::new();
        let mut error = None;
        let queue = sdk.create_frame_queue(1, &mut error).unwrap();
        sdk.delete_frame_queue(queue);

        let frame = sdk.create_frame(FrameSpec::depth(2, 2, 1)).unwrap();
        sdk.enqueue_frame(frame, queue);

        assert_eq!(sdk.orphaned_frames(), 1);
        assert_eq!(sdk.frame_refs(frame), 0);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_pipeline_delivers_frame_sets() {
        let sdk = SimSdk::new();
        sdk.set_auto_stream(false);
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let mut error = None;
        let pipeline = sdk.create_pipeline(context, &mut error).unwrap();
        let profile = sdk.pipeline_start(pipeline, &mut error).unwrap();
        assert!(error.is_none());

        assert_eq!(sdk.emit_framesets("123", 1), 1);
        let set = sdk
            .pipeline_try_wait_for_frames(pipeline, 1000, &mut error)
            .unwrap();
        assert!(sdk.is_frame_extendable_to(set, Extension::CompositeFrame, &mut error));
        assert_eq!(sdk.embedded_frames_count(set, &mut error), 2);

        let depth = sdk.extract_frame(set, 0, &mut error).unwrap();
        assert!(sdk.is_frame_extendable_to(depth, Extension::DepthFrame, &mut error));
        assert_eq!(sdk.frame_refs(depth), 2);
        assert!(error.is_none());

        assert!(sdk.extract_frame(set, 2, &mut error).is_none());
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::InvalidValue);
        sdk.free_error(token);

        // Releasing the set drops its share of the embedded frames
        sdk.release_frame(set);
        assert_eq!(sdk.frame_refs(depth), 1);
        sdk.release_frame(depth);

        sdk.pipeline_stop(pipeline, &mut error);
        assert!(error.is_none());
        sdk.delete_pipeline_profile(profile);
        sdk.delete_pipeline(pipeline);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
        assert_eq!(sdk.invalid_releases(), 0);
    }

    #[test]
    fn test_pipeline_keeps_only_the_latest_set() {
        let sdk = SimSdk::new();
        sdk.set_auto_stream(false);
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let mut error = None;
        let pipeline = sdk.create_pipeline(context, &mut error).unwrap();
        let profile = sdk.pipeline_start(pipeline, &mut error).unwrap();

        assert_eq!(sdk.emit_framesets("123", 3), 3);
        let set = sdk.pipeline_poll_for_frames(pipeline, &mut error).unwrap();
        assert_eq!(sdk.frame_number(set, &mut error), 3);
        assert!(sdk.pipeline_poll_for_frames(pipeline, &mut error).is_none());
        assert!(error.is_none());
        sdk.release_frame(set);

        // A stopped pipeline with an unread set still releases everything
        sdk.emit_framesets("123", 1);
        sdk.pipeline_stop(pipeline, &mut error);
        sdk.delete_pipeline_profile(profile);
        sdk.delete_pipeline(pipeline);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_pipeline_call_sequence() {
        let sdk = SimSdk::new();
        let context = context(&sdk);
        let mut error = None;
        let pipeline = sdk.create_pipeline(context, &mut error).unwrap();

        assert!(sdk.pipeline_poll_for_frames(pipeline, &mut error).is_none());
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::WrongApiCallSequence);
        sdk.free_error(token);

        assert!(sdk.pipeline_start(pipeline, &mut error).is_none());
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::Backend);
        sdk.free_error(token);

        sdk.connect(DeviceSpec::depth_camera("123"));
        sdk.set_auto_stream(false);
        let profile = sdk.pipeline_start(pipeline, &mut error).unwrap();
        assert!(sdk.pipeline_start(pipeline, &mut error).is_none());
        let token = error.take().unwrap();
        assert_eq!(sdk.exception_type(token), ExceptionType::WrongApiCallSequence);
        sdk.free_error(token);

        let device = sdk.pipeline_profile_device(profile, &mut error).unwrap();
        assert_eq!(
            sdk.device_info(device, CameraInfo::SerialNumber, &mut error).as_deref(),
            Some("123")
        );
        let streams = sdk.pipeline_profile_streams(profile, &mut error).unwrap();
        assert_eq!(sdk.stream_profiles_count(streams, &mut error), 2);
        assert!(error.is_none());

        sdk.delete_stream_profiles_list(streams);
        sdk.delete_device(device);
        sdk.delete_pipeline_profile(profile);
        // Deleting a running pipeline stops it
        sdk.delete_pipeline(pipeline);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }

    #[test]
    fn test_pipeline_auto_stream() {
        let sdk = SimSdk::new();
        sdk.connect(DeviceSpec::depth_camera("123"));
        let context = context(&sdk);
        let mut error = None;
        let pipeline = sdk.create_pipeline(context, &mut error).unwrap();
        let profile = sdk.pipeline_start(pipeline, &mut error).unwrap();

        let set = sdk
            .pipeline_try_wait_for_frames(pipeline, 5000, &mut error)
            .expect("the pipeline should stream on its own");
        assert!(error.is_none());
        sdk.release_frame(set);

        sdk.pipeline_stop(pipeline, &mut error);
        sdk.delete_pipeline_profile(profile);
        sdk.delete_pipeline(pipeline);
        sdk.delete_context(context);
        assert_eq!(sdk.live_total(), 0);
    }
}
