#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use rsbridge_sys::sim::{FrameSpec, ObjectKind, SimSdk};
    use rsbridge_sys::{ExceptionType, Format, Stream};

    use crate::frame::*;
    use crate::frame_queue::FrameQueue;
    use crate::processing::ProcessingBlock;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn setup() -> (SimSdk, Host) {
        init();
        let sim = SimSdk::new();
        let host = Host::new(sim.clone());
        (sim, host)
    }

    fn frame(host: &Host, sim: &SimSdk, spec: FrameSpec) -> (Frame, ffi::RawFrame) {
        let raw = sim.create_frame(spec).unwrap();
        let frame = Frame::from_owned(host, unsafe { Owned::from_raw(host.api(), raw) });
        (frame, raw)
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (sim, host) = setup();
        let (frame, raw) = frame(&host, &sim, FrameSpec::depth(4, 4, 1));
        assert_eq!(sim.frame_refs(raw), 1);

        frame.destroy();
        assert!(frame.is_empty());
        assert_eq!(sim.frame_refs(raw), 0);
        frame.destroy();
        drop(frame);

        assert_eq!(sim.invalid_releases(), 0);
        assert_eq!(sim.live_total(), 0);
    }

    #[test]
    fn test_empty_frame_reports_nothing() {
        let (_sim, host) = setup();
        let frame = Frame::new(&host);

        assert!(frame.is_empty());
        assert_eq!(frame.extensions(), FrameExtensions::empty());
        assert!(!frame.is_video_frame());
        assert_eq!(frame.width(), None);
        assert_eq!(frame.data(), None);
        assert!(frame.profile().is_none());
        assert!(matches!(frame.share(), Err(Error::Destroyed)));
        assert!(host.error().is_none());
    }

    #[test]
    fn test_replace_keeps_identity() {
        let (sim, host) = setup();
        let (first, first_raw) = frame(&host, &sim, FrameSpec::depth(4, 4, 1));
        let slot = Rc::new(first);
        let same = slot.clone();

        let second_raw = sim.create_frame(FrameSpec::color(8, 2, 2)).unwrap();
        slot.replace(Some(unsafe { Owned::from_raw(host.api(), second_raw) }));

        assert!(Rc::ptr_eq(&slot, &same));
        assert_eq!(sim.frame_refs(first_raw), 0);
        assert_eq!(sim.frame_refs(second_raw), 1);
        assert_eq!(same.width(), Some(8));
        assert_eq!(same.number(), Some(2));
        assert!(same.is_video_frame());
        assert!(!same.is_depth_frame());

        drop(slot);
        drop(same);
        assert_eq!(sim.frame_refs(second_raw), 0);
        assert_eq!(sim.invalid_releases(), 0);
    }

    #[test]
    fn test_accessors() {
        let (sim, host) = setup();
        let (frame, _) = frame(&host, &sim, FrameSpec::depth(4, 3, 2));

        assert_eq!(
            frame.extensions(),
            FrameExtensions::VIDEO | FrameExtensions::DEPTH
        );
        assert!(frame.is_depth_frame());
        assert!(!frame.is_motion_frame());
        assert_eq!(frame.width(), Some(4));
        assert_eq!(frame.height(), Some(3));
        assert_eq!(frame.bits_per_pixel(), Some(16));
        assert_eq!(frame.stride_in_bytes(), Some(8));
        assert_eq!(frame.number(), Some(2));
        assert_eq!(frame.data().unwrap().len(), 24);
        assert_eq!(frame.supports_metadata(FrameMetadata::FrameCounter), Some(true));
        assert_eq!(frame.metadata(FrameMetadata::FrameCounter), Some(2));

        // Every byte is 2, so each pixel reads 0x0202 depth units.
        let distance = frame.distance(1, 1).unwrap();
        assert!((distance - 514.0 * 0.001).abs() < 1e-6);

        assert_eq!(frame.distance(10, 10), None);
        let error = host.error().unwrap();
        assert_eq!(error.native_function(), "depth_frame_distance");
        assert!(error.is_recoverable());

        let profile = frame.profile().unwrap();
        assert_eq!(profile.stream(), Stream::Depth);
        assert_eq!(profile.format(), Format::Z16);
        assert_eq!(profile.width(), 4);
    }

    #[test]
    fn test_distance_needs_a_depth_frame() {
        let (sim, host) = setup();
        let (frame, _) = frame(&host, &sim, FrameSpec::color(4, 4, 1));

        assert_eq!(frame.distance(0, 0), None);
        assert!(host.error().is_none());
    }

    #[test]
    fn test_data_outlives_the_frame() {
        let (sim, host) = setup();
        let (frame, _) = frame(&host, &sim, FrameSpec::color(2, 2, 9));

        let data = frame.data().unwrap();
        frame.destroy();
        assert!(data.iter().all(|&byte| byte == 9));
    }

    #[test]
    fn test_share_adds_a_reference() {
        let (sim, host) = setup();
        let (frame, raw) = frame(&host, &sim, FrameSpec::depth(4, 4, 3));

        let shared = frame.share().unwrap();
        assert_eq!(sim.frame_refs(raw), 2);
        assert_eq!(shared.number(), Some(3));

        frame.destroy();
        assert_eq!(sim.frame_refs(raw), 1);
        assert_eq!(shared.number(), Some(3));
        drop(shared);
        assert_eq!(sim.frame_refs(raw), 0);
    }

    #[test]
    fn test_enqueue_borrow_keeps_the_frame() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 2);
        let (frame, raw) = frame(&host, &sim, FrameSpec::depth(4, 4, 5));

        queue.enqueue(&frame, Transfer::Borrow).unwrap();
        assert!(!frame.is_empty());
        assert_eq!(sim.frame_refs(raw), 2);

        let received = queue.wait_for_frame(Duration::from_millis(100)).unwrap();
        assert_eq!(received.number(), Some(5));
        drop(received);
        assert_eq!(sim.frame_refs(raw), 1);
        drop(frame);
        assert_eq!(sim.frame_refs(raw), 0);
    }

    #[test]
    fn test_enqueue_take_empties_the_frame() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 2);
        let (frame, raw) = frame(&host, &sim, FrameSpec::depth(4, 4, 5));

        queue.enqueue(&frame, Transfer::Take).unwrap();
        assert!(frame.is_empty());
        assert_eq!(sim.frame_refs(raw), 1);
        assert!(matches!(
            queue.enqueue(&frame, Transfer::Take),
            Err(Error::Destroyed)
        ));

        // Installing into an existing frame reuses it.
        assert!(queue.wait_for_frame_into(&frame, Duration::from_millis(100)));
        assert_eq!(frame.number(), Some(5));
        assert!(frame.is_depth_frame());

        assert!(!queue.wait_for_frame_into(&frame, Duration::from_millis(10)));
        assert_eq!(frame.number(), Some(5));
        assert!(host.error().is_none());

        drop(frame);
        assert_eq!(sim.frame_refs(raw), 0);
    }

    #[test]
    fn test_full_queue_releases_the_oldest_frame() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 1);
        let (first, first_raw) = frame(&host, &sim, FrameSpec::depth(2, 2, 1));
        let (second, _) = frame(&host, &sim, FrameSpec::depth(2, 2, 2));

        queue.enqueue(&first, Transfer::Take).unwrap();
        queue.enqueue(&second, Transfer::Take).unwrap();
        assert_eq!(sim.frame_refs(first_raw), 0);

        assert_eq!(queue.poll_for_frame().unwrap().number(), Some(2));
        assert!(queue.poll_for_frame().is_none());
    }

    #[test]
    fn test_destroying_a_queue_releases_its_frames() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 4);
        for number in 0..3 {
            let (frame, _) = frame(&host, &sim, FrameSpec::depth(2, 2, number));
            queue.enqueue(&frame, Transfer::Take).unwrap();
        }
        assert_eq!(sim.live(ObjectKind::Frame), 3);

        queue.destroy();
        assert!(queue.is_destroyed());
        assert_eq!(sim.live(ObjectKind::Frame), 0);
        assert!(queue.wait_for_frame(Duration::from_millis(1)).is_none());
        drop(queue);
        assert_eq!(sim.invalid_releases(), 0);
    }

    #[test]
    fn test_colorizer_output() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 1);
        let colorizer = ProcessingBlock::colorizer(&host);
        colorizer.start(&queue).unwrap();

        let (frame, raw) = frame(&host, &sim, FrameSpec::depth(4, 4, 7));
        colorizer.process(&frame, Transfer::Borrow).unwrap();
        assert_eq!(sim.frame_refs(raw), 1);

        let colored = queue.wait_for_frame(Duration::from_millis(100)).unwrap();
        assert!(colored.is_video_frame());
        assert!(!colored.is_depth_frame());
        assert_eq!(colored.bits_per_pixel(), Some(24));
        assert_eq!(colored.profile().unwrap().format(), Format::Rgb8);
    }

    #[test]
    fn test_processing_consumes_the_frame_on_failure() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 1);
        let colorizer = ProcessingBlock::colorizer(&host);
        colorizer.start(&queue).unwrap();

        let (frame, raw) = frame(&host, &sim, FrameSpec::color(4, 4, 1));
        let error = match colorizer.process(&frame, Transfer::Take) {
            Err(Error::Native(error)) => error,
            other => panic!("expected a native error, got {other:?}"),
        };
        assert_eq!(error.exception_type(), ExceptionType::InvalidValue);
        assert!(frame.is_empty());
        assert_eq!(sim.frame_refs(raw), 0);
        assert!(queue.poll_for_frame().is_none());
    }

    #[test]
    fn test_decimation_halves_resolution() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 1);
        let decimation = ProcessingBlock::decimation_filter(&host);
        decimation.start(&queue).unwrap();

        let (frame, _) = frame(&host, &sim, FrameSpec::depth(8, 6, 1));
        decimation.process(&frame, Transfer::Take).unwrap();

        let output = queue.poll_for_frame().unwrap();
        assert_eq!(output.width(), Some(4));
        assert_eq!(output.height(), Some(3));
        assert!(output.is_depth_frame());
    }

    #[test]
    fn test_processing_before_start_is_a_sequence_error() {
        let (sim, host) = setup();
        let decimation = ProcessingBlock::decimation_filter(&host);
        let (frame, raw) = frame(&host, &sim, FrameSpec::depth(8, 6, 1));

        let error = match decimation.process(&frame, Transfer::Borrow) {
            Err(Error::Native(error)) => error,
            other => panic!("expected a native error, got {other:?}"),
        };
        assert_eq!(error.exception_type(), ExceptionType::WrongApiCallSequence);
        assert_eq!(sim.frame_refs(raw), 1);
    }

    #[test]
    fn test_failed_queue_creation_leaves_an_empty_queue() {
        let (sim, host) = setup();
        sim.fail_next("create_frame_queue", ExceptionType::Backend, "no memory");
        let queue = FrameQueue::new(&host, 4);

        assert!(queue.is_destroyed());
        assert_eq!(host.error().unwrap().native_function(), "create_frame_queue");
        assert!(queue.poll_for_frame().is_none());
        let (frame, _) = frame(&host, &sim, FrameSpec::depth(2, 2, 1));
        assert!(matches!(
            queue.enqueue(&frame, Transfer::Borrow),
            Err(Error::Destroyed)
        ));
    }

    #[test]
    fn test_processing_output_queue_lives_while_the_block_does() {
        let (sim, host) = setup();
        let queue = FrameQueue::new(&host, 1);
        let colorizer = ProcessingBlock::colorizer(&host);
        colorizer.start(&queue).unwrap();
        queue.destroy();
        assert_eq!(sim.live(ObjectKind::FrameQueue), 1);

        let (frame, _) = frame(&host, &sim, FrameSpec::depth(4, 4, 1));
        colorizer.process(&frame, Transfer::Take).unwrap();
        assert_eq!(sim.orphaned_frames(), 0);
        assert_eq!(sim.live(ObjectKind::Frame), 1);

        colorizer.destroy();
        assert_eq!(sim.live(ObjectKind::FrameQueue), 0);
        assert_eq!(sim.live(ObjectKind::Frame), 0);
        assert_eq!(sim.invalid_releases(), 0);
    }
}
